use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::SourceKind;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid scientific name: {0}")]
    InvalidScientificName(String),

    #[error("unknown media source: {0}")]
    InvalidSource(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("{provider} requires an API key (set {env})")]
    MissingCredential { provider: SourceKind, env: String },

    #[error("{provider} request failed: {message}")]
    SourceNetwork {
        provider: SourceKind,
        message: String,
    },

    #[error("{provider} returned status {status}: {message}")]
    SourceStatus {
        provider: SourceKind,
        status: u16,
        message: String,
    },

    #[error("{provider} is still rate limiting after cooldown")]
    RateLimited { provider: SourceKind },

    #[error("{provider} response could not be parsed: {message}")]
    SourceParse {
        provider: SourceKind,
        message: String,
    },

    #[error("{provider} API error: {message}")]
    SourceApi {
        provider: SourceKind,
        message: String,
    },

    #[error("failed to parse catalogue {path}: {message}")]
    CatalogueParse { path: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
