use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregationPolicy;
use crate::domain::SourceKind;
use crate::error::KiraError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-media.json";
pub const DEFAULT_XENO_CANTO_KEY_ENV: &str = "XENO_CANTO_API_KEY";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub sufficiency_threshold: Option<usize>,
    #[serde(default)]
    pub photo_sources: Option<Vec<SourceKind>>,
    #[serde(default)]
    pub rate_limit_cooldown_secs: Option<u64>,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourcesConfig {
    #[serde(default)]
    pub wikimedia: SourceEntry,
    #[serde(default)]
    pub ala: SourceEntry,
    #[serde(default)]
    pub inaturalist: SourceEntry,
    #[serde(default)]
    pub xeno_canto: SourceEntry,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SourceEntry {
    #[serde(default)]
    pub min_interval_ms: Option<u64>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub place_id: Option<u64>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub min_interval: Duration,
    pub state: Option<String>,
    pub place_id: Option<u64>,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub policy: AggregationPolicy,
    pub photo_sources: Vec<SourceKind>,
    pub cooldown: Duration,
    pub wikimedia: SourceSettings,
    pub ala: SourceSettings,
    pub inaturalist: SourceSettings,
    pub xeno_canto: SourceSettings,
}

impl ResolvedConfig {
    pub fn source(&self, kind: SourceKind) -> &SourceSettings {
        match kind {
            SourceKind::Wikimedia => &self.wikimedia,
            SourceKind::Ala => &self.ala,
            SourceKind::Inaturalist => &self.inaturalist,
            SourceKind::XenoCanto => &self.xeno_canto,
        }
    }

    pub fn with_overrides(
        mut self,
        max_results: Option<usize>,
        threshold: Option<usize>,
        photo_sources: Option<Vec<SourceKind>>,
    ) -> Result<Self, KiraError> {
        if let Some(max_results) = max_results {
            self.policy.max_results = max_results;
        }
        if let Some(threshold) = threshold {
            self.policy.sufficiency_threshold = threshold;
        }
        if let Some(sources) = photo_sources {
            self.photo_sources = sources;
        }
        validate(&self)?;
        Ok(self)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Without an explicit path a missing `kira-media.json` means built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, |name| std::env::var(name).ok())
    }

    pub fn resolve_config<F>(config: Config, env: F) -> Result<ResolvedConfig, KiraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AggregationPolicy::default();
        let policy = AggregationPolicy {
            max_results: config.max_results.unwrap_or(defaults.max_results),
            sufficiency_threshold: config
                .sufficiency_threshold
                .unwrap_or(defaults.sufficiency_threshold),
        };
        let sources = config.sources;

        let resolved = ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(SCHEMA_VERSION),
            policy,
            photo_sources: config.photo_sources.unwrap_or_else(default_photo_sources),
            cooldown: Duration::from_secs(config.rate_limit_cooldown_secs.unwrap_or(10)),
            wikimedia: settings(sources.wikimedia, SourceKind::Wikimedia, &env),
            ala: settings(sources.ala, SourceKind::Ala, &env),
            inaturalist: settings(sources.inaturalist, SourceKind::Inaturalist, &env),
            xeno_canto: settings(sources.xeno_canto, SourceKind::XenoCanto, &env),
        };
        validate(&resolved)?;
        Ok(resolved)
    }
}

pub fn default_photo_sources() -> Vec<SourceKind> {
    vec![SourceKind::Wikimedia, SourceKind::Ala, SourceKind::Inaturalist]
}

pub fn default_min_interval(kind: SourceKind) -> Duration {
    match kind {
        SourceKind::Wikimedia => Duration::from_millis(100),
        SourceKind::Ala => Duration::from_millis(200),
        SourceKind::Inaturalist | SourceKind::XenoCanto => Duration::from_secs(1),
    }
}

fn settings<F>(entry: SourceEntry, kind: SourceKind, env: &F) -> SourceSettings
where
    F: Fn(&str) -> Option<String>,
{
    let api_key_env = match kind {
        SourceKind::XenoCanto => Some(
            entry
                .api_key_env
                .unwrap_or_else(|| DEFAULT_XENO_CANTO_KEY_ENV.to_string()),
        ),
        _ => entry.api_key_env,
    };
    let api_key = entry
        .api_key
        .or_else(|| api_key_env.as_deref().and_then(env))
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty());

    SourceSettings {
        min_interval: entry
            .min_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| default_min_interval(kind)),
        state: entry.state.filter(|s| !s.trim().is_empty()),
        place_id: entry.place_id,
        api_key,
        api_key_env,
    }
}

fn validate(config: &ResolvedConfig) -> Result<(), KiraError> {
    if config.schema_version != SCHEMA_VERSION {
        return Err(KiraError::InvalidConfig(format!(
            "unsupported schema_version {} (expected {SCHEMA_VERSION})",
            config.schema_version
        )));
    }
    if config.policy.max_results == 0 {
        return Err(KiraError::InvalidConfig(
            "max_results must be at least 1".to_string(),
        ));
    }
    if config.policy.sufficiency_threshold == 0 {
        return Err(KiraError::InvalidConfig(
            "sufficiency_threshold must be at least 1".to_string(),
        ));
    }
    if config.photo_sources.is_empty() {
        return Err(KiraError::InvalidConfig(
            "photo_sources must name at least one source".to_string(),
        ));
    }
    for (idx, kind) in config.photo_sources.iter().enumerate() {
        if kind.media_kind() != crate::domain::MediaKind::Photo {
            return Err(KiraError::InvalidConfig(format!(
                "{kind} is not a photo source"
            )));
        }
        if config.photo_sources[..idx].contains(kind) {
            return Err(KiraError::InvalidConfig(format!(
                "{kind} is listed twice in photo_sources"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let resolved = ConfigLoader::resolve_config(Config::default(), |_| None).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.policy, AggregationPolicy::default());
        assert_eq!(resolved.photo_sources, default_photo_sources());
        assert_eq!(resolved.cooldown, Duration::from_secs(10));
        assert_eq!(resolved.ala.min_interval, Duration::from_millis(200));
        assert_eq!(resolved.xeno_canto.api_key, None);
        assert_eq!(
            resolved.xeno_canto.api_key_env.as_deref(),
            Some(DEFAULT_XENO_CANTO_KEY_ENV)
        );
    }

    #[test]
    fn api_key_comes_from_named_env_var() {
        let config: Config = serde_json::from_str(
            r#"{"sources": {"xeno-canto": {"api_key_env": "MY_XC_KEY"}}}"#,
        )
        .unwrap();
        let resolved = ConfigLoader::resolve_config(config, |name| {
            (name == "MY_XC_KEY").then(|| " secret ".to_string())
        })
        .unwrap();
        assert_eq!(resolved.xeno_canto.api_key.as_deref(), Some("secret"));
    }
}
