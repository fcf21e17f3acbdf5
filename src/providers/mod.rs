pub mod ala;
pub mod inaturalist;
pub mod wikimedia;
pub mod xeno_canto;

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{CandidateMedia, SourceKind, Subject};
use crate::error::KiraError;
use crate::pacing::Pacer;

pub use ala::AlaSource;
pub use inaturalist::InaturalistSource;
pub use wikimedia::WikimediaSource;
pub use xeno_canto::XenoCantoSource;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

pub trait MediaSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn search(
        &self,
        subject: &Subject,
        max_results: usize,
    ) -> Result<Vec<CandidateMedia>, KiraError>;
}

#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

pub trait HttpTransport: Send + Sync {
    fn get(&self, provider: SourceKind, url: &str) -> Result<HttpReply, KiraError>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-ma/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::HttpClient(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| KiraError::HttpClient(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, provider: SourceKind, url: &str) -> Result<HttpReply, KiraError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| KiraError::SourceNetwork {
                provider,
                message: err.to_string(),
            })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|err| KiraError::SourceNetwork {
            provider,
            message: err.to_string(),
        })?;
        Ok(HttpReply { status, body })
    }
}

#[derive(Clone)]
pub struct SourceRequester {
    provider: SourceKind,
    transport: Arc<dyn HttpTransport>,
    pacer: Arc<Pacer>,
    cooldown: Duration,
}

impl SourceRequester {
    pub fn new(
        provider: SourceKind,
        transport: Arc<dyn HttpTransport>,
        pacer: Arc<Pacer>,
        cooldown: Duration,
    ) -> Self {
        Self {
            provider,
            transport,
            pacer,
            cooldown,
        }
    }

    pub fn get_json(&self, url: &str) -> Result<Value, KiraError> {
        let mut reply = self.send_paced(url)?;
        if reply.status == 429 {
            warn!(
                source = %self.provider,
                cooldown_secs = self.cooldown.as_secs(),
                "rate limited, cooling down before retry"
            );
            self.pacer.pause(self.cooldown);
            reply = self.send_paced(url)?;
            if reply.status == 429 {
                return Err(KiraError::RateLimited {
                    provider: self.provider,
                });
            }
        }

        if !(200..300).contains(&reply.status) {
            return Err(KiraError::SourceStatus {
                provider: self.provider,
                status: reply.status,
                message: truncate_message(&reply.body),
            });
        }

        serde_json::from_str(&reply.body).map_err(|err| KiraError::SourceParse {
            provider: self.provider,
            message: err.to_string(),
        })
    }

    fn send_paced(&self, url: &str) -> Result<HttpReply, KiraError> {
        self.pacer.acquire();
        debug!(source = %self.provider, url, "request");
        self.transport.get(self.provider, url)
    }
}

fn truncate_message(body: &str) -> String {
    const LIMIT: usize = 200;
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "request failed".to_string();
    }
    match trimmed.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

pub(crate) fn encode_url_component(value: &str) -> String {
    let mut out = String::new();
    for byte in value.as_bytes() {
        let ch = *byte as char;
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' || ch == '~' {
            out.push(ch);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Keys may repeat (ALA takes several `fq` filters).
pub(crate) fn build_query_url(base: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return base.to_string();
    }
    let mut out = String::from(base);
    out.push('?');
    for (idx, (key, value)) in params.iter().enumerate() {
        if idx > 0 {
            out.push('&');
        }
        out.push_str(&encode_url_component(key));
        out.push('=');
        out.push_str(&encode_url_component(value));
    }
    out
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub(crate) fn scalar_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<HttpReply, KiraError>>>,
        pub urls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new(replies: Vec<(u16, &str)>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|(status, body)| {
                            Ok(HttpReply {
                                status,
                                body: body.to_string(),
                            })
                        })
                        .collect(),
                ),
                urls: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn get(&self, provider: SourceKind, url: &str) -> Result<HttpReply, KiraError> {
            self.urls.lock().unwrap().push(url.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(KiraError::SourceNetwork {
                        provider,
                        message: "no scripted reply".to_string(),
                    })
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::testing::ScriptedTransport;
    use super::*;
    use crate::pacing::testing::FakeClock;

    fn requester(transport: Arc<ScriptedTransport>, clock: Arc<FakeClock>) -> SourceRequester {
        let pacer = Arc::new(Pacer::new(
            SourceKind::Ala,
            Duration::from_millis(200),
            clock,
        ));
        SourceRequester::new(SourceKind::Ala, transport, pacer, DEFAULT_COOLDOWN)
    }

    #[test]
    fn retries_once_after_rate_limit() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            (429, "slow down"),
            (200, r#"{"ok": true}"#),
        ]));
        let clock = Arc::new(FakeClock::new());
        let value = requester(transport.clone(), clock.clone())
            .get_json("https://example.org/a")
            .unwrap();

        assert_eq!(value["ok"], Value::Bool(true));
        assert_eq!(transport.requests().len(), 2);
        assert!(clock.sleeps.lock().unwrap().contains(&DEFAULT_COOLDOWN));
    }

    #[test]
    fn second_rate_limit_is_an_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![(429, ""), (429, ""), (200, "{}")]));
        let clock = Arc::new(FakeClock::new());
        let err = requester(transport.clone(), clock)
            .get_json("https://example.org/a")
            .unwrap_err();
        assert_matches!(err, KiraError::RateLimited { provider: SourceKind::Ala });
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn server_errors_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![(503, "down"), (200, "{}")]));
        let err = requester(transport.clone(), Arc::new(FakeClock::new()))
            .get_json("https://example.org/a")
            .unwrap_err();
        assert_matches!(err, KiraError::SourceStatus { status: 503, .. });
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn malformed_body_is_parse_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![(200, "<html>")]));
        let err = requester(transport, Arc::new(FakeClock::new()))
            .get_json("https://example.org/a")
            .unwrap_err();
        assert_matches!(err, KiraError::SourceParse { .. });
    }

    #[test]
    fn query_url_encodes_repeated_keys() {
        let url = build_query_url(
            "https://example.org/search",
            &[
                ("q", "scientificName:\"Malurus cyaneus\"".to_string()),
                ("fq", "multimedia:Image".to_string()),
                ("fq", "geospatial_kosher:true".to_string()),
            ],
        );
        assert_eq!(
            url,
            "https://example.org/search?q=scientificName%3A%22Malurus%20cyaneus%22&fq=multimedia%3AImage&fq=geospatial_kosher%3Atrue"
        );
    }
}
