use std::collections::HashSet;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{AcceptedMedia, SourceKind, Subject};
use crate::license::{LicenseFamily, normalize};
use crate::providers::MediaSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregationPolicy {
    pub max_results: usize,
    /// Stop consulting lower-priority sources once this many media are accepted.
    pub sufficiency_threshold: usize,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            max_results: 5,
            sufficiency_threshold: 2,
        }
    }
}

impl AggregationPolicy {
    pub fn is_sufficient(&self, accepted: usize) -> bool {
        accepted >= self.sufficiency_threshold || accepted >= self.max_results
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "source_index", rename_all = "snake_case")]
pub enum ChainState {
    Pending,
    Querying(usize),
    Sufficient,
    Exhausted,
}

impl ChainState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainState::Sufficient | ChainState::Exhausted)
    }
}

/// `Pending -> Querying(i) -> Sufficient | Exhausted`.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    state: ChainState,
    source_count: usize,
    policy: AggregationPolicy,
}

impl FallbackChain {
    pub fn new(source_count: usize, policy: AggregationPolicy) -> Self {
        Self {
            state: ChainState::Pending,
            source_count,
            policy,
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn advance(&mut self, accepted: usize) -> ChainState {
        self.state = match self.state {
            ChainState::Sufficient | ChainState::Exhausted => self.state,
            _ if self.policy.is_sufficient(accepted) => ChainState::Sufficient,
            ChainState::Pending if self.source_count == 0 => ChainState::Exhausted,
            ChainState::Pending => ChainState::Querying(0),
            ChainState::Querying(idx) if idx + 1 < self.source_count => {
                ChainState::Querying(idx + 1)
            }
            ChainState::Querying(_) => ChainState::Exhausted,
        };
        self.state
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceAttempt {
    pub source: Option<SourceKind>,
    pub returned: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub unacceptable: usize,
    pub unknown_licenses: Vec<String>,
    pub error: Option<String>,
    pub latency_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectMediaResult {
    pub subject: Subject,
    pub media: Vec<AcceptedMedia>,
    pub attempts: Vec<SourceAttempt>,
    pub final_state: ChainState,
}

impl SubjectMediaResult {
    pub fn needs_review(&self) -> bool {
        self.media.is_empty()
    }
}

pub struct Aggregator<'a> {
    sources: Vec<&'a dyn MediaSource>,
    policy: AggregationPolicy,
}

impl<'a> Aggregator<'a> {
    pub fn new(sources: Vec<&'a dyn MediaSource>, policy: AggregationPolicy) -> Self {
        Self { sources, policy }
    }

    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    pub fn sources(&self) -> impl Iterator<Item = SourceKind> + '_ {
        self.sources.iter().map(|source| source.kind())
    }

    pub fn aggregate(&self, subject: &Subject) -> SubjectMediaResult {
        let mut accepted: Vec<AcceptedMedia> = Vec::new();
        let mut seen_urls = HashSet::new();
        let mut attempts = Vec::new();
        let mut chain = FallbackChain::new(self.sources.len(), self.policy);

        while let ChainState::Querying(idx) = chain.advance(accepted.len()) {
            let source = self.sources[idx];
            let kind = source.kind();
            let mut attempt = SourceAttempt {
                source: Some(kind),
                ..SourceAttempt::default()
            };

            let start = Instant::now();
            let candidates = match source.search(subject, self.policy.max_results) {
                Ok(candidates) => candidates,
                Err(err) => {
                    warn!(source = %kind, subject = %subject.scientific_name, error = %err, "source failed");
                    attempt.error = Some(err.to_string());
                    Vec::new()
                }
            };
            attempt.latency_ms = start.elapsed().as_millis();
            attempt.returned = candidates.len();

            for candidate in candidates {
                if seen_urls.contains(&candidate.url) {
                    attempt.duplicates += 1;
                    continue;
                }
                let license = normalize(&candidate.raw_license, candidate.source);
                match license.family {
                    LicenseFamily::Unacceptable => {
                        attempt.unacceptable += 1;
                        continue;
                    }
                    LicenseFamily::Unknown => {
                        attempt.unknown_licenses.push(candidate.raw_license.clone());
                        continue;
                    }
                    _ => {}
                }
                seen_urls.insert(candidate.url.clone());
                accepted.push(AcceptedMedia {
                    media: candidate,
                    license,
                });
                attempt.accepted += 1;
            }

            debug!(
                source = %kind,
                subject = %subject.scientific_name,
                returned = attempt.returned,
                accepted = attempt.accepted,
                "source done"
            );
            attempts.push(attempt);
        }

        accepted.truncate(self.policy.max_results);
        let result = SubjectMediaResult {
            subject: subject.clone(),
            media: accepted,
            attempts,
            final_state: chain.state(),
        };
        if result.needs_review() {
            info!(subject = %subject.scientific_name, "no usable media, needs manual review");
        }
        result
    }
}
