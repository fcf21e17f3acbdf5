use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{AggregationPolicy, Aggregator, SubjectMediaResult};
use crate::catalogue::{AggregateStatistics, CatalogueStore, SubjectScan};
use crate::config::ResolvedConfig;
use crate::domain::{MediaKind, SourceKind};
use crate::error::KiraError;
use crate::pacing::{Clock, Pacer};
use crate::providers::{
    AlaSource, HttpTransport, InaturalistSource, MediaSource, SourceRequester, WikimediaSource,
    XenoCantoSource,
};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub below: Option<usize>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct DisabledSource {
    pub source: SourceKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewEntry {
    pub scientific_name: String,
    pub common_name: String,
    pub existing_media_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnknownLicenseEntry {
    pub scientific_name: String,
    pub source: SourceKind,
    pub raw_license: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceErrorEntry {
    pub scientific_name: String,
    pub source: SourceKind,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub media_kind: MediaKind,
    pub started_at: String,
    pub finished_at: String,
    pub sources: Vec<SourceKind>,
    pub disabled_sources: Vec<DisabledSource>,
    pub policy: AggregationPolicy,
    pub subjects_total: usize,
    pub subjects_processed: usize,
    pub subjects_with_media: usize,
    pub media_total: usize,
    pub average_media_per_subject: f64,
    pub source_calls: usize,
    pub manual_review: Vec<ReviewEntry>,
    pub unknown_licenses: Vec<UnknownLicenseEntry>,
    pub source_errors: Vec<SourceErrorEntry>,
    pub cancelled: bool,
    pub written: bool,
    pub statistics: Option<AggregateStatistics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResult {
    pub catalogue: String,
    pub statistics: AggregateStatistics,
    pub written: bool,
}

pub struct SourceSet {
    pub sources: Vec<Box<dyn MediaSource>>,
    pub disabled: Vec<DisabledSource>,
}

impl SourceSet {
    pub fn build(
        config: &ResolvedConfig,
        kind: MediaKind,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let order = match kind {
            MediaKind::Photo => config.photo_sources.clone(),
            MediaKind::Audio => vec![SourceKind::XenoCanto],
        };

        let mut sources: Vec<Box<dyn MediaSource>> = Vec::new();
        let mut disabled = Vec::new();
        for source in order {
            let settings = config.source(source);
            let pacer = Arc::new(Pacer::new(source, settings.min_interval, clock.clone()));
            let requester =
                SourceRequester::new(source, transport.clone(), pacer, config.cooldown);
            let built: Result<Box<dyn MediaSource>, KiraError> = match source {
                SourceKind::Wikimedia => Ok(Box::new(WikimediaSource::new(requester))),
                SourceKind::Ala => Ok(Box::new(AlaSource::new(requester, settings.state.clone()))),
                SourceKind::Inaturalist => Ok(Box::new(InaturalistSource::new(
                    requester,
                    settings.place_id,
                ))),
                SourceKind::XenoCanto => match &settings.api_key {
                    Some(key) => Ok(Box::new(XenoCantoSource::new(requester, key.clone()))),
                    None => Err(KiraError::MissingCredential {
                        provider: source,
                        env: settings
                            .api_key_env
                            .clone()
                            .unwrap_or_else(|| "an API key".to_string()),
                    }),
                },
            };
            match built {
                Ok(adapter) => sources.push(adapter),
                Err(err) => {
                    warn!(source = %source, error = %err, "source disabled");
                    disabled.push(DisabledSource {
                        source,
                        reason: err.to_string(),
                    });
                }
            }
        }
        Self { sources, disabled }
    }

    pub fn aggregator(&self, policy: AggregationPolicy) -> Aggregator<'_> {
        Aggregator::new(self.sources.iter().map(|s| s.as_ref()).collect(), policy)
    }
}

#[derive(Debug, Clone)]
pub struct App {
    store: CatalogueStore,
}

impl App {
    pub fn new(store: CatalogueStore) -> Self {
        Self { store }
    }

    pub fn run(
        &self,
        kind: MediaKind,
        aggregator: &Aggregator<'_>,
        disabled: Vec<DisabledSource>,
        options: RunOptions,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RunSummary, KiraError> {
        let started_at = iso_timestamp();
        let catalogue = self.store.load()?;
        let subjects_total = catalogue.birds.len();

        let SubjectScan {
            mut subjects,
            mut rejected,
        } = catalogue.subjects(kind);
        if let Some(below) = options.below {
            subjects.retain(|subject| subject.existing_media_count < below);
            subjects.sort_by_key(|subject| subject.existing_media_count);
            rejected.retain(|entry| entry.existing_media_count < below);
        }
        for entry in &rejected {
            warn!(
                subject = %entry.scientific_name,
                reason = %entry.reason,
                "invalid scientific name, needs manual review"
            );
        }

        let total = subjects.len();
        let mut results: Vec<SubjectMediaResult> = Vec::with_capacity(total);
        let mut cancelled = false;
        for (idx, subject) in subjects.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            sink.event(ProgressEvent {
                message: format!(
                    "[{}/{}] {} ({})",
                    idx + 1,
                    total,
                    subject.common_name,
                    subject.scientific_name
                ),
                elapsed: None,
            });
            let start = std::time::Instant::now();
            let result = aggregator.aggregate(subject);
            if cancel.is_cancelled() {
                info!(subject = %subject.scientific_name, "cancelled, discarding in-flight subject");
                cancelled = true;
                break;
            }
            sink.event(ProgressEvent {
                message: format!("found {} {kind} item(s)", result.media.len()),
                elapsed: Some(start.elapsed()),
            });
            results.push(result);
        }

        let merged = catalogue.merge(kind, &results);
        let written = if options.dry_run {
            false
        } else {
            sink.event(ProgressEvent {
                message: format!("writing {}", self.store.path()),
                elapsed: None,
            });
            self.store.save(&merged)?;
            true
        };

        let mut tally = tally(&results);
        tally
            .manual_review
            .extend(rejected.into_iter().map(|entry| ReviewEntry {
                scientific_name: entry.scientific_name,
                common_name: entry.common_name,
                existing_media_count: entry.existing_media_count,
            }));
        let processed = results.len();
        let summary = RunSummary {
            media_kind: kind,
            started_at,
            finished_at: iso_timestamp(),
            sources: aggregator.sources().collect(),
            disabled_sources: disabled,
            policy: aggregator.policy(),
            subjects_total,
            subjects_processed: processed,
            subjects_with_media: tally.with_media,
            media_total: tally.media_total,
            average_media_per_subject: if processed == 0 {
                0.0
            } else {
                ((tally.media_total as f64 / processed as f64) * 100.0).round() / 100.0
            },
            source_calls: tally.source_calls,
            manual_review: tally.manual_review,
            unknown_licenses: tally.unknown_licenses,
            source_errors: tally.source_errors,
            cancelled,
            written,
            statistics: merged.statistics().cloned(),
        };
        info!(
            kind = %kind,
            processed = summary.subjects_processed,
            with_media = summary.subjects_with_media,
            review = summary.manual_review.len(),
            cancelled,
            "run finished"
        );
        Ok(summary)
    }

    pub fn refresh_statistics(&self, dry_run: bool) -> Result<StatsResult, KiraError> {
        let mut catalogue = self.store.load()?;
        catalogue.refresh_statistics();
        if !dry_run {
            self.store.save(&catalogue)?;
        }
        Ok(StatsResult {
            catalogue: self.store.path().to_string(),
            statistics: catalogue.statistics().cloned().unwrap_or_default(),
            written: !dry_run,
        })
    }
}

#[derive(Debug, Default)]
struct Tally {
    manual_review: Vec<ReviewEntry>,
    unknown_licenses: Vec<UnknownLicenseEntry>,
    source_errors: Vec<SourceErrorEntry>,
    source_calls: usize,
    media_total: usize,
    with_media: usize,
}

fn tally(results: &[SubjectMediaResult]) -> Tally {
    let mut tally = Tally::default();
    for result in results {
        let name = result.subject.scientific_name.to_string();
        tally.media_total += result.media.len();
        if result.needs_review() {
            tally.manual_review.push(ReviewEntry {
                scientific_name: name.clone(),
                common_name: result.subject.common_name.clone(),
                existing_media_count: result.subject.existing_media_count,
            });
        } else {
            tally.with_media += 1;
        }
        for attempt in &result.attempts {
            tally.source_calls += 1;
            let Some(source) = attempt.source else {
                continue;
            };
            for raw in &attempt.unknown_licenses {
                tally.unknown_licenses.push(UnknownLicenseEntry {
                    scientific_name: name.clone(),
                    source,
                    raw_license: raw.clone(),
                });
            }
            if let Some(error) = &attempt.error {
                tally.source_errors.push(SourceErrorEntry {
                    scientific_name: name.clone(),
                    source,
                    error: error.clone(),
                });
            }
        }
    }
    tally
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
