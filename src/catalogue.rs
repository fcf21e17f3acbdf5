use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::aggregate::SubjectMediaResult;
use crate::domain::{AcceptedMedia, MediaKind, ScientificName, Subject};
use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalogue {
    pub birds: Vec<CatalogueEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<StatisticsBlock>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogueEntry {
    pub scientific_name: String,
    pub common_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photos: Option<Vec<MediaRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Vec<MediaRecord>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogueEntry {
    pub fn media(&self, kind: MediaKind) -> &[MediaRecord] {
        let field = match kind {
            MediaKind::Photo => &self.photos,
            MediaKind::Audio => &self.audio,
        };
        field.as_deref().unwrap_or_default()
    }

    fn media_mut(&mut self, kind: MediaKind) -> &mut Option<Vec<MediaRecord>> {
        match kind {
            MediaKind::Photo => &mut self.photos,
            MediaKind::Audio => &mut self.audio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    pub source: String,
    pub licence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_licence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl From<&AcceptedMedia> for MediaRecord {
    fn from(value: &AcceptedMedia) -> Self {
        let media = &value.media;
        Self {
            url: media.url.clone(),
            page_url: media.page_url.clone(),
            source: media.source.display_name().to_string(),
            licence: value.license.to_string(),
            raw_licence: Some(media.raw_license.clone()),
            attribution: media.attribution.clone(),
            quality: media.quality.map(|q| q.as_str().to_string()),
            extra: media
                .extra
                .iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsBlock {
    #[serde(flatten)]
    pub media: AggregateStatistics,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AggregateStatistics {
    pub total_birds: usize,
    pub birds_with_photos: usize,
    pub birds_without_photos: usize,
    pub total_photos: usize,
    pub average_photos_per_bird: f64,
    pub birds_with_audio: usize,
    pub birds_without_audio: usize,
    pub total_audio: usize,
    pub average_audio_per_bird: f64,
}

impl AggregateStatistics {
    pub fn compute(entries: &[CatalogueEntry]) -> Self {
        let mut stats = entries.iter().fold(Self::default(), |mut acc, entry| {
            let photos = entry.media(MediaKind::Photo).len();
            let audio = entry.media(MediaKind::Audio).len();
            acc.total_birds += 1;
            acc.total_photos += photos;
            acc.total_audio += audio;
            if photos > 0 {
                acc.birds_with_photos += 1;
            }
            if audio > 0 {
                acc.birds_with_audio += 1;
            }
            acc
        });
        stats.birds_without_photos = stats.total_birds - stats.birds_with_photos;
        stats.birds_without_audio = stats.total_birds - stats.birds_with_audio;
        stats.average_photos_per_bird = average(stats.total_photos, stats.total_birds);
        stats.average_audio_per_bird = average(stats.total_audio, stats.total_birds);
        stats
    }
}

fn average(total: usize, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    ((total as f64 / count as f64) * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Default)]
pub struct SubjectScan {
    pub subjects: Vec<Subject>,
    pub rejected: Vec<RejectedEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedEntry {
    pub scientific_name: String,
    pub common_name: String,
    pub existing_media_count: usize,
    pub reason: String,
}

impl Catalogue {
    pub fn subjects(&self, kind: MediaKind) -> SubjectScan {
        let mut scan = SubjectScan::default();
        for entry in &self.birds {
            let existing_media_count = entry.media(kind).len();
            match entry.scientific_name.parse::<ScientificName>() {
                Ok(scientific_name) => scan.subjects.push(Subject {
                    scientific_name,
                    common_name: entry.common_name.clone(),
                    existing_media_count,
                }),
                Err(err) => scan.rejected.push(RejectedEntry {
                    scientific_name: entry.scientific_name.clone(),
                    common_name: entry.common_name.clone(),
                    existing_media_count,
                    reason: err.to_string(),
                }),
            }
        }
        scan
    }

    pub fn statistics(&self) -> Option<&AggregateStatistics> {
        self.statistics.as_ref().map(|block| &block.media)
    }

    pub fn merge(mut self, kind: MediaKind, results: &[SubjectMediaResult]) -> Self {
        let by_name = results
            .iter()
            .map(|result| (result.subject.scientific_name.as_str(), result))
            .collect::<BTreeMap<_, _>>();

        for entry in &mut self.birds {
            let key = entry
                .scientific_name
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            if let Some(result) = by_name.get(key.as_str()) {
                *entry.media_mut(kind) =
                    Some(result.media.iter().map(MediaRecord::from).collect());
            }
        }

        self.refresh_statistics();
        self
    }

    pub fn refresh_statistics(&mut self) {
        let media = AggregateStatistics::compute(&self.birds);
        let extra = self
            .statistics
            .take()
            .map(|block| block.extra)
            .unwrap_or_default();
        self.statistics = Some(StatisticsBlock { media, extra });
    }
}

#[derive(Debug, Clone)]
pub struct CatalogueStore {
    path: Utf8PathBuf,
}

impl CatalogueStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn load(&self) -> Result<Catalogue, KiraError> {
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", self.path)))?;
        serde_json::from_str(&content).map_err(|err| KiraError::CatalogueParse {
            path: self.path.to_string(),
            message: err.to_string(),
        })
    }

    pub fn save(&self, catalogue: &Catalogue) -> Result<(), KiraError> {
        let mut content = serde_json::to_vec_pretty(catalogue)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        content.push(b'\n');
        write_bytes_atomic(&self.path, &content)
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".kira-ma")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    std::io::Write::write_all(&mut temp, content)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(())
}
