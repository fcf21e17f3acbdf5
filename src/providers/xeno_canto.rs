use serde_json::Value;

use crate::domain::{AudioQuality, CandidateMedia, SourceKind, Subject};
use crate::error::KiraError;
use crate::license::{LicenseFamily, normalize};
use crate::providers::{MediaSource, SourceRequester, build_query_url, scalar_field, str_field};

const RECORDINGS_API: &str = "https://xeno-canto.org/api/3/recordings";
const SITE: &str = "https://xeno-canto.org";
const MAX_DESCRIPTION_CHARS: usize = 200;

pub struct XenoCantoSource {
    requester: SourceRequester,
    api_key: String,
}

impl XenoCantoSource {
    pub fn new(requester: SourceRequester, api_key: String) -> Self {
        Self { requester, api_key }
    }

    pub fn recordings_url(&self, subject: &Subject) -> String {
        build_query_url(
            RECORDINGS_API,
            &[
                ("query", format!("sp:\"{}\"", subject.scientific_name)),
                ("key", self.api_key.clone()),
            ],
        )
    }
}

impl MediaSource for XenoCantoSource {
    fn kind(&self) -> SourceKind {
        SourceKind::XenoCanto
    }

    fn search(
        &self,
        subject: &Subject,
        max_results: usize,
    ) -> Result<Vec<CandidateMedia>, KiraError> {
        let response = self.requester.get_json(&self.recordings_url(subject))?;
        select_recordings(&response, max_results)
    }
}

// D/E are dropped before the license check; stops at `max_results` acceptable recordings.
pub fn select_recordings(raw: &Value, max_results: usize) -> Result<Vec<CandidateMedia>, KiraError> {
    if raw.get("error").is_some() {
        let message = str_field(raw, "message").unwrap_or("unknown error");
        return Err(KiraError::SourceApi {
            provider: SourceKind::XenoCanto,
            message: message.to_string(),
        });
    }
    let recordings = match raw.get("recordings") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(KiraError::SourceParse {
                provider: SourceKind::XenoCanto,
                message: "recordings is not an array".to_string(),
            });
        }
    };

    let mut ranked = recordings
        .iter()
        .map(|rec| {
            let quality = str_field(rec, "q")
                .map(AudioQuality::parse)
                .unwrap_or(AudioQuality::Unknown);
            (quality, rec)
        })
        .collect::<Vec<_>>();
    ranked.sort_by_key(|(quality, _)| *quality);

    let mut selected = Vec::new();
    for (quality, rec) in ranked {
        if selected.len() >= max_results {
            break;
        }
        if !quality.is_usable() {
            continue;
        }
        let license = str_field(rec, "lic").unwrap_or_default();
        let canonical = normalize(license, SourceKind::XenoCanto);
        if !canonical.is_acceptable() {
            continue;
        }
        let Some(file) = str_field(rec, "file") else {
            continue;
        };

        let mut candidate = CandidateMedia::new(SourceKind::XenoCanto, audio_url(file), license);
        candidate.quality = Some(quality);
        let recording_id = scalar_field(rec, "id");
        candidate.page_url = recording_id.as_ref().map(|id| format!("{SITE}/{id}"));
        if canonical.family != LicenseFamily::Cc0 {
            candidate.attribution = str_field(rec, "rec").map(str::to_string);
        }
        candidate.extra.insert(
            "type".to_string(),
            str_field(rec, "type").unwrap_or("unknown").to_string(),
        );
        candidate.extra.insert(
            "length".to_string(),
            str_field(rec, "length").unwrap_or("unknown").to_string(),
        );
        if let Some(id) = recording_id {
            candidate.extra.insert("recordingId".to_string(), id);
        }
        if let Some(remarks) = str_field(rec, "rmk")
            && remarks.chars().count() < MAX_DESCRIPTION_CHARS
        {
            candidate
                .extra
                .insert("description".to_string(), remarks.to_string());
        }
        selected.push(candidate);
    }
    Ok(selected)
}

fn audio_url(file: &str) -> String {
    if file.starts_with("https://") || file.starts_with("http://") {
        file.to_string()
    } else if let Some(rest) = file.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("{SITE}/{}", file.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn recording(id: u32, quality: &str, lic: &str) -> Value {
        json!({
            "id": id.to_string(),
            "q": quality,
            "lic": lic,
            "file": format!("https://xeno-canto.org/{id}/download"),
            "rec": "Recordist",
            "type": "song",
            "length": "0:42",
            "rmk": ""
        })
    }

    #[test]
    fn ranks_by_quality_and_drops_d_and_e() {
        let lic = "//creativecommons.org/licenses/by-nc-sa/4.0/";
        let raw = json!({"recordings": [
            recording(1, "E", lic),
            recording(2, "A", lic),
            recording(3, "D", lic),
            recording(4, "B", lic),
            recording(5, "A", lic),
        ]});

        let selected = select_recordings(&raw, 5).unwrap();
        let qualities = selected.iter().map(|c| c.quality).collect::<Vec<_>>();
        assert_eq!(
            qualities,
            vec![
                Some(AudioQuality::A),
                Some(AudioQuality::A),
                Some(AudioQuality::B)
            ]
        );
        let ids = selected
            .iter()
            .map(|c| c.extra["recordingId"].as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["2", "5", "4"]);
        for candidate in &selected {
            assert_eq!(
                normalize(&candidate.raw_license, SourceKind::XenoCanto).to_string(),
                "CC BY-NC-SA 4.0"
            );
        }
    }

    #[test]
    fn stops_once_enough_acceptable_recordings() {
        let raw = json!({"recordings": [
            recording(1, "A", "//creativecommons.org/licenses/by-nc-nd/4.0/"),
            recording(2, "A", "//creativecommons.org/licenses/by-sa/4.0/"),
            recording(3, "B", "//creativecommons.org/licenses/by/4.0/"),
            recording(4, "C", "//creativecommons.org/licenses/by/4.0/"),
        ]});
        let selected = select_recordings(&raw, 2).unwrap();
        let ids = selected
            .iter()
            .map(|c| c.extra["recordingId"].clone())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[test]
    fn unscored_recordings_rank_last() {
        let mut unscored = recording(1, "", "//creativecommons.org/licenses/by/4.0/");
        unscored["q"] = json!("no score");
        let raw = json!({"recordings": [
            unscored,
            recording(2, "C", "//creativecommons.org/licenses/by/4.0/"),
        ]});
        let selected = select_recordings(&raw, 5).unwrap();
        assert_eq!(selected[0].quality, Some(AudioQuality::C));
        assert_eq!(selected[1].quality, Some(AudioQuality::Unknown));
    }

    #[test]
    fn cc0_recordings_carry_no_attribution() {
        let raw = json!({"recordings": [
            recording(9, "A", "//creativecommons.org/publicdomain/zero/1.0/")
        ]});
        let selected = select_recordings(&raw, 5).unwrap();
        assert_eq!(selected[0].attribution, None);
        assert_eq!(selected[0].page_url.as_deref(), Some("https://xeno-canto.org/9"));
    }

    #[test]
    fn api_error_payload() {
        let raw = json!({"error": "client", "message": "Missing or invalid key"});
        assert!(matches!(
            select_recordings(&raw, 5),
            Err(KiraError::SourceApi { .. })
        ));
    }

    #[test]
    fn audio_url_forms() {
        assert_eq!(
            audio_url("https://xeno-canto.org/1/download"),
            "https://xeno-canto.org/1/download"
        );
        assert_eq!(
            audio_url("//xeno-canto.org/sounds/uploaded/a.mp3"),
            "https://xeno-canto.org/sounds/uploaded/a.mp3"
        );
        assert_eq!(
            audio_url("sounds/uploaded/a.mp3"),
            "https://xeno-canto.org/sounds/uploaded/a.mp3"
        );
    }
}
