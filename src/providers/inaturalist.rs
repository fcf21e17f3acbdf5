use serde_json::Value;
use tracing::debug;

use crate::domain::{CandidateMedia, SourceKind, Subject};
use crate::error::KiraError;
use crate::license::normalize;
use crate::providers::{MediaSource, SourceRequester, build_query_url, scalar_field, str_field};

const API_BASE: &str = "https://api.inaturalist.org/v1";
const OBSERVATION_PAGE: &str = "https://www.inaturalist.org/observations";

pub struct InaturalistSource {
    requester: SourceRequester,
    place_id: Option<u64>,
}

impl InaturalistSource {
    pub fn new(requester: SourceRequester, place_id: Option<u64>) -> Self {
        Self {
            requester,
            place_id,
        }
    }

    pub fn taxa_url(subject: &Subject) -> String {
        build_query_url(
            &format!("{API_BASE}/taxa"),
            &[
                ("q", subject.scientific_name.as_str().to_string()),
                ("rank", "species".to_string()),
            ],
        )
    }

    pub fn observations_url(&self, taxon_id: &str, max_results: usize) -> String {
        let mut params = vec![
            ("taxon_id", taxon_id.to_string()),
            ("photos", "true".to_string()),
            ("quality_grade", "research".to_string()),
            ("per_page", max_results.to_string()),
        ];
        if let Some(place_id) = self.place_id {
            params.push(("place_id", place_id.to_string()));
        }
        build_query_url(&format!("{API_BASE}/observations"), &params)
    }
}

impl MediaSource for InaturalistSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Inaturalist
    }

    fn search(
        &self,
        subject: &Subject,
        max_results: usize,
    ) -> Result<Vec<CandidateMedia>, KiraError> {
        let taxa = self.requester.get_json(&Self::taxa_url(subject))?;
        let Some(taxon_id) = first_taxon_id(&taxa) else {
            debug!(subject = %subject.scientific_name, "no iNaturalist taxon");
            return Ok(Vec::new());
        };
        let observations = self
            .requester
            .get_json(&self.observations_url(&taxon_id, max_results))?;
        parse_observations(&observations)
    }
}

pub fn first_taxon_id(raw: &Value) -> Option<String> {
    raw.get("results")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|taxon| scalar_field(taxon, "id"))
}

/// One photo per observation: the first whose license code is usable.
pub fn parse_observations(raw: &Value) -> Result<Vec<CandidateMedia>, KiraError> {
    let observations = match raw.get("results") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(KiraError::SourceParse {
                provider: SourceKind::Inaturalist,
                message: "results is not an array".to_string(),
            });
        }
    };

    let mut media = Vec::new();
    for obs in observations {
        let photos = obs
            .get("photos")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let chosen = photos.iter().find(|photo| {
            str_field(photo, "url").is_some()
                && str_field(photo, "license_code")
                    .map(|code| normalize(code, SourceKind::Inaturalist).is_acceptable())
                    .unwrap_or(false)
        });
        let Some(photo) = chosen else {
            continue;
        };
        let (Some(url), Some(code)) = (str_field(photo, "url"), str_field(photo, "license_code"))
        else {
            continue;
        };

        let mut candidate =
            CandidateMedia::new(SourceKind::Inaturalist, url.replace("square", "large"), code);
        let observation_id = scalar_field(obs, "id");
        candidate.page_url = observation_id
            .as_ref()
            .map(|id| format!("{OBSERVATION_PAGE}/{id}"));
        candidate.attribution = str_field(photo, "attribution").map(str::to_string);
        if let Some(id) = observation_id {
            candidate.extra.insert("observationId".to_string(), id);
        }
        media.push(candidate);
    }
    Ok(media)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::pacing::Pacer;
    use crate::pacing::testing::FakeClock;
    use crate::providers::DEFAULT_COOLDOWN;
    use crate::providers::testing::ScriptedTransport;

    fn source(transport: Arc<ScriptedTransport>, place_id: Option<u64>) -> InaturalistSource {
        let pacer = Arc::new(Pacer::new(
            SourceKind::Inaturalist,
            Duration::from_secs(1),
            Arc::new(FakeClock::new()),
        ));
        InaturalistSource::new(
            SourceRequester::new(SourceKind::Inaturalist, transport, pacer, DEFAULT_COOLDOWN),
            place_id,
        )
    }

    fn subject() -> Subject {
        Subject {
            scientific_name: "Cacatua galerita".parse().unwrap(),
            common_name: "Sulphur-crested Cockatoo".to_string(),
            existing_media_count: 1,
        }
    }

    #[test]
    fn picks_first_usable_photo_per_observation() {
        let raw = json!({"results": [
            {"id": 11, "photos": [
                {"url": "https://static.inaturalist.org/photos/1/square.jpg", "license_code": "cc-by-nd"},
                {"url": "https://static.inaturalist.org/photos/2/square.jpg", "license_code": "cc-by-nc", "attribution": "(c) someone, some rights reserved (CC BY-NC)"},
                {"url": "https://static.inaturalist.org/photos/3/square.jpg", "license_code": "cc0"}
            ]},
            {"id": 12, "photos": [
                {"url": "https://static.inaturalist.org/photos/4/square.jpg", "license_code": null}
            ]},
            {"id": 13}
        ]});

        let media = parse_observations(&raw).unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].url, "https://static.inaturalist.org/photos/2/large.jpg");
        assert_eq!(media[0].raw_license, "cc-by-nc");
        assert_eq!(
            media[0].page_url.as_deref(),
            Some("https://www.inaturalist.org/observations/11")
        );
        assert_eq!(media[0].extra["observationId"], "11");
    }

    #[test]
    fn looks_up_taxon_before_observations() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            (200, r#"{"results": [{"id": 145303, "name": "Cacatua galerita"}]}"#),
            (
                200,
                r#"{"results": [{"id": 7, "photos": [{"url": "https://x/square.jpg", "license_code": "cc-by"}]}]}"#,
            ),
        ]));
        let media = source(transport.clone(), Some(6744))
            .search(&subject(), 5)
            .unwrap();

        assert_eq!(media.len(), 1);
        let urls = transport.requests();
        assert!(urls[0].contains("/taxa?q=Cacatua%20galerita&rank=species"));
        assert!(urls[1].contains("taxon_id=145303"));
        assert!(urls[1].contains("per_page=5"));
        assert!(urls[1].contains("place_id=6744"));
    }

    #[test]
    fn unknown_taxon_stops_early() {
        let transport = Arc::new(ScriptedTransport::new(vec![(200, r#"{"results": []}"#)]));
        let media = source(transport.clone(), None).search(&subject(), 5).unwrap();
        assert!(media.is_empty());
        assert_eq!(transport.requests().len(), 1);
    }
}
