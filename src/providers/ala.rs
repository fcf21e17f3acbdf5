use serde_json::Value;

use crate::domain::{CandidateMedia, SourceKind, Subject};
use crate::error::KiraError;
use crate::providers::{MediaSource, SourceRequester, build_query_url, str_field};

const BIOCACHE_SEARCH: &str = "https://biocache-ws.ala.org.au/ws/occurrences/search";
const OCCURRENCE_PAGE: &str = "https://biocache.ala.org.au/occurrences";

pub struct AlaSource {
    requester: SourceRequester,
    state: Option<String>,
}

impl AlaSource {
    pub fn new(requester: SourceRequester, state: Option<String>) -> Self {
        Self { requester, state }
    }

    pub fn search_url(&self, subject: &Subject, max_results: usize) -> String {
        let mut params = vec![
            (
                "q",
                format!("scientificName:\"{}\"", subject.scientific_name),
            ),
            ("fq", "multimedia:Image".to_string()),
            ("fq", "geospatial_kosher:true".to_string()),
        ];
        if let Some(state) = &self.state {
            params.push(("fq", format!("state:\"{state}\"")));
        }
        params.push(("pageSize", max_results.to_string()));
        params.push(("startIndex", "0".to_string()));
        build_query_url(BIOCACHE_SEARCH, &params)
    }
}

impl MediaSource for AlaSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Ala
    }

    fn search(
        &self,
        subject: &Subject,
        max_results: usize,
    ) -> Result<Vec<CandidateMedia>, KiraError> {
        let url = self.search_url(subject, max_results);
        let response = self.requester.get_json(&url)?;
        parse_occurrences(&response)
    }
}

pub fn parse_occurrences(raw: &Value) -> Result<Vec<CandidateMedia>, KiraError> {
    let occurrences = match raw.get("occurrences") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(KiraError::SourceParse {
                provider: SourceKind::Ala,
                message: "occurrences is not an array".to_string(),
            });
        }
    };

    let mut media = Vec::new();
    for occ in occurrences {
        let Some(url) = str_field(occ, "imageUrl").or_else(|| str_field(occ, "largeImageUrl"))
        else {
            continue;
        };
        let license = str_field(occ, "license")
            .or_else(|| str_field(occ, "licence"))
            .unwrap_or_default();
        let record_id = str_field(occ, "uuid");

        let mut candidate = CandidateMedia::new(SourceKind::Ala, url, license);
        candidate.page_url = record_id.map(|id| format!("{OCCURRENCE_PAGE}/{id}"));
        candidate.attribution = str_field(occ, "creator")
            .or_else(|| str_field(occ, "rightsHolder"))
            .map(str::to_string);
        candidate.extra.insert(
            "dataResource".to_string(),
            str_field(occ, "dataResourceName")
                .unwrap_or("Atlas of Living Australia")
                .to_string(),
        );
        if let Some(id) = record_id {
            candidate.extra.insert("recordId".to_string(), id.to_string());
        }
        media.push(candidate);
    }
    Ok(media)
}
