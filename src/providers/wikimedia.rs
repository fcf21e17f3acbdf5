use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::domain::{CandidateMedia, SourceKind, Subject};
use crate::error::KiraError;
use crate::license::{LicenseFamily, normalize};
use crate::providers::{MediaSource, SourceRequester, build_query_url, str_field};

const COMMONS_API: &str = "https://commons.wikimedia.org/w/api.php";

static HTML_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid html tag regex"));

pub struct WikimediaSource {
    requester: SourceRequester,
}

impl WikimediaSource {
    pub fn new(requester: SourceRequester) -> Self {
        Self { requester }
    }

    pub fn search_url(subject: &Subject, max_results: usize) -> String {
        build_query_url(
            COMMONS_API,
            &[
                ("action", "query".to_string()),
                ("generator", "search".to_string()),
                ("gsrnamespace", "6".to_string()),
                ("gsrsearch", subject.scientific_name.as_str().to_string()),
                ("gsrlimit", max_results.to_string()),
                ("prop", "imageinfo".to_string()),
                ("iiprop", "url|extmetadata".to_string()),
                ("format", "json".to_string()),
            ],
        )
    }
}

impl MediaSource for WikimediaSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Wikimedia
    }

    fn search(
        &self,
        subject: &Subject,
        max_results: usize,
    ) -> Result<Vec<CandidateMedia>, KiraError> {
        let url = Self::search_url(subject, max_results);
        let response = self.requester.get_json(&url)?;
        parse_search_response(&response)
    }
}

pub fn parse_search_response(raw: &Value) -> Result<Vec<CandidateMedia>, KiraError> {
    if let Some(error) = raw.get("error") {
        let message = str_field(error, "info")
            .or_else(|| str_field(error, "code"))
            .unwrap_or("unknown error");
        return Err(KiraError::SourceApi {
            provider: SourceKind::Wikimedia,
            message: message.to_string(),
        });
    }

    // No "query" block means the search matched nothing.
    let Some(pages) = raw.get("query").and_then(|q| q.get("pages")) else {
        return Ok(Vec::new());
    };
    let Some(pages) = pages.as_object() else {
        return Err(KiraError::SourceParse {
            provider: SourceKind::Wikimedia,
            message: "query.pages is not an object".to_string(),
        });
    };

    // Page ids are map keys; the search rank lives in "index".
    let mut ordered = pages.values().collect::<Vec<_>>();
    ordered.sort_by_key(|page| page.get("index").and_then(Value::as_u64).unwrap_or(u64::MAX));

    let mut media = Vec::new();
    for page in ordered {
        let Some(infos) = page.get("imageinfo").and_then(Value::as_array) else {
            continue;
        };
        for info in infos {
            let Some(url) = str_field(info, "url") else {
                continue;
            };
            let meta = info.get("extmetadata");
            let license = meta
                .and_then(|m| m.get("LicenseShortName"))
                .and_then(|l| str_field(l, "value"))
                .unwrap_or_default();
            let artist = meta
                .and_then(|m| m.get("Artist"))
                .and_then(|a| str_field(a, "value"))
                .map(strip_html)
                .filter(|a| !a.is_empty());

            let mut candidate = CandidateMedia::new(SourceKind::Wikimedia, url, license);
            candidate.page_url = str_field(info, "descriptionurl").map(str::to_string);
            if normalize(license, SourceKind::Wikimedia).family != LicenseFamily::Cc0 {
                candidate.attribution = artist;
            }
            media.push(candidate);
        }
    }
    Ok(media)
}

fn strip_html(value: &str) -> String {
    HTML_TAG_RE.replace_all(value, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_pages_in_search_order() {
        let raw = json!({
            "query": {"pages": {
                "200": {"index": 2, "imageinfo": [{
                    "url": "https://upload.wikimedia.org/b.jpg",
                    "descriptionurl": "https://commons.wikimedia.org/wiki/File:B.jpg",
                    "extmetadata": {
                        "LicenseShortName": {"value": "CC BY-SA 4.0"},
                        "Artist": {"value": "<a href=\"//commons.wikimedia.org/wiki/User:JJ\">JJ Harrison</a>"}
                    }
                }]},
                "100": {"index": 1, "imageinfo": [{
                    "url": "https://upload.wikimedia.org/a.jpg",
                    "extmetadata": {
                        "LicenseShortName": {"value": "Public domain"},
                        "Artist": {"value": "Someone"}
                    }
                }]},
                "300": {"index": 3, "title": "File:NoInfo.jpg"}
            }}
        });

        let media = parse_search_response(&raw).unwrap();
        assert_eq!(media.len(), 2);
        assert_eq!(media[0].url, "https://upload.wikimedia.org/a.jpg");
        assert_eq!(media[0].attribution, None);
        assert_eq!(media[0].page_url, None);
        assert_eq!(media[1].raw_license, "CC BY-SA 4.0");
        assert_eq!(media[1].attribution.as_deref(), Some("JJ Harrison"));
        assert_eq!(
            media[1].page_url.as_deref(),
            Some("https://commons.wikimedia.org/wiki/File:B.jpg")
        );
    }

    #[test]
    fn missing_query_block_is_empty() {
        assert!(parse_search_response(&json!({"batchcomplete": ""})).unwrap().is_empty());
    }

    #[test]
    fn api_error_is_reported() {
        let raw = json!({"error": {"code": "badvalue", "info": "Unrecognized value"}});
        assert!(matches!(
            parse_search_response(&raw),
            Err(KiraError::SourceApi { .. })
        ));
    }

    #[test]
    fn search_url_targets_file_namespace() {
        let subject = Subject {
            scientific_name: "Malurus cyaneus".parse().unwrap(),
            common_name: "Superb Fairywren".to_string(),
            existing_media_count: 0,
        };
        let url = WikimediaSource::search_url(&subject, 5);
        assert!(url.starts_with(COMMONS_API));
        assert!(url.contains("gsrnamespace=6"));
        assert!(url.contains("gsrsearch=Malurus%20cyaneus"));
        assert!(url.contains("gsrlimit=5"));
        assert!(url.contains("iiprop=url%7Cextmetadata"));
    }
}
