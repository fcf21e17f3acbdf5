use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::license::CanonicalLicense;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Wikimedia,
    Ala,
    Inaturalist,
    XenoCanto,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Wikimedia => "wikimedia",
            SourceKind::Ala => "ala",
            SourceKind::Inaturalist => "inaturalist",
            SourceKind::XenoCanto => "xeno-canto",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceKind::Wikimedia => "Wikimedia Commons",
            SourceKind::Ala => "Atlas of Living Australia",
            SourceKind::Inaturalist => "iNaturalist",
            SourceKind::XenoCanto => "Xeno-canto",
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        match self {
            SourceKind::Wikimedia | SourceKind::Ala | SourceKind::Inaturalist => MediaKind::Photo,
            SourceKind::XenoCanto => MediaKind::Audio,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "wikimedia" | "wikimedia-commons" | "commons" => Ok(SourceKind::Wikimedia),
            "ala" | "atlas-of-living-australia" => Ok(SourceKind::Ala),
            "inaturalist" | "inat" => Ok(SourceKind::Inaturalist),
            "xeno-canto" | "xenocanto" | "xc" => Ok(SourceKind::XenoCanto),
            _ => Err(KiraError::InvalidSource(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Photo => write!(f, "photo"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Xeno-canto recording quality. Declaration order is best-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AudioQuality {
    A,
    B,
    C,
    D,
    E,
    Unknown,
}

impl AudioQuality {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "A" | "a" => AudioQuality::A,
            "B" | "b" => AudioQuality::B,
            "C" | "c" => AudioQuality::C,
            "D" | "d" => AudioQuality::D,
            "E" | "e" => AudioQuality::E,
            _ => AudioQuality::Unknown,
        }
    }

    pub fn is_usable(&self) -> bool {
        !matches!(self, AudioQuality::D | AudioQuality::E)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioQuality::A => "A",
            AudioQuality::B => "B",
            AudioQuality::C => "C",
            AudioQuality::D => "D",
            AudioQuality::E => "E",
            AudioQuality::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScientificName(String);

impl ScientificName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScientificName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ScientificName {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_alphabetic() || ch == ' ' || ch == '-' || ch == '.');
        if !is_valid {
            return Err(KiraError::InvalidScientificName(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub scientific_name: ScientificName,
    pub common_name: String,
    pub existing_media_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMedia {
    pub url: String,
    pub page_url: Option<String>,
    pub source: SourceKind,
    pub raw_license: String,
    pub attribution: Option<String>,
    pub quality: Option<AudioQuality>,
    pub extra: BTreeMap<String, String>,
}

impl CandidateMedia {
    pub fn new(source: SourceKind, url: impl Into<String>, raw_license: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            page_url: None,
            source,
            raw_license: raw_license.into(),
            attribution: None,
            quality: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedMedia {
    pub media: CandidateMedia,
    pub license: CanonicalLicense,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_scientific_name_collapses_whitespace() {
        let name: ScientificName = "  Malurus   cyaneus ".parse().unwrap();
        assert_eq!(name.as_str(), "Malurus cyaneus");
    }

    #[test]
    fn parse_scientific_name_invalid() {
        let err = "Malurus 42".parse::<ScientificName>().unwrap_err();
        assert_matches!(err, KiraError::InvalidScientificName(_));
        assert!("".parse::<ScientificName>().is_err());
    }

    #[test]
    fn source_aliases() {
        assert_eq!("XC".parse::<SourceKind>().unwrap(), SourceKind::XenoCanto);
        assert_eq!("inat".parse::<SourceKind>().unwrap(), SourceKind::Inaturalist);
        assert_matches!(
            "flickr".parse::<SourceKind>(),
            Err(KiraError::InvalidSource(_))
        );
    }

    #[test]
    fn quality_ordering_is_best_first() {
        let mut qualities = vec![
            AudioQuality::Unknown,
            AudioQuality::E,
            AudioQuality::A,
            AudioQuality::C,
        ];
        qualities.sort();
        assert_eq!(
            qualities,
            vec![
                AudioQuality::A,
                AudioQuality::C,
                AudioQuality::E,
                AudioQuality::Unknown
            ]
        );
        assert_eq!(AudioQuality::parse("no score"), AudioQuality::Unknown);
        assert!(!AudioQuality::D.is_usable());
        assert!(AudioQuality::Unknown.is_usable());
    }
}
