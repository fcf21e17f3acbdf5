use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::SourceKind;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d+\.\d+)\b").expect("valid version regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LicenseFamily {
    #[serde(rename = "CC0")]
    Cc0,
    #[serde(rename = "CC-BY")]
    CcBy,
    #[serde(rename = "CC-BY-SA")]
    CcBySa,
    #[serde(rename = "CC-BY-NC")]
    CcByNc,
    #[serde(rename = "CC-BY-NC-SA")]
    CcByNcSa,
    Unacceptable,
    Unknown,
}

impl LicenseFamily {
    pub fn is_acceptable(&self) -> bool {
        !matches!(self, LicenseFamily::Unacceptable | LicenseFamily::Unknown)
    }

    fn label(&self) -> &'static str {
        match self {
            LicenseFamily::Cc0 => "CC0",
            LicenseFamily::CcBy => "CC BY",
            LicenseFamily::CcBySa => "CC BY-SA",
            LicenseFamily::CcByNc => "CC BY-NC",
            LicenseFamily::CcByNcSa => "CC BY-NC-SA",
            LicenseFamily::Unacceptable => "unacceptable",
            LicenseFamily::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalLicense {
    pub family: LicenseFamily,
    pub version: Option<String>,
}

impl CanonicalLicense {
    pub fn unacceptable() -> Self {
        Self {
            family: LicenseFamily::Unacceptable,
            version: None,
        }
    }

    pub fn unknown() -> Self {
        Self {
            family: LicenseFamily::Unknown,
            version: None,
        }
    }

    pub fn is_acceptable(&self) -> bool {
        self.family.is_acceptable()
    }
}

impl fmt::Display for CanonicalLicense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) if self.family.is_acceptable() => {
                write!(f, "{} {}", self.family.label(), version)
            }
            _ => write!(f, "{}", self.family.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qualifier {
    By,
    Nc,
    Sa,
    Zero,
}

/// Checked top to bottom; compound licenses must precede their prefixes.
const FAMILY_PRIORITY: &[(LicenseFamily, &[Qualifier])] = &[
    (
        LicenseFamily::CcByNcSa,
        &[Qualifier::By, Qualifier::Nc, Qualifier::Sa],
    ),
    (LicenseFamily::CcByNc, &[Qualifier::By, Qualifier::Nc]),
    (LicenseFamily::CcBySa, &[Qualifier::By, Qualifier::Sa]),
    (LicenseFamily::CcBy, &[Qualifier::By]),
    (LicenseFamily::Cc0, &[Qualifier::Zero]),
];

#[derive(Debug, Clone, Copy)]
struct Vocabulary {
    default_version: Option<&'static str>,
    /// Whether "Public domain" style markers count as CC0.
    public_domain_is_cc0: bool,
}

fn vocabulary(source: SourceKind) -> Vocabulary {
    match source {
        SourceKind::Wikimedia => Vocabulary {
            default_version: None,
            public_domain_is_cc0: true,
        },
        SourceKind::Ala | SourceKind::Inaturalist | SourceKind::XenoCanto => Vocabulary {
            default_version: Some("4.0"),
            public_domain_is_cc0: false,
        },
    }
}

#[derive(Debug, Default)]
struct Qualifiers {
    by: bool,
    nc: bool,
    sa: bool,
    nd: bool,
    zero: bool,
    public_domain: bool,
    reserved: bool,
}

impl Qualifiers {
    fn scan(raw: &str) -> Self {
        let lowered = raw.to_lowercase();
        let tokens = lowered
            .split(|ch: char| !ch.is_ascii_alphanumeric())
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>();

        let mut found = Qualifiers::default();
        for (idx, token) in tokens.iter().enumerate() {
            let next = tokens.get(idx + 1).copied();
            match *token {
                "by" | "attribution" => found.by = true,
                "nc" | "noncommercial" => found.nc = true,
                "sa" | "sharealike" => found.sa = true,
                "nd" | "noderivatives" | "noderivs" => found.nd = true,
                "no" if matches!(next, Some("derivatives" | "derivative" | "derivs")) => {
                    found.nd = true
                }
                "non" if next == Some("commercial") => found.nc = true,
                "share" if next == Some("alike") => found.sa = true,
                "cc0" | "zero" => found.zero = true,
                "pd" | "pdm" => found.public_domain = true,
                "public" if next == Some("domain") => found.public_domain = true,
                "reserved" if idx >= 1 && tokens[idx - 1] == "rights" => found.reserved = true,
                _ => {}
            }
        }

        // Plain prose ("used by permission") must not read as CC BY.
        if !has_cc_marker(&lowered, &tokens) {
            found.by = false;
            found.nc = false;
            found.sa = false;
            found.zero = false;
        }
        found
    }

    fn has(&self, qualifier: Qualifier) -> bool {
        match qualifier {
            Qualifier::By => self.by,
            Qualifier::Nc => self.nc,
            Qualifier::Sa => self.sa,
            Qualifier::Zero => self.zero,
        }
    }
}

fn has_cc_marker(lowered: &str, tokens: &[&str]) -> bool {
    lowered.contains("/licenses/")
        || tokens.first() == Some(&"by")
        || tokens.iter().enumerate().any(|(idx, token)| {
            matches!(*token, "cc" | "cc0" | "creativecommons")
                || (*token == "creative" && tokens.get(idx + 1) == Some(&"commons"))
        })
}

pub fn normalize(raw: &str, source: SourceKind) -> CanonicalLicense {
    let raw = raw.trim();
    if raw.is_empty() {
        return CanonicalLicense::unknown();
    }

    let vocab = vocabulary(source);
    let mut qualifiers = Qualifiers::scan(raw);
    if qualifiers.nd || qualifiers.reserved {
        return CanonicalLicense::unacceptable();
    }
    let public_domain_mark = qualifiers.public_domain
        && vocab.public_domain_is_cc0
        && !qualifiers.by
        && !qualifiers.zero;
    if public_domain_mark {
        qualifiers.zero = true;
    }

    let Some(family) = FAMILY_PRIORITY
        .iter()
        .find(|(_, required)| required.iter().all(|q| qualifiers.has(*q)))
        .map(|(family, _)| *family)
    else {
        return CanonicalLicense::unknown();
    };

    let explicit = VERSION_RE
        .captures(&raw.to_lowercase())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    let version = match family {
        // A PD marker is not a CC0 1.0 dedication.
        LicenseFamily::Cc0 if public_domain_mark => None,
        LicenseFamily::Cc0 => explicit.or_else(|| Some("1.0".to_string())),
        _ => explicit.or_else(|| vocab.default_version.map(str::to_string)),
    };

    CanonicalLicense { family, version }
}
