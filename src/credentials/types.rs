use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ladder::normalize;

/// The three kinds of evidence a promotion can be funded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Publication,
    Evaluation,
    Training,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::Publication => write!(f, "publication"),
            CredentialKind::Evaluation => write!(f, "evaluation"),
            CredentialKind::Training => write!(f, "training"),
        }
    }
}

/// Ledger key of a credential. Ids are only unique within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CredentialKey {
    pub kind: CredentialKind,
    pub id: u64,
}

impl CredentialKey {
    pub fn new(kind: CredentialKind, id: u64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// A published relevant work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub id: u64,
    pub faculty_id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub date: NaiveDate,
    pub affiliation: String,
}

/// One academic-period performance evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: u64,
    pub faculty_id: String,
    /// Display label of the period, e.g. `"2023-1"`.
    pub period: String,
    pub year: i32,
    pub term: u8,
    pub score_obtained: f64,
    pub score_max: f64,
}

impl Evaluation {
    /// Score as a percentage of the maximum; zero when the maximum is not positive.
    pub fn percentage(&self) -> f64 {
        if self.score_max > 0.0 {
            self.score_obtained / self.score_max * 100.0
        } else {
            0.0
        }
    }

    pub fn period_key(&self) -> (i32, u8) {
        (self.year, self.term)
    }
}

/// A completed training course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Training {
    pub id: u64,
    pub faculty_id: String,
    #[serde(default)]
    pub title: String,
    pub hours: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub is_pedagogical: bool,
    /// Academic authority role held for at least two years.
    #[serde(default)]
    pub has_authority_exemption: bool,
}

/// Any credential, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "credential_type", rename_all = "snake_case")]
pub enum Credential {
    Publication(Publication),
    Evaluation(Evaluation),
    Training(Training),
}

impl Credential {
    pub fn kind(&self) -> CredentialKind {
        match self {
            Credential::Publication(_) => CredentialKind::Publication,
            Credential::Evaluation(_) => CredentialKind::Evaluation,
            Credential::Training(_) => CredentialKind::Training,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Credential::Publication(p) => p.id,
            Credential::Evaluation(e) => e.id,
            Credential::Training(t) => t.id,
        }
    }

    pub fn key(&self) -> CredentialKey {
        CredentialKey::new(self.kind(), self.id())
    }

    pub fn faculty_id(&self) -> &str {
        match self {
            Credential::Publication(p) => &p.faculty_id,
            Credential::Evaluation(e) => &e.faculty_id,
            Credential::Training(t) => &t.faculty_id,
        }
    }
}

/// Decides whether a publication's affiliation names the institution.
///
/// The full institution name matches as a substring; short aliases such as
/// `UTA` must appear as a whole word, so `"Computación"` is not mistaken for
/// the acronym.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffiliationMatcher {
    institution: String,
    aliases: Vec<String>,
}

impl AffiliationMatcher {
    pub fn new(institution: &str, aliases: &[String]) -> Self {
        Self {
            institution: normalize(institution),
            aliases: aliases.iter().map(|a| normalize(a)).filter(|a| !a.is_empty()).collect(),
        }
    }

    pub fn matches(&self, affiliation: &str) -> bool {
        let normalized = normalize(affiliation);
        if !self.institution.is_empty() && normalized.contains(&self.institution) {
            return true;
        }
        normalized
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| self.aliases.iter().any(|alias| alias == word))
    }
}

impl Default for AffiliationMatcher {
    fn default() -> Self {
        Self::new("Universidad Técnica de Ambato", &["UTA".to_string()])
    }
}
