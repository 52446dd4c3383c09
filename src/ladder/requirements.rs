use serde::{Deserialize, Serialize};

use super::rank::Rank;

/// Everything the next rank asks of a faculty member.
///
/// Derived purely from the current rank; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankRequirementConfig {
    pub current_rank: Rank,
    pub target_rank: Rank,
    pub years_of_service: u32,
    pub min_publications_total: u32,
    pub min_publications_uta: u32,
    pub evaluation_percentage_min: f64,
    pub evaluation_periods: usize,
    pub training_hours: f64,
    pub pedagogical_training_hours: f64,
    pub research_project_months: u32,
    pub requires_research_projects: bool,
}

// Threshold row for one target rank.
struct Thresholds {
    target: Rank,
    years: u32,
    publications_total: u32,
    publications_uta: u32,
    evaluation_pct: f64,
    evaluation_periods: usize,
    training_hours: f64,
    pedagogical_hours: f64,
    research_months: u32,
    research_required: bool,
}

/// Rank → thresholds, ordered like [`Rank::LADDER`] minus the bottom rung.
const THRESHOLDS: [Thresholds; 5] = [
    Thresholds {
        target: Rank::TitularAuxiliar2,
        years: 4,
        publications_total: 1,
        publications_uta: 1,
        evaluation_pct: 75.0,
        evaluation_periods: 4,
        training_hours: 96.0,
        pedagogical_hours: 24.0,
        research_months: 0,
        research_required: false,
    },
    Thresholds {
        target: Rank::TitularAgregado1,
        years: 4,
        publications_total: 3,
        publications_uta: 1,
        evaluation_pct: 75.0,
        evaluation_periods: 4,
        training_hours: 128.0,
        pedagogical_hours: 32.0,
        research_months: 12,
        research_required: true,
    },
    Thresholds {
        target: Rank::TitularAgregado2,
        years: 4,
        publications_total: 5,
        publications_uta: 2,
        evaluation_pct: 75.0,
        evaluation_periods: 4,
        training_hours: 160.0,
        pedagogical_hours: 40.0,
        research_months: 12,
        research_required: true,
    },
    Thresholds {
        target: Rank::TitularAgregado3,
        years: 4,
        publications_total: 7,
        publications_uta: 3,
        evaluation_pct: 75.0,
        evaluation_periods: 4,
        training_hours: 192.0,
        pedagogical_hours: 48.0,
        research_months: 24,
        research_required: true,
    },
    Thresholds {
        target: Rank::TitularPrincipal1,
        years: 4,
        publications_total: 12,
        publications_uta: 4,
        evaluation_pct: 75.0,
        evaluation_periods: 4,
        training_hours: 256.0,
        pedagogical_hours: 64.0,
        research_months: 36,
        research_required: true,
    },
];

impl RankRequirementConfig {
    /// Requirements for moving from `current` to the rank above it.
    pub fn for_rank(current: Rank) -> Option<Self> {
        let target = current.next()?;
        THRESHOLDS
            .iter()
            .find(|row| row.target == target)
            .map(|row| Self::from_row(current, row))
    }

    /// Requirements of the first promotion on the ladder.
    pub fn lowest_tier() -> Self {
        Self::from_row(Rank::LADDER[0], &THRESHOLDS[0])
    }

    fn from_row(current: Rank, row: &Thresholds) -> Self {
        Self {
            current_rank: current,
            target_rank: row.target,
            years_of_service: row.years,
            min_publications_total: row.publications_total,
            min_publications_uta: row.publications_uta,
            evaluation_percentage_min: row.evaluation_pct,
            evaluation_periods: row.evaluation_periods,
            training_hours: row.training_hours,
            pedagogical_training_hours: row.pedagogical_hours,
            research_project_months: row.research_months,
            requires_research_projects: row.research_required,
        }
    }
}

/// Result of resolving a free-text rank name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    /// The rank was recognised and has a next step.
    Next(RankRequirementConfig),
    /// The rank was recognised but is already the top of the ladder.
    TopOfLadder(Rank),
    /// Nothing on the ladder matched the input.
    Unknown(String),
}

impl Resolution {
    pub fn config(&self) -> Option<&RankRequirementConfig> {
        match self {
            Resolution::Next(config) => Some(config),
            _ => None,
        }
    }
}

/// Resolves the requirements for the rank above `current_rank`.
///
/// Unmatched names come back as [`Resolution::Unknown`] rather than the
/// lowest-tier thresholds; callers decide whether to fall back.
pub fn resolve_requirements(current_rank: &str) -> Resolution {
    match Rank::parse(current_rank) {
        Some(rank) => match RankRequirementConfig::for_rank(rank) {
            Some(config) => Resolution::Next(config),
            None => Resolution::TopOfLadder(rank),
        },
        None => Resolution::Unknown(current_rank.trim().to_string()),
    }
}
