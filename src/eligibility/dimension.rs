use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ladder::RankRequirementConfig;

/// One independently evaluated requirement axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    Experience,
    RelevantWorks,
    PerformanceEvaluation,
    Training,
    ResearchProjects,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Experience => write!(f, "Experience"),
            Dimension::RelevantWorks => write!(f, "Relevant works"),
            Dimension::PerformanceEvaluation => write!(f, "Performance evaluation"),
            Dimension::Training => write!(f, "Training"),
            Dimension::ResearchProjects => write!(f, "Research projects"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimensionOutcome {
    Passed,
    Failed,
    /// Not enough records to decide; counts as a failure.
    InsufficientData,
    /// Not required for this promotion; does not count either way.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Years,
    Months,
    Count,
    Percent,
    Hours,
}

/// A typed observed/required pair behind a dimension's message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub observed: Option<f64>,
    pub required: f64,
    pub unit: Unit,
}

impl Metric {
    pub fn new(name: &str, observed: Option<f64>, required: f64, unit: Unit) -> Self {
        Self {
            name: name.to_string(),
            observed,
            required,
            unit,
        }
    }

    pub fn met(&self) -> bool {
        self.observed.is_some_and(|o| o >= self.required)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionResult {
    pub dimension: Dimension,
    pub outcome: DimensionOutcome,
    /// `false` only for `Failed` and `InsufficientData`.
    pub passed: bool,
    pub observed_value: String,
    pub required_value: String,
    pub message: String,
    pub metrics: Vec<Metric>,
}

impl DimensionResult {
    pub fn new(
        dimension: Dimension,
        outcome: DimensionOutcome,
        observed_value: String,
        required_value: String,
        message: String,
        metrics: Vec<Metric>,
    ) -> Self {
        Self {
            dimension,
            outcome,
            passed: matches!(outcome, DimensionOutcome::Passed | DimensionOutcome::Skipped),
            observed_value,
            required_value,
            message,
            metrics,
        }
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

/// Full eligibility verdict for one faculty member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityReport {
    pub faculty_id: String,
    /// Rank name exactly as the caller supplied it.
    pub rank_input: String,
    pub requirements: RankRequirementConfig,
    /// The rank did not match the ladder and lowest-tier thresholds were used.
    pub fallback_thresholds: bool,
    pub evaluated_on: NaiveDate,
    pub overall_pass: bool,
    pub dimensions: Vec<DimensionResult>,
}

impl EligibilityReport {
    pub fn dimension(&self, dimension: Dimension) -> Option<&DimensionResult> {
        self.dimensions.iter().find(|d| d.dimension == dimension)
    }

    pub fn failed_dimensions(&self) -> impl Iterator<Item = &DimensionResult> {
        self.dimensions.iter().filter(|d| !d.passed)
    }
}
