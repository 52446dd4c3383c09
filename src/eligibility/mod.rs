mod dimension;
mod verifier;

pub use dimension::{
    Dimension, DimensionOutcome, DimensionResult, EligibilityReport, Metric, Unit,
};
pub use verifier::{
    EligibilityVerifier, VerifierSettings, evaluate, full_months_between, full_years_between,
    requirements_for,
};
