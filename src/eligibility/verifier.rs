use chrono::{Datelike, Months, NaiveDate};
use tracing::{debug, warn};

use super::dimension::{
    Dimension, DimensionOutcome, DimensionResult, EligibilityReport, Metric, Unit,
};
use crate::config::{EscalafonConfig, UnknownRankPolicy};
use crate::credentials::{AffiliationMatcher, AvailableCredentials, CredentialProvider, CredentialStore};
use crate::error::{EscalafonError, Result};
use crate::faculty::{RankStart, RankStartSource, StartDateSource};
use crate::ladder::{RankRequirementConfig, Resolution, resolve_requirements};
use crate::ledger::{ConsumptionLedger, LedgerRetryQueue, spent_credentials};

/// Tunables the verifier reads from [`EscalafonConfig`].
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    pub affiliation: AffiliationMatcher,
    pub training_window_years: u32,
    pub unknown_rank_policy: UnknownRankPolicy,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self::from(&EscalafonConfig::default())
    }
}

impl From<&EscalafonConfig> for VerifierSettings {
    fn from(config: &EscalafonConfig) -> Self {
        Self {
            affiliation: config.affiliation_matcher(),
            training_window_years: config.training_window_years,
            unknown_rank_policy: config.unknown_rank_policy,
        }
    }
}

/// Resolves `rank_input` to a requirement config under `policy`.
///
/// Returns the config and whether lowest-tier fallback thresholds were used.
pub fn requirements_for(
    rank_input: &str,
    policy: UnknownRankPolicy,
) -> Result<(RankRequirementConfig, bool)> {
    match resolve_requirements(rank_input) {
        Resolution::Next(config) => Ok((config, false)),
        Resolution::TopOfLadder(rank) => Err(EscalafonError::TopOfLadder(rank)),
        Resolution::Unknown(input) => match policy {
            UnknownRankPolicy::Strict => Err(EscalafonError::UnknownRank(input)),
            UnknownRankPolicy::LowestTier => {
                warn!(rank = %input, "Unknown rank, evaluating against lowest-tier thresholds");
                Ok((RankRequirementConfig::lowest_tier(), true))
            }
        },
    }
}

/// Read-only eligibility check over the credential store and the ledger.
///
/// Never writes to the ledger and never mutates credentials.
pub struct EligibilityVerifier<'a> {
    pub credentials: &'a dyn CredentialStore,
    pub ledger: &'a dyn ConsumptionLedger,
    pub retry_queue: &'a LedgerRetryQueue,
    pub rank_start: &'a dyn RankStartSource,
    pub settings: &'a VerifierSettings,
}

impl EligibilityVerifier<'_> {
    pub fn verify(&self, faculty_id: &str, current_rank: &str, today: NaiveDate) -> Result<EligibilityReport> {
        let (requirements, fallback_thresholds) =
            requirements_for(current_rank, self.settings.unknown_rank_policy)?;

        let spent = spent_credentials(self.ledger, self.retry_queue, faculty_id)?;
        let available = CredentialProvider::new(self.credentials).available(faculty_id, &spent)?;
        let rank_start = self.rank_start.rank_start(faculty_id)?;

        let dimensions = evaluate(&requirements, &available, rank_start, today, self.settings);
        let overall_pass = dimensions.iter().all(|d| d.passed);

        debug!(
            faculty_id,
            target = %requirements.target_rank,
            overall_pass,
            spent = spent.len(),
            "Eligibility verified"
        );

        Ok(EligibilityReport {
            faculty_id: faculty_id.to_string(),
            rank_input: current_rank.to_string(),
            requirements,
            fallback_thresholds,
            evaluated_on: today,
            overall_pass,
            dimensions,
        })
    }
}

/// Evaluates all five dimensions against already-filtered credentials.
pub fn evaluate(
    config: &RankRequirementConfig,
    available: &AvailableCredentials,
    rank_start: Option<RankStart>,
    today: NaiveDate,
    settings: &VerifierSettings,
) -> Vec<DimensionResult> {
    vec![
        check_experience(config, rank_start, today),
        check_relevant_works(config, available, &settings.affiliation),
        check_evaluations(config, available),
        check_training(config, available, today, settings.training_window_years),
        check_research(config, available, today, &settings.affiliation),
    ]
}

fn check_experience(
    config: &RankRequirementConfig,
    rank_start: Option<RankStart>,
    today: NaiveDate,
) -> DimensionResult {
    let required = config.years_of_service;
    let required_value = format!("{required} years");

    let Some(start) = rank_start else {
        return DimensionResult::new(
            Dimension::Experience,
            DimensionOutcome::InsufficientData,
            "unknown".into(),
            required_value,
            format!(
                "Insufficient data: no start date recorded for {}; required {required} years",
                config.current_rank
            ),
            vec![Metric::new("years", None, required as f64, Unit::Years)],
        );
    };

    let years = full_years_between(start.date, today);
    let outcome = if years >= required {
        DimensionOutcome::Passed
    } else {
        DimensionOutcome::Failed
    };
    let mut message = format!(
        "{years} full years in {} since {}; required {required}",
        config.current_rank, start.date
    );
    if start.source == StartDateSource::AccountCreation {
        message.push_str(" (start date taken from account creation, no HR record)");
    }

    DimensionResult::new(
        Dimension::Experience,
        outcome,
        format!("{years} years"),
        required_value,
        message,
        vec![Metric::new("years", Some(years as f64), required as f64, Unit::Years)],
    )
}

fn check_relevant_works(
    config: &RankRequirementConfig,
    available: &AvailableCredentials,
    affiliation: &AffiliationMatcher,
) -> DimensionResult {
    let total = available.publications.len() as u32;
    let uta = available
        .publications
        .iter()
        .filter(|p| affiliation.matches(&p.affiliation))
        .count() as u32;

    let metrics = vec![
        Metric::new("publications", Some(total as f64), config.min_publications_total as f64, Unit::Count),
        Metric::new("uta_publications", Some(uta as f64), config.min_publications_uta as f64, Unit::Count),
    ];
    let outcome = if metrics.iter().all(Metric::met) {
        DimensionOutcome::Passed
    } else {
        DimensionOutcome::Failed
    };

    DimensionResult::new(
        Dimension::RelevantWorks,
        outcome,
        format!("{total} total / {uta} UTA"),
        format!("{} total / {} UTA", config.min_publications_total, config.min_publications_uta),
        format!(
            "{total} relevant works available ({uta} UTA-affiliated); required {} ({} UTA-affiliated)",
            config.min_publications_total, config.min_publications_uta
        ),
        metrics,
    )
}

fn check_evaluations(config: &RankRequirementConfig, available: &AvailableCredentials) -> DimensionResult {
    let required_periods = config.evaluation_periods;
    let min_pct = config.evaluation_percentage_min;
    let required_value = format!("{min_pct:.2}% over {required_periods} periods");

    // Most recent first.
    let window: Vec<_> = available
        .evaluations
        .iter()
        .rev()
        .take(required_periods)
        .collect();

    if window.len() < required_periods {
        return DimensionResult::new(
            Dimension::PerformanceEvaluation,
            DimensionOutcome::InsufficientData,
            format!("{} periods", window.len()),
            required_value,
            format!(
                "Not enough evaluations: {} analyzed, {required_periods} required",
                window.len()
            ),
            vec![
                Metric::new("periods", Some(window.len() as f64), required_periods as f64, Unit::Count),
                Metric::new("average_percentage", None, min_pct, Unit::Percent),
            ],
        );
    }

    let average = if window.is_empty() {
        100.0
    } else {
        window.iter().map(|e| e.percentage()).sum::<f64>() / window.len() as f64
    };
    let periods: Vec<&str> = window.iter().map(|e| e.period.as_str()).collect();
    let outcome = if average >= min_pct {
        DimensionOutcome::Passed
    } else {
        DimensionOutcome::Failed
    };

    DimensionResult::new(
        Dimension::PerformanceEvaluation,
        outcome,
        format!("{average:.2}%"),
        required_value,
        format!(
            "Average {average:.2}% over the last {} periods ({}); required {min_pct:.2}%",
            window.len(),
            periods.join(", ")
        ),
        vec![
            Metric::new("periods", Some(window.len() as f64), required_periods as f64, Unit::Count),
            Metric::new("average_percentage", Some(average), min_pct, Unit::Percent),
        ],
    )
}

fn check_training(
    config: &RankRequirementConfig,
    available: &AvailableCredentials,
    today: NaiveDate,
    window_years: u32,
) -> DimensionResult {
    let cutoff = today
        .checked_sub_months(Months::new(12 * window_years))
        .unwrap_or(NaiveDate::MIN);
    let recent: Vec<_> = available
        .trainings
        .iter()
        .filter(|t| t.start_date >= cutoff && t.start_date <= today)
        .collect();

    let hours: f64 = recent.iter().map(|t| t.hours).sum();
    let pedagogical: f64 = recent.iter().filter(|t| t.is_pedagogical).map(|t| t.hours).sum();
    let metrics = vec![
        Metric::new("hours", Some(hours), config.training_hours, Unit::Hours),
        Metric::new("pedagogical_hours", Some(pedagogical), config.pedagogical_training_hours, Unit::Hours),
    ];
    let observed_value = format!("{hours:.1} h ({pedagogical:.1} h pedagogical)");
    let required_value = format!(
        "{:.1} h ({:.1} h pedagogical)",
        config.training_hours, config.pedagogical_training_hours
    );

    if let Some(exempt) = available.trainings.iter().find(|t| t.has_authority_exemption) {
        return DimensionResult::new(
            Dimension::Training,
            DimensionOutcome::Passed,
            observed_value,
            required_value,
            format!(
                "Authority exemption recorded on training #{}: hour requirements waived",
                exempt.id
            ),
            metrics,
        );
    }

    let outcome = if metrics.iter().all(Metric::met) {
        DimensionOutcome::Passed
    } else {
        DimensionOutcome::Failed
    };

    DimensionResult::new(
        Dimension::Training,
        outcome,
        observed_value,
        required_value,
        format!(
            "{hours:.1} training hours ({pedagogical:.1} pedagogical) since {cutoff}; required {:.1} ({:.1} pedagogical)",
            config.training_hours, config.pedagogical_training_hours
        ),
        metrics,
    )
}

fn check_research(
    config: &RankRequirementConfig,
    available: &AvailableCredentials,
    today: NaiveDate,
    affiliation: &AffiliationMatcher,
) -> DimensionResult {
    let required = config.research_project_months;
    let required_value = format!("{required} months");

    if !config.requires_research_projects {
        return DimensionResult::new(
            Dimension::ResearchProjects,
            DimensionOutcome::Skipped,
            "-".into(),
            "-".into(),
            format!("Research projects are not required for {}", config.target_rank),
            vec![],
        );
    }

    // Participation is approximated by the age of the oldest UTA publication.
    let Some(oldest) = available
        .publications
        .iter()
        .filter(|p| affiliation.matches(&p.affiliation))
        .map(|p| p.date)
        .min()
    else {
        return DimensionResult::new(
            Dimension::ResearchProjects,
            DimensionOutcome::InsufficientData,
            "unknown".into(),
            required_value,
            format!(
                "Insufficient data: no available UTA-affiliated publication to estimate research participation; required {required} months"
            ),
            vec![Metric::new("months", None, required as f64, Unit::Months)],
        );
    };

    let months = full_months_between(oldest, today);
    let outcome = if months >= required {
        DimensionOutcome::Passed
    } else {
        DimensionOutcome::Failed
    };

    DimensionResult::new(
        Dimension::ResearchProjects,
        outcome,
        format!("{months} months"),
        required_value,
        format!(
            "Estimated {months} months of research participation since the oldest available UTA publication ({oldest}); required {required}"
        ),
        vec![Metric::new("months", Some(months as f64), required as f64, Unit::Months)],
    )
}

/// Whole anniversaries between `start` and `end`; zero if `end` is earlier.
pub fn full_years_between(start: NaiveDate, end: NaiveDate) -> u32 {
    if end <= start {
        return 0;
    }
    let mut years = end.year() - start.year();
    if (end.month(), end.day()) < (start.month(), start.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

/// Whole months between `start` and `end`; zero if `end` is earlier.
pub fn full_months_between(start: NaiveDate, end: NaiveDate) -> u32 {
    if end <= start {
        return 0;
    }
    let mut months = (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32;
    if end.day() < start.day() {
        months -= 1;
    }
    months.max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Evaluation, Publication, Training};
    use crate::ladder::Rank;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        date(2024, 6, 1)
    }

    fn publication(id: u64, year: i32, affiliation: &str) -> Publication {
        Publication {
            id,
            faculty_id: "A".into(),
            title: format!("Paper {id}"),
            kind: "article".into(),
            date: date(year, 1, 15),
            affiliation: affiliation.into(),
        }
    }

    fn evaluation(id: u64, year: i32, term: u8, pct: f64) -> Evaluation {
        Evaluation {
            id,
            faculty_id: "A".into(),
            period: format!("{year}-{term}"),
            year,
            term,
            score_obtained: pct,
            score_max: 100.0,
        }
    }

    fn training(id: u64, start: NaiveDate, hours: f64, pedagogical: bool) -> Training {
        Training {
            id,
            faculty_id: "A".into(),
            title: String::new(),
            hours,
            start_date: start,
            end_date: start,
            is_pedagogical: pedagogical,
            has_authority_exemption: false,
        }
    }

    fn hr_start(date: NaiveDate) -> Option<RankStart> {
        Some(RankStart {
            date,
            source: StartDateSource::HumanResources,
        })
    }

    fn auxiliar_1() -> RankRequirementConfig {
        RankRequirementConfig::for_rank(Rank::TitularAuxiliar1).unwrap()
    }

    fn agregado_1() -> RankRequirementConfig {
        RankRequirementConfig::for_rank(Rank::TitularAgregado1).unwrap()
    }

    fn strong_candidate() -> AvailableCredentials {
        AvailableCredentials {
            publications: (0..5).map(|i| publication(i + 1, 2019 + i as i32, "UTA")).collect(),
            evaluations: vec![
                evaluation(1, 2022, 1, 80.0),
                evaluation(2, 2022, 2, 80.0),
                evaluation(3, 2023, 1, 80.0),
                evaluation(4, 2023, 2, 80.0),
            ],
            trainings: vec![
                training(1, date(2022, 9, 1), 70.0, false),
                training(2, date(2023, 9, 1), 30.0, true),
            ],
        }
    }

    #[test]
    fn full_years_respects_anniversary() {
        assert_eq!(full_years_between(date(2020, 6, 2), date(2024, 6, 1)), 3);
        assert_eq!(full_years_between(date(2020, 6, 1), date(2024, 6, 1)), 4);
        assert_eq!(full_years_between(date(2025, 1, 1), date(2024, 6, 1)), 0);
    }

    #[test]
    fn full_months_respects_day_of_month() {
        assert_eq!(full_months_between(date(2023, 1, 15), date(2024, 1, 14)), 11);
        assert_eq!(full_months_between(date(2023, 1, 15), date(2024, 1, 15)), 12);
        assert_eq!(full_months_between(date(2024, 7, 1), date(2024, 6, 1)), 0);
    }

    #[test]
    fn strong_candidate_passes_every_dimension() {
        let results = evaluate(
            &auxiliar_1(),
            &strong_candidate(),
            hr_start(date(2019, 1, 1)),
            today(),
            &VerifierSettings::default(),
        );
        assert!(results.iter().all(|d| d.passed), "{results:#?}");
        let research = results.iter().find(|d| d.dimension == Dimension::ResearchProjects).unwrap();
        assert_eq!(research.outcome, DimensionOutcome::Skipped);
    }

    #[test]
    fn missing_start_date_is_insufficient_data() {
        let result = check_experience(&auxiliar_1(), None, today());
        assert_eq!(result.outcome, DimensionOutcome::InsufficientData);
        assert!(!result.passed);
        assert!(result.message.contains("Insufficient data"));
    }

    #[test]
    fn account_creation_start_date_is_flagged() {
        let start = RankStart {
            date: date(2010, 1, 1),
            source: StartDateSource::AccountCreation,
        };
        let result = check_experience(&auxiliar_1(), Some(start), today());
        assert!(result.passed);
        assert!(result.message.contains("account creation"));
        assert_eq!(result.metric("years").unwrap().observed, Some(14.0));
    }

    #[test]
    fn short_tenure_fails_experience() {
        let result = check_experience(&auxiliar_1(), hr_start(date(2022, 1, 1)), today());
        assert_eq!(result.outcome, DimensionOutcome::Failed);
        assert_eq!(result.observed_value, "2 years");
        assert_eq!(result.required_value, "4 years");
    }

    #[test]
    fn works_need_uta_affiliation() {
        let mut available = strong_candidate();
        available.publications = vec![publication(1, 2020, "ESPOCH"), publication(2, 2021, "Computación")];
        let result = check_relevant_works(&auxiliar_1(), &available, &AffiliationMatcher::default());
        assert_eq!(result.outcome, DimensionOutcome::Failed);
        assert_eq!(result.metric("publications").unwrap().observed, Some(2.0));
        assert_eq!(result.metric("uta_publications").unwrap().observed, Some(0.0));
    }

    #[test]
    fn two_evaluations_report_count() {
        let mut available = strong_candidate();
        available.evaluations.truncate(2);
        let result = check_evaluations(&auxiliar_1(), &available);
        assert_eq!(result.outcome, DimensionOutcome::InsufficientData);
        assert!(result.message.contains("2 analyzed, 4 required"), "{}", result.message);
    }

    #[test]
    fn evaluation_window_uses_most_recent_periods() {
        let mut available = strong_candidate();
        // An old poor evaluation outside the 4-period window must not drag the average.
        available.evaluations.insert(0, evaluation(9, 2020, 1, 10.0));
        let result = check_evaluations(&auxiliar_1(), &available);
        assert_eq!(result.outcome, DimensionOutcome::Passed);
        assert_eq!(result.metric("average_percentage").unwrap().observed, Some(80.0));
        assert!(result.message.contains("2023-2, 2023-1, 2022-2, 2022-1"));
    }

    #[test]
    fn low_average_fails_evaluation() {
        let mut available = strong_candidate();
        available.evaluations[3] = evaluation(4, 2023, 2, 40.0);
        let result = check_evaluations(&auxiliar_1(), &available);
        assert_eq!(result.outcome, DimensionOutcome::Failed);
        assert_eq!(result.observed_value, "70.00%");
    }

    #[test]
    fn old_trainings_fall_outside_window() {
        let mut available = strong_candidate();
        available.trainings.push(training(3, date(2020, 1, 1), 500.0, true));
        let result = check_training(&auxiliar_1(), &available, today(), 3);
        assert_eq!(result.metric("hours").unwrap().observed, Some(100.0));
        assert_eq!(result.metric("pedagogical_hours").unwrap().observed, Some(30.0));
        assert!(result.passed);
    }

    #[test]
    fn insufficient_pedagogical_hours_fail() {
        let mut available = strong_candidate();
        available.trainings[1].is_pedagogical = false;
        let result = check_training(&auxiliar_1(), &available, today(), 3);
        assert_eq!(result.outcome, DimensionOutcome::Failed);
    }

    #[test]
    fn authority_exemption_waives_hours() {
        let mut available = strong_candidate();
        available.trainings = vec![Training {
            has_authority_exemption: true,
            ..training(7, date(2015, 1, 1), 0.0, false)
        }];
        let result = check_training(&auxiliar_1(), &available, today(), 3);
        assert_eq!(result.outcome, DimensionOutcome::Passed);
        assert!(result.message.contains("exemption"));
    }

    #[test]
    fn research_measured_from_oldest_uta_publication() {
        let available = strong_candidate();
        let result = check_research(&agregado_1(), &available, today(), &AffiliationMatcher::default());
        // Oldest UTA publication is 2019-01-15.
        assert_eq!(result.metric("months").unwrap().observed, Some(64.0));
        assert!(result.passed);
    }

    #[test]
    fn research_without_uta_publication_is_insufficient() {
        let mut available = strong_candidate();
        available.publications.clear();
        let result = check_research(&agregado_1(), &available, today(), &AffiliationMatcher::default());
        assert_eq!(result.outcome, DimensionOutcome::InsufficientData);
    }

    #[test]
    fn unknown_rank_strict_is_an_error() {
        let err = requirements_for("Profesor Ocasional", UnknownRankPolicy::Strict).unwrap_err();
        assert!(matches!(err, EscalafonError::UnknownRank(_)));
    }

    #[test]
    fn unknown_rank_lowest_tier_falls_back() {
        let (config, fallback) = requirements_for("Profesor Ocasional", UnknownRankPolicy::LowestTier).unwrap();
        assert!(fallback);
        assert_eq!(config, RankRequirementConfig::lowest_tier());
    }

    #[test]
    fn top_rank_is_an_error() {
        let err = requirements_for("Titular Principal 1", UnknownRankPolicy::LowestTier).unwrap_err();
        assert!(matches!(err, EscalafonError::TopOfLadder(Rank::TitularPrincipal1)));
    }
}
