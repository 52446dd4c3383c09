//! Elección de las credenciales que financian una promoción finalizada.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credentials::{
    AffiliationMatcher, AvailableCredentials, Credential, Evaluation, Publication, Training,
};
use crate::ladder::RankRequirementConfig;
use crate::ledger::ConsumptionRecord;
use crate::state_machine::PromotionRequest;

/// Credentials a finalization consumes, each list oldest-first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub publications: Vec<Publication>,
    pub evaluations: Vec<Evaluation>,
    pub trainings: Vec<Training>,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.publications.len() + self.evaluations.len() + self.trainings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn credentials(&self) -> impl Iterator<Item = Credential> + '_ {
        self.publications
            .iter()
            .cloned()
            .map(Credential::Publication)
            .chain(self.evaluations.iter().cloned().map(Credential::Evaluation))
            .chain(self.trainings.iter().cloned().map(Credential::Training))
    }

    /// One `Approved` ledger record per selected credential.
    pub fn to_records(&self, request: &PromotionRequest, consumed_at: DateTime<Utc>) -> Vec<ConsumptionRecord> {
        self.credentials()
            .map(|c| {
                ConsumptionRecord::approved(&request.id, &c, request.rank_from, request.rank_to, consumed_at)
            })
            .collect()
    }
}

/// Picks the oldest credentials that cover `config`.
///
/// `available` must already be oldest-first, as the credential provider
/// returns it. Same input, same selection.
pub fn select(
    available: &AvailableCredentials,
    config: &RankRequirementConfig,
    affiliation: &AffiliationMatcher,
) -> Selection {
    let publications = available
        .publications
        .iter()
        .filter(|p| affiliation.matches(&p.affiliation))
        .take(config.min_publications_total as usize)
        .cloned()
        .collect();

    let evaluations = available
        .evaluations
        .iter()
        .filter(|e| e.percentage() >= config.evaluation_percentage_min)
        .take(config.evaluation_periods)
        .cloned()
        .collect();

    let mut trainings = Vec::new();
    let mut hours = 0.0;
    for training in &available.trainings {
        if hours >= config.training_hours {
            break;
        }
        hours += training.hours;
        trainings.push(training.clone());
    }

    Selection {
        publications,
        evaluations,
        trainings,
    }
}
