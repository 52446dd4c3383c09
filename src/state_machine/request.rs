use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{RequestStatus, ReviewStage};
use crate::ladder::Rank;

/// One entry of a request's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub stage: ReviewStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A faculty member's request to move one step up the ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRequest {
    pub id: String,
    pub faculty_id: String,
    pub rank_from: Rank,
    pub rank_to: Rank,
    pub submitted_at: DateTime<Utc>,
    pub status: RequestStatus,
    pub review_stage: ReviewStage,
    #[serde(default)]
    pub decided_by: Option<String>,
    #[serde(default)]
    pub decision_reason: Option<String>,
    #[serde(default)]
    pub approval_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejection_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub observations: Vec<String>,
    /// The rejected request this appeal replaces.
    #[serde(default)]
    pub supersedes: Option<String>,
    /// The appeal that replaced this rejected request.
    #[serde(default)]
    pub superseded_by: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub history: Vec<StatusChange>,
    /// Set by the finalization claim and cleared once `rank_to` reached the
    /// faculty directory.
    #[serde(default)]
    pub rank_update_pending: bool,
    /// Bumped by the repository on every successful update.
    #[serde(default)]
    pub version: u64,
}

impl PromotionRequest {
    pub fn new(
        faculty_id: &str,
        rank_from: Rank,
        rank_to: Rank,
        metadata: BTreeMap<String, String>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            faculty_id: faculty_id.to_string(),
            rank_from,
            rank_to,
            submitted_at,
            status: RequestStatus::Pendiente,
            review_stage: ReviewStage::Presidente,
            decided_by: None,
            decision_reason: None,
            approval_date: None,
            rejection_date: None,
            observations: Vec::new(),
            supersedes: None,
            superseded_by: None,
            metadata,
            history: Vec::new(),
            rank_update_pending: false,
            version: 0,
        }
    }

    /// A fresh APELACION request replacing `original`, reviewed by the commission.
    pub fn appeal_of(original: &PromotionRequest, justification: &str, at: DateTime<Utc>) -> Self {
        let mut appeal = Self::new(
            &original.faculty_id,
            original.rank_from,
            original.rank_to,
            original.metadata.clone(),
            at,
        );
        appeal.status = RequestStatus::Apelacion;
        appeal.review_stage = ReviewStage::Comision;
        appeal.supersedes = Some(original.id.clone());
        appeal.observations.push(format!("Apelación: {justification}"));
        appeal
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// When the request was claimed as finalized.
    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.history
            .iter()
            .rev()
            .find(|change| change.to == RequestStatus::Finalizado)
            .map(|change| change.at)
    }
}
