use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credentials::{Credential, CredentialKey, CredentialKind};
use crate::ladder::Rank;

/// Outcome a consumption was recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumptionOutcome {
    Approved,
}

/// One credential spent on one promotion request. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    pub promotion_request_id: String,
    pub credential_type: CredentialKind,
    pub credential_id: u64,
    pub faculty_id: String,
    pub rank_from: Rank,
    pub rank_to: Rank,
    pub consumed_at: DateTime<Utc>,
    pub outcome: ConsumptionOutcome,
}

impl ConsumptionRecord {
    /// Approved consumption of `credential` by request `request_id`.
    pub fn approved(
        request_id: &str,
        credential: &Credential,
        rank_from: Rank,
        rank_to: Rank,
        consumed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            promotion_request_id: request_id.to_string(),
            credential_type: credential.kind(),
            credential_id: credential.id(),
            faculty_id: credential.faculty_id().to_string(),
            rank_from,
            rank_to,
            consumed_at,
            outcome: ConsumptionOutcome::Approved,
        }
    }

    pub fn key(&self) -> CredentialKey {
        CredentialKey::new(self.credential_type, self.credential_id)
    }
}
