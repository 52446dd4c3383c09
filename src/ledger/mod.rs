mod record;
mod retry;
mod store;

pub use record::{ConsumptionOutcome, ConsumptionRecord};
pub use retry::{DrainReport, LedgerRetryQueue, QueuedWrite, RetryConfig};
pub use store::{ConsumptionLedger, MemoryLedger};

use crate::credentials::{CredentialKind, SpentCredentials};
use crate::error::Result;

/// Everything `faculty_id` can no longer spend: ledger entries plus writes
/// still waiting in the retry queue.
pub fn spent_credentials(
    ledger: &dyn ConsumptionLedger,
    queue: &LedgerRetryQueue,
    faculty_id: &str,
) -> Result<SpentCredentials> {
    let mut spent = SpentCredentials::new();
    for kind in [
        CredentialKind::Publication,
        CredentialKind::Evaluation,
        CredentialKind::Training,
    ] {
        spent.extend_ids(kind, ledger.consumed_ids(faculty_id, kind)?);
    }
    for key in queue.pending_keys(faculty_id)? {
        spent.insert(key);
    }
    Ok(spent)
}
