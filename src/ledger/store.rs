use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::record::{ConsumptionOutcome, ConsumptionRecord};
use crate::credentials::CredentialKind;
use crate::error::{EscalafonError, Result};
use crate::storage::{load_json, lock, save_json};

/// The authoritative record of which credential funded which promotion.
pub trait ConsumptionLedger: Send + Sync {
    /// Appends `record`.
    ///
    /// Fails with [`EscalafonError::AlreadyConsumed`] if an approved record
    /// for the same credential key already exists.
    fn record(&self, record: ConsumptionRecord) -> Result<()>;

    /// Ids of `kind` consumed by `faculty_id`.
    fn consumed_ids(&self, faculty_id: &str, kind: CredentialKind) -> Result<BTreeSet<u64>>;

    fn records_for_request(&self, request_id: &str) -> Result<Vec<ConsumptionRecord>>;

    fn records_for_faculty(&self, faculty_id: &str) -> Result<Vec<ConsumptionRecord>>;
}

/// Ledger kept in memory and, when opened on a path, mirrored to a JSON file.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<ConsumptionRecord>>,
    path: Option<PathBuf>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the ledger from `path` and persists every append back to it.
    pub fn open(path: &Path) -> Result<Self> {
        let records: Vec<ConsumptionRecord> = load_json(path)?;
        debug!(path = %path.display(), records = records.len(), "Ledger loaded");
        Ok(Self {
            records: Mutex::new(records),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn len(&self) -> Result<usize> {
        Ok(lock(&self.records, "ledger")?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn select(&self, keep: impl Fn(&ConsumptionRecord) -> bool) -> Result<Vec<ConsumptionRecord>> {
        let records = lock(&self.records, "ledger")?;
        Ok(records.iter().filter(|r| keep(r)).cloned().collect())
    }
}

impl ConsumptionLedger for MemoryLedger {
    fn record(&self, record: ConsumptionRecord) -> Result<()> {
        let mut records = lock(&self.records, "ledger")?;

        let key = record.key();
        let duplicate = record.outcome == ConsumptionOutcome::Approved
            && records
                .iter()
                .any(|r| r.outcome == ConsumptionOutcome::Approved && r.key() == key);
        if duplicate {
            return Err(EscalafonError::AlreadyConsumed(key));
        }

        records.push(record);
        if let Some(path) = &self.path
            && let Err(e) = save_json(path, &*records)
        {
            // Keep memory and disk in step: the append did not happen.
            records.pop();
            return Err(e);
        }
        Ok(())
    }

    fn consumed_ids(&self, faculty_id: &str, kind: CredentialKind) -> Result<BTreeSet<u64>> {
        let records = lock(&self.records, "ledger")?;
        Ok(records
            .iter()
            .filter(|r| r.faculty_id == faculty_id && r.credential_type == kind)
            .map(|r| r.credential_id)
            .collect())
    }

    fn records_for_request(&self, request_id: &str) -> Result<Vec<ConsumptionRecord>> {
        self.select(|r| r.promotion_request_id == request_id)
    }

    fn records_for_faculty(&self, faculty_id: &str) -> Result<Vec<ConsumptionRecord>> {
        self.select(|r| r.faculty_id == faculty_id)
    }
}
