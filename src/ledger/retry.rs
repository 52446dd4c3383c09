//! Cola de reintentos para escrituras del ledger que fallaron al finalizar.
//!
//! La finalización nunca se revierte por un fallo del ledger, pero tampoco lo
//! ignora: el registro queda encolado aquí hasta escribirse o agotar los
//! reintentos, en cuyo caso pasa a `dead_letters` para revisión manual.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::record::ConsumptionRecord;
use super::store::ConsumptionLedger;
use crate::credentials::CredentialKey;
use crate::error::{EscalafonError, Result};
use crate::storage::{load_json, lock, save_json};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries before a write is parked as a dead letter.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given retry attempt using exponential backoff.
    /// delay = base_delay_ms * 2^(attempt - 1), saturating at `u64::MAX`.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        self.base_delay_ms.saturating_mul(factor)
    }
}

/// A ledger write waiting for another attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedWrite {
    pub record: ConsumptionRecord,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueueState {
    pending: VecDeque<QueuedWrite>,
    dead_letters: Vec<QueuedWrite>,
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub written: usize,
    pub still_pending: usize,
    pub dead_lettered: usize,
}

/// Failed ledger writes, optionally persisted to `ledger_retry.json`.
#[derive(Debug, Default)]
pub struct LedgerRetryQueue {
    state: Mutex<QueueState>,
    path: Option<PathBuf>,
    config: RetryConfig,
}

impl LedgerRetryQueue {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            path: None,
            config,
        }
    }

    pub fn open(path: &Path, config: RetryConfig) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(load_json(path)?),
            path: Some(path.to_path_buf()),
            config,
        })
    }

    /// Queues `record` after a failed first write. Nothing stays queued when
    /// the queue file cannot be saved.
    pub fn enqueue(&self, record: ConsumptionRecord, error: &EscalafonError) -> Result<()> {
        let mut state = lock(&self.state, "ledger retry queue")?;
        let credential = record.key();
        let request_id = record.promotion_request_id.clone();
        state.pending.push_back(QueuedWrite {
            record,
            attempts: 1,
            last_error: error.to_string(),
        });
        if let Err(e) = self.persist(&state) {
            state.pending.pop_back();
            return Err(e);
        }
        warn!(%request_id, %credential, error = %error, "Ledger write failed, queued for retry");
        Ok(())
    }

    /// Keys of `faculty_id` whose write has not reached the ledger yet,
    /// dead letters included.
    pub fn pending_keys(&self, faculty_id: &str) -> Result<Vec<CredentialKey>> {
        let state = lock(&self.state, "ledger retry queue")?;
        Ok(state
            .pending
            .iter()
            .chain(&state.dead_letters)
            .filter(|w| w.record.faculty_id == faculty_id)
            .map(|w| w.record.key())
            .collect())
    }

    pub fn pending(&self) -> Result<Vec<QueuedWrite>> {
        Ok(lock(&self.state, "ledger retry queue")?.pending.iter().cloned().collect())
    }

    pub fn dead_letters(&self) -> Result<Vec<QueuedWrite>> {
        Ok(lock(&self.state, "ledger retry queue")?.dead_letters.clone())
    }

    /// Tries every pending write once against `ledger`.
    ///
    /// A write rejected as already consumed is dropped: the key is spent and
    /// retrying cannot change that.
    pub fn drain_once(&self, ledger: &dyn ConsumptionLedger) -> Result<DrainReport> {
        let mut state = lock(&self.state, "ledger retry queue")?;
        let mut report = DrainReport::default();
        let mut remaining = VecDeque::new();

        while let Some(mut write) = state.pending.pop_front() {
            match ledger.record(write.record.clone()) {
                Ok(()) => {
                    report.written += 1;
                }
                Err(EscalafonError::AlreadyConsumed(key)) => {
                    warn!(credential = %key, "Queued ledger write already consumed, dropping");
                }
                Err(e) => {
                    write.attempts += 1;
                    write.last_error = e.to_string();
                    if write.attempts > self.config.max_retries {
                        error!(
                            request_id = %write.record.promotion_request_id,
                            credential = %write.record.key(),
                            attempts = write.attempts,
                            "Ledger write exhausted retries"
                        );
                        report.dead_lettered += 1;
                        state.dead_letters.push(write);
                    } else {
                        remaining.push_back(write);
                    }
                }
            }
        }

        report.still_pending = remaining.len();
        state.pending = remaining;
        self.persist(&state)?;
        Ok(report)
    }

    /// Drains repeatedly, sleeping with exponential backoff between passes,
    /// until the queue is empty or every write ran out of attempts.
    pub async fn drain_with_backoff(&self, ledger: &dyn ConsumptionLedger) -> Result<DrainReport> {
        let mut total = DrainReport::default();
        let mut pass = 0u32;

        loop {
            pass += 1;
            let report = self.drain_once(ledger)?;
            total.written += report.written;
            total.dead_lettered += report.dead_lettered;
            total.still_pending = report.still_pending;

            if report.still_pending == 0 || pass > self.config.max_retries {
                break;
            }
            let delay_ms = self.config.delay_for_attempt(pass);
            info!(pass, pending = report.still_pending, delay_ms, "Retrying ledger writes");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        Ok(total)
    }

    fn persist(&self, state: &QueueState) -> Result<()> {
        match &self.path {
            Some(path) => save_json(path, state),
            None => Ok(()),
        }
    }
}
