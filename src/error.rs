use thiserror::Error;

use crate::credentials::CredentialKey;
use crate::ladder::Rank;
use crate::state_machine::{RequestStatus, ReviewStage};

/// Errors surfaced by the promotion engine.
#[derive(Debug, Error)]
pub enum EscalafonError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Promotion request not found: {0}")]
    RequestNotFound(String),

    #[error("Faculty member not found: {0}")]
    FacultyNotFound(String),

    #[error("Unknown rank: {0:?}")]
    UnknownRank(String),

    #[error("{0} is the top of the rank ladder")]
    TopOfLadder(Rank),

    #[error("Invalid transition for request {request_id}: cannot {action} while {status}")]
    InvalidTransition {
        request_id: String,
        status: RequestStatus,
        action: &'static str,
    },

    #[error("Request {request_id} is waiting for {expected}, not {actual}")]
    WrongReviewer {
        request_id: String,
        expected: ReviewStage,
        actual: ReviewStage,
    },

    #[error("Faculty member {faculty_id} does not meet the requirements for {target}")]
    NotEligible { faculty_id: String, target: Rank },

    #[error("Faculty member {faculty_id} already has an open promotion request ({request_id})")]
    AlreadyPending {
        faculty_id: String,
        request_id: String,
    },

    #[error("Request {request_id} promoted {faculty_id} but the rank update has not been applied yet")]
    RankUpdatePending {
        faculty_id: String,
        request_id: String,
    },

    #[error("Request {0} was already appealed")]
    AlreadyAppealed(String),

    #[error("Concurrent update on request {0}")]
    ConcurrentUpdate(String),

    #[error("Credential {0} was already consumed by a finalized promotion")]
    AlreadyConsumed(CredentialKey),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, EscalafonError>;

/// How a caller should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorClass {
    /// Malformed input; do not retry.
    Validation,
    /// Conflicts with existing state; do not retry blindly.
    Conflict,
    /// Storage, network or configuration trouble; may succeed later.
    Infrastructure,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Validation => write!(f, "Validation"),
            ErrorClass::Conflict => write!(f, "Conflict"),
            ErrorClass::Infrastructure => write!(f, "Infrastructure"),
        }
    }
}

impl EscalafonError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EscalafonError::Validation(_)
            | EscalafonError::RequestNotFound(_)
            | EscalafonError::FacultyNotFound(_)
            | EscalafonError::UnknownRank(_)
            | EscalafonError::TopOfLadder(_)
            | EscalafonError::InvalidTransition { .. }
            | EscalafonError::WrongReviewer { .. }
            | EscalafonError::NotEligible { .. } => ErrorClass::Validation,
            EscalafonError::AlreadyPending { .. }
            | EscalafonError::AlreadyAppealed(_)
            | EscalafonError::RankUpdatePending { .. }
            | EscalafonError::ConcurrentUpdate(_)
            | EscalafonError::AlreadyConsumed(_) => ErrorClass::Conflict,
            EscalafonError::Storage(_)
            | EscalafonError::Notification(_)
            | EscalafonError::Http(_)
            | EscalafonError::Io(_)
            | EscalafonError::Json(_)
            | EscalafonError::Toml(_) => ErrorClass::Infrastructure,
        }
    }
}
