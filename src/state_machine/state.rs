use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::{PromotionRequest, StatusChange};
use crate::error::{EscalafonError, Result};

/// Lifecycle status of a promotion request.
///
/// Each request flows through: PENDIENTE → FINALIZADO, or ends in one of the
/// three rejections. An appeal opens a new request in APELACION.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pendiente,
    RechazadoPresidente,
    #[serde(rename = "RECHAZADO_TTHH")]
    RechazadoTthh,
    RechazadoComision,
    Apelacion,
    Finalizado,
}

impl RequestStatus {
    /// Open requests still await a decision or finalization.
    pub fn is_open(self) -> bool {
        matches!(self, RequestStatus::Pendiente | RequestStatus::Apelacion)
    }

    pub fn is_rejected(self) -> bool {
        matches!(
            self,
            RequestStatus::RechazadoPresidente
                | RequestStatus::RechazadoTthh
                | RequestStatus::RechazadoComision
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Pendiente => write!(f, "PENDIENTE"),
            RequestStatus::RechazadoPresidente => write!(f, "RECHAZADO_PRESIDENTE"),
            RequestStatus::RechazadoTthh => write!(f, "RECHAZADO_TTHH"),
            RequestStatus::RechazadoComision => write!(f, "RECHAZADO_COMISION"),
            RequestStatus::Apelacion => write!(f, "APELACION"),
            RequestStatus::Finalizado => write!(f, "FINALIZADO"),
        }
    }
}

/// Reviewer level that must act next.
///
/// Approvals walk: PRESIDENTE → TALENTO_HUMANO → COMISION → APROBADO
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStage {
    Presidente,
    TalentoHumano,
    Comision,
    /// Every level approved; waiting for finalization.
    Aprobado,
}

impl ReviewStage {
    pub fn next(self) -> Option<ReviewStage> {
        match self {
            ReviewStage::Presidente => Some(ReviewStage::TalentoHumano),
            ReviewStage::TalentoHumano => Some(ReviewStage::Comision),
            ReviewStage::Comision => Some(ReviewStage::Aprobado),
            ReviewStage::Aprobado => None,
        }
    }

    /// Status a rejection at this level produces.
    pub fn rejection_status(self) -> Option<RequestStatus> {
        match self {
            ReviewStage::Presidente => Some(RequestStatus::RechazadoPresidente),
            ReviewStage::TalentoHumano => Some(RequestStatus::RechazadoTthh),
            ReviewStage::Comision => Some(RequestStatus::RechazadoComision),
            ReviewStage::Aprobado => None,
        }
    }
}

impl fmt::Display for ReviewStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewStage::Presidente => write!(f, "PRESIDENTE"),
            ReviewStage::TalentoHumano => write!(f, "TALENTO_HUMANO"),
            ReviewStage::Comision => write!(f, "COMISION"),
            ReviewStage::Aprobado => write!(f, "APROBADO"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approve,
    Reject,
}

/// The result of evaluating a reviewer decision or a finalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Approved at one level; the next level must act.
    Advance(ReviewStage),
    /// Rejected at the given level.
    Reject(RequestStatus),
    /// Approved by every level and closed.
    Finalize,
}

/// Validates and applies transitions on a [`PromotionRequest`].
pub struct StateMachine;

impl StateMachine {
    /// Compute the transition for a decision by `level`.
    ///
    /// - Only open requests can be decided.
    /// - The deciding level must be the request's current stage.
    /// - A rejection needs a non-empty reason.
    pub fn decide(
        request: &PromotionRequest,
        outcome: DecisionOutcome,
        level: ReviewStage,
        reason: Option<&str>,
    ) -> Result<Transition> {
        if !request.status.is_open() {
            return Err(EscalafonError::InvalidTransition {
                request_id: request.id.clone(),
                status: request.status,
                action: "decide",
            });
        }
        if request.review_stage == ReviewStage::Aprobado {
            return Err(EscalafonError::InvalidTransition {
                request_id: request.id.clone(),
                status: request.status,
                action: "decide an already approved request",
            });
        }
        if level != request.review_stage {
            return Err(EscalafonError::WrongReviewer {
                request_id: request.id.clone(),
                expected: request.review_stage,
                actual: level,
            });
        }

        match outcome {
            DecisionOutcome::Approve => {
                let next = level.next().unwrap_or(ReviewStage::Aprobado);
                Ok(Transition::Advance(next))
            }
            DecisionOutcome::Reject => {
                if reason.is_none_or(|r| r.trim().is_empty()) {
                    return Err(EscalafonError::Validation(
                        "a rejection requires a non-empty reason".into(),
                    ));
                }
                let status = level.rejection_status().ok_or_else(|| {
                    EscalafonError::Validation(format!("{level} cannot reject"))
                })?;
                Ok(Transition::Reject(status))
            }
        }
    }

    /// Finalization is only allowed on an open request every level approved.
    pub fn finalize(request: &PromotionRequest) -> Result<Transition> {
        if request.status.is_open() && request.review_stage == ReviewStage::Aprobado {
            Ok(Transition::Finalize)
        } else {
            Err(EscalafonError::InvalidTransition {
                request_id: request.id.clone(),
                status: request.status,
                action: "finalize",
            })
        }
    }

    /// Appeals are only accepted once, on a rejected request.
    pub fn check_appeal(request: &PromotionRequest) -> Result<()> {
        if !request.status.is_rejected() {
            return Err(EscalafonError::InvalidTransition {
                request_id: request.id.clone(),
                status: request.status,
                action: "appeal",
            });
        }
        if request.superseded_by.is_some() {
            return Err(EscalafonError::AlreadyAppealed(request.id.clone()));
        }
        Ok(())
    }

    /// Apply `transition` to `request`, recording it in the history.
    pub fn apply(
        request: &mut PromotionRequest,
        transition: &Transition,
        actor: &str,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) {
        let from = request.status;
        match transition {
            Transition::Advance(stage) => {
                request.review_stage = *stage;
                if *stage == ReviewStage::Aprobado {
                    request.approval_date = Some(at);
                }
            }
            Transition::Reject(status) => {
                request.status = *status;
                request.rejection_date = Some(at);
            }
            Transition::Finalize => {
                request.status = RequestStatus::Finalizado;
                request.rank_update_pending = true;
            }
        }
        request.decided_by = Some(actor.to_string());
        if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
            request.decision_reason = Some(reason.to_string());
        }
        request.history.push(StatusChange {
            at,
            actor: actor.to_string(),
            from,
            to: request.status,
            stage: request.review_stage,
            note: reason.map(str::to_string),
        });
    }
}
