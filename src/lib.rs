//! escalafon: motor de promoción docente.
//!
//! Verifica la elegibilidad de un docente para la categoría siguiente, lleva
//! la solicitud por la cadena de revisión y, al finalizarla, consume una sola
//! vez las credenciales que la respaldan.

pub mod cli;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod eligibility;
pub mod error;
pub mod faculty;
pub mod ladder;
pub mod ledger;
pub mod notify;
pub mod selector;
pub mod state_machine;
pub mod storage;
pub mod ui;
pub mod workflow;

pub use error::{ErrorClass, EscalafonError, Result};
pub use workflow::{FinalizeOutcome, PromotionService, RankRetryReport, Stores};
