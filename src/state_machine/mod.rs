mod repository;
mod request;
mod state;

pub use repository::{MemoryRequestRepository, RequestRepository};
pub use request::{PromotionRequest, StatusChange};
pub use state::{DecisionOutcome, RequestStatus, ReviewStage, StateMachine, Transition};
