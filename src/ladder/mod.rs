mod rank;
mod requirements;

pub use rank::Rank;
pub(crate) use rank::normalize;
pub use requirements::{RankRequirementConfig, Resolution, resolve_requirements};
