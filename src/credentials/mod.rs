mod available;
mod store;
mod types;

pub use available::{AvailableCredentials, CredentialProvider, SpentCredentials};
pub use store::{CredentialCatalog, CredentialStore};
pub use types::{
    AffiliationMatcher, Credential, CredentialKey, CredentialKind, Evaluation, Publication, Training,
};
