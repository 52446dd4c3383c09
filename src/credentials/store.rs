use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::{Evaluation, Publication, Training};
use crate::error::Result;
use crate::storage::load_json;

/// Source of a faculty member's credential records.
///
/// Implementations return the full, unfiltered set; availability filtering
/// and ordering happen in [`super::CredentialProvider`].
pub trait CredentialStore: Send + Sync {
    fn publications(&self, faculty_id: &str) -> Result<Vec<Publication>>;
    fn evaluations(&self, faculty_id: &str) -> Result<Vec<Evaluation>>;
    fn trainings(&self, faculty_id: &str) -> Result<Vec<Training>>;
}

/// In-memory credential records, loadable from `credentials.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialCatalog {
    #[serde(default)]
    pub publications: Vec<Publication>,
    #[serde(default)]
    pub evaluations: Vec<Evaluation>,
    #[serde(default)]
    pub trainings: Vec<Training>,
}

impl CredentialCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    pub fn with_publication(mut self, publication: Publication) -> Self {
        self.publications.push(publication);
        self
    }

    pub fn with_evaluation(mut self, evaluation: Evaluation) -> Self {
        self.evaluations.push(evaluation);
        self
    }

    pub fn with_training(mut self, training: Training) -> Self {
        self.trainings.push(training);
        self
    }
}

impl CredentialStore for CredentialCatalog {
    fn publications(&self, faculty_id: &str) -> Result<Vec<Publication>> {
        Ok(self
            .publications
            .iter()
            .filter(|p| p.faculty_id == faculty_id)
            .cloned()
            .collect())
    }

    fn evaluations(&self, faculty_id: &str) -> Result<Vec<Evaluation>> {
        Ok(self
            .evaluations
            .iter()
            .filter(|e| e.faculty_id == faculty_id)
            .cloned()
            .collect())
    }

    fn trainings(&self, faculty_id: &str) -> Result<Vec<Training>> {
        Ok(self
            .trainings
            .iter()
            .filter(|t| t.faculty_id == faculty_id)
            .cloned()
            .collect())
    }
}
