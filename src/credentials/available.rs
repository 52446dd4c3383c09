use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::store::CredentialStore;
use super::types::{Credential, CredentialKey, CredentialKind, Evaluation, Publication, Training};
use crate::error::Result;

/// Keys already tied to a finalized promotion (or waiting to be written).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpentCredentials {
    keys: BTreeSet<CredentialKey>,
}

impl SpentCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: CredentialKey) {
        self.keys.insert(key);
    }

    pub fn extend_ids(&mut self, kind: CredentialKind, ids: impl IntoIterator<Item = u64>) {
        self.keys.extend(ids.into_iter().map(|id| CredentialKey::new(kind, id)));
    }

    pub fn contains(&self, kind: CredentialKind, id: u64) -> bool {
        self.keys.contains(&CredentialKey::new(kind, id))
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }
}

impl FromIterator<CredentialKey> for SpentCredentials {
    fn from_iter<I: IntoIterator<Item = CredentialKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// A faculty member's credentials, each list ordered oldest-first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailableCredentials {
    pub publications: Vec<Publication>,
    pub evaluations: Vec<Evaluation>,
    pub trainings: Vec<Training>,
}

impl AvailableCredentials {
    pub fn total(&self) -> usize {
        self.publications.len() + self.evaluations.len() + self.trainings.len()
    }

    pub fn keys(&self) -> Vec<CredentialKey> {
        self.iter().map(|c| c.key()).collect()
    }

    /// Every credential as the tagged union, in kind order then list order.
    pub fn iter(&self) -> impl Iterator<Item = Credential> + '_ {
        self.publications
            .iter()
            .cloned()
            .map(Credential::Publication)
            .chain(self.evaluations.iter().cloned().map(Credential::Evaluation))
            .chain(self.trainings.iter().cloned().map(Credential::Training))
    }
}

/// Wraps a [`CredentialStore`] with the availability filter and the
/// oldest-first ordering.
///
/// Spending the longest-held evidence first keeps the newest credentials for
/// later promotions, so every list is sorted by its natural date ascending
/// with the id as tie-breaker.
pub struct CredentialProvider<'a> {
    store: &'a dyn CredentialStore,
}

impl<'a> CredentialProvider<'a> {
    pub fn new(store: &'a dyn CredentialStore) -> Self {
        Self { store }
    }

    /// All credentials of `faculty_id`, consumed or not.
    pub fn all(&self, faculty_id: &str) -> Result<AvailableCredentials> {
        self.available(faculty_id, &SpentCredentials::new())
    }

    /// Credentials of `faculty_id` not present in `spent`.
    pub fn available(&self, faculty_id: &str, spent: &SpentCredentials) -> Result<AvailableCredentials> {
        Ok(AvailableCredentials {
            publications: self.available_publications(faculty_id, spent)?,
            evaluations: self.available_evaluations(faculty_id, spent)?,
            trainings: self.available_trainings(faculty_id, spent)?,
        })
    }

    pub fn available_publications(
        &self,
        faculty_id: &str,
        spent: &SpentCredentials,
    ) -> Result<Vec<Publication>> {
        let mut items: Vec<Publication> = self
            .store
            .publications(faculty_id)?
            .into_iter()
            .filter(|p| !spent.contains(CredentialKind::Publication, p.id))
            .collect();
        items.sort_by_key(|p| (p.date, p.id));
        Ok(items)
    }

    pub fn available_evaluations(
        &self,
        faculty_id: &str,
        spent: &SpentCredentials,
    ) -> Result<Vec<Evaluation>> {
        let mut items: Vec<Evaluation> = self
            .store
            .evaluations(faculty_id)?
            .into_iter()
            .filter(|e| !spent.contains(CredentialKind::Evaluation, e.id))
            .collect();
        items.sort_by_key(|e| (e.year, e.term, e.id));
        Ok(items)
    }

    pub fn available_trainings(
        &self,
        faculty_id: &str,
        spent: &SpentCredentials,
    ) -> Result<Vec<Training>> {
        let mut items: Vec<Training> = self
            .store
            .trainings(faculty_id)?
            .into_iter()
            .filter(|t| !spent.contains(CredentialKind::Training, t.id))
            .collect();
        items.sort_by_key(|t| (t.start_date, t.id));
        Ok(items)
    }
}
