//! Docentes y las interfaces externas que los rodean.
//!
//! El motor solo lee al docente ([`FacultyDirectory`]), pregunta desde cuándo
//! ocupa su categoría actual ([`RankStartSource`]) y, al finalizar una
//! promoción, actualiza su categoría una sola vez ([`RankUpdateSink`]).
//! [`FacultyRoster`] implementa las tres sobre memoria o `faculty.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EscalafonError, Result};
use crate::ladder::Rank;
use crate::storage::{load_json, lock, save_json};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacultyMember {
    /// National ID (cédula).
    pub id: String,
    pub name: String,
    pub email: String,
    pub current_rank: Rank,
    /// Start of the current rank according to the HR system of record.
    #[serde(default)]
    pub rank_started_on: Option<NaiveDate>,
    #[serde(default)]
    pub account_created_on: Option<NaiveDate>,
}

pub trait FacultyDirectory: Send + Sync {
    fn find(&self, faculty_id: &str) -> Result<Option<FacultyMember>>;
}

/// Receives the single rank change of a successful finalization.
pub trait RankUpdateSink: Send + Sync {
    fn set_rank(&self, faculty_id: &str, rank: Rank, effective_on: NaiveDate) -> Result<()>;
}

/// Where a rank start date came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartDateSource {
    /// HR system of record.
    HumanResources,
    /// Account creation date, used when HR has nothing. Weaker signal.
    AccountCreation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankStart {
    pub date: NaiveDate,
    pub source: StartDateSource,
}

pub trait RankStartSource: Send + Sync {
    fn hr_rank_start(&self, faculty_id: &str) -> Result<Option<NaiveDate>>;
    fn account_created(&self, faculty_id: &str) -> Result<Option<NaiveDate>>;

    /// HR date when present, otherwise the account creation date.
    fn rank_start(&self, faculty_id: &str) -> Result<Option<RankStart>> {
        if let Some(date) = self.hr_rank_start(faculty_id)? {
            return Ok(Some(RankStart {
                date,
                source: StartDateSource::HumanResources,
            }));
        }
        Ok(self.account_created(faculty_id)?.map(|date| RankStart {
            date,
            source: StartDateSource::AccountCreation,
        }))
    }
}

/// In-memory faculty table, optionally mirrored to a JSON file.
#[derive(Debug, Default)]
pub struct FacultyRoster {
    members: Mutex<BTreeMap<String, FacultyMember>>,
    path: Option<PathBuf>,
}

impl FacultyRoster {
    pub fn new(members: impl IntoIterator<Item = FacultyMember>) -> Self {
        Self {
            members: Mutex::new(members.into_iter().map(|m| (m.id.clone(), m)).collect()),
            path: None,
        }
    }

    /// Loads `faculty.json` (a list of members) and writes rank changes back.
    pub fn open(path: &Path) -> Result<Self> {
        let members: Vec<FacultyMember> = load_json(path)?;
        let mut roster = Self::new(members);
        roster.path = Some(path.to_path_buf());
        Ok(roster)
    }
}

impl FacultyDirectory for FacultyRoster {
    fn find(&self, faculty_id: &str) -> Result<Option<FacultyMember>> {
        Ok(lock(&self.members, "faculty")?.get(faculty_id).cloned())
    }
}

impl RankUpdateSink for FacultyRoster {
    fn set_rank(&self, faculty_id: &str, rank: Rank, effective_on: NaiveDate) -> Result<()> {
        let mut members = lock(&self.members, "faculty")?;
        let member = members
            .get_mut(faculty_id)
            .ok_or_else(|| EscalafonError::FacultyNotFound(faculty_id.to_string()))?;

        let previous = member.current_rank;
        member.current_rank = rank;
        member.rank_started_on = Some(effective_on);
        info!(faculty_id, from = %previous, to = %rank, "Rank updated");

        if let Some(path) = &self.path {
            let list: Vec<&FacultyMember> = members.values().collect();
            save_json(path, &list)?;
        }
        Ok(())
    }
}

impl RankStartSource for FacultyRoster {
    fn hr_rank_start(&self, faculty_id: &str) -> Result<Option<NaiveDate>> {
        Ok(self.find(faculty_id)?.and_then(|m| m.rank_started_on))
    }

    fn account_created(&self, faculty_id: &str) -> Result<Option<NaiveDate>> {
        Ok(self.find(faculty_id)?.and_then(|m| m.account_created_on))
    }
}
