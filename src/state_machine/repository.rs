use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::request::PromotionRequest;
use crate::error::{EscalafonError, Result};
use crate::storage::{load_json, lock, save_json};

/// Storage for promotion requests.
///
/// Uniqueness and version checks happen inside the repository under one
/// lock, never as read-then-write in the caller.
pub trait RequestRepository: Send + Sync {
    /// Inserts `request` unless its faculty member already has an open one.
    fn insert_open(&self, request: PromotionRequest) -> Result<PromotionRequest>;

    fn get(&self, request_id: &str) -> Result<Option<PromotionRequest>>;

    /// Replaces the stored request if its version is still `expected_version`.
    /// Returns the stored copy with its version bumped.
    fn update(&self, request: PromotionRequest, expected_version: u64) -> Result<PromotionRequest>;

    /// Stores the updated rejected `original` and inserts its `appeal` in one
    /// step, with the same checks as [`update`](Self::update) and
    /// [`insert_open`](Self::insert_open).
    fn supersede(
        &self,
        original: PromotionRequest,
        expected_version: u64,
        appeal: PromotionRequest,
    ) -> Result<(PromotionRequest, PromotionRequest)>;

    /// Requests of one faculty member, oldest submission first.
    fn for_faculty(&self, faculty_id: &str) -> Result<Vec<PromotionRequest>>;

    fn all(&self) -> Result<Vec<PromotionRequest>>;
}

/// In-memory request table, optionally mirrored to `requests.json`.
#[derive(Debug, Default)]
pub struct MemoryRequestRepository {
    requests: Mutex<Vec<PromotionRequest>>,
    path: Option<PathBuf>,
}

impl MemoryRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            requests: Mutex::new(load_json(path)?),
            path: Some(path.to_path_buf()),
        })
    }

    fn persist(&self, requests: &[PromotionRequest]) -> Result<()> {
        match &self.path {
            Some(path) => save_json(path, &requests),
            None => Ok(()),
        }
    }
}

fn open_conflict(requests: &[PromotionRequest], faculty_id: &str) -> Result<()> {
    match requests.iter().find(|r| r.faculty_id == faculty_id && r.is_open()) {
        Some(open) => Err(EscalafonError::AlreadyPending {
            faculty_id: faculty_id.to_string(),
            request_id: open.id.clone(),
        }),
        None => Ok(()),
    }
}

fn position_checked(requests: &[PromotionRequest], id: &str, expected_version: u64) -> Result<usize> {
    let idx = requests
        .iter()
        .position(|r| r.id == id)
        .ok_or_else(|| EscalafonError::RequestNotFound(id.to_string()))?;
    if requests[idx].version != expected_version {
        return Err(EscalafonError::ConcurrentUpdate(id.to_string()));
    }
    Ok(idx)
}

impl RequestRepository for MemoryRequestRepository {
    fn insert_open(&self, request: PromotionRequest) -> Result<PromotionRequest> {
        let mut requests = lock(&self.requests, "request repository")?;
        open_conflict(&requests, &request.faculty_id)?;

        requests.push(request.clone());
        if let Err(e) = self.persist(&requests) {
            requests.pop();
            return Err(e);
        }
        Ok(request)
    }

    fn get(&self, request_id: &str) -> Result<Option<PromotionRequest>> {
        let requests = lock(&self.requests, "request repository")?;
        Ok(requests.iter().find(|r| r.id == request_id).cloned())
    }

    fn update(&self, mut request: PromotionRequest, expected_version: u64) -> Result<PromotionRequest> {
        let mut requests = lock(&self.requests, "request repository")?;
        let idx = position_checked(&requests, &request.id, expected_version)?;

        request.version = expected_version + 1;
        let previous = std::mem::replace(&mut requests[idx], request.clone());
        if let Err(e) = self.persist(&requests) {
            requests[idx] = previous;
            return Err(e);
        }
        Ok(request)
    }

    fn supersede(
        &self,
        mut original: PromotionRequest,
        expected_version: u64,
        appeal: PromotionRequest,
    ) -> Result<(PromotionRequest, PromotionRequest)> {
        let mut requests = lock(&self.requests, "request repository")?;
        let idx = position_checked(&requests, &original.id, expected_version)?;
        open_conflict(&requests, &appeal.faculty_id)?;

        original.version = expected_version + 1;
        let previous = std::mem::replace(&mut requests[idx], original.clone());
        requests.push(appeal.clone());
        if let Err(e) = self.persist(&requests) {
            requests.pop();
            requests[idx] = previous;
            return Err(e);
        }
        Ok((original, appeal))
    }

    fn for_faculty(&self, faculty_id: &str) -> Result<Vec<PromotionRequest>> {
        let requests = lock(&self.requests, "request repository")?;
        let mut found: Vec<_> = requests
            .iter()
            .filter(|r| r.faculty_id == faculty_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.submitted_at);
        Ok(found)
    }

    fn all(&self) -> Result<Vec<PromotionRequest>> {
        Ok(lock(&self.requests, "request repository")?.clone())
    }
}
