//! Persistencia en archivos JSON bajo el directorio de datos.
//!
//! Cada tabla se guarda completa en un archivo propio. La escritura pasa por
//! un archivo temporal y un `rename`, de modo que un lector nunca ve un JSON
//! a medio escribir.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{EscalafonError, Result};

pub const FACULTY_FILE: &str = "faculty.json";
pub const CREDENTIALS_FILE: &str = "credentials.json";
pub const REQUESTS_FILE: &str = "requests.json";
pub const LEDGER_FILE: &str = "ledger.json";
pub const LEDGER_RETRY_FILE: &str = "ledger_retry.json";

/// Reads `path` as JSON, or returns `T::default()` if the file does not exist.
pub fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&contents)?)
}

/// Writes `value` to `path` as pretty JSON through a sibling temp file.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Locks `mutex`, turning poisoning into a storage error.
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| EscalafonError::Storage(format!("{what} lock poisoned")))
}
