//! Durable storage for the single incident record
//!
//! The record is a small JSON document. Writes go to a temporary sibling file
//! that is renamed over the real one, so a crash mid-write leaves either the
//! old record or the new one. Overlapping runs are serialized with an
//! exclusive advisory lock on a `<state>.lock` sidecar file.

use crate::error::StateError;
use crate::incident::IncidentState;
use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Storage backend for the incident record
#[cfg_attr(test, mockall::automock)]
pub trait StateStore: Send + Sync {
    /// Read the record; a missing record is the all-clear record
    fn load(&self) -> Result<IncidentState, StateError>;

    /// Replace the record
    fn save(&self, state: &IncidentState) -> Result<(), StateError>;

    /// Hold the record exclusively until the returned guard is dropped
    fn lock(&self) -> Result<StoreLock, StateError>;
}

/// Guard for an exclusive hold on the state record
#[derive(Debug)]
pub struct StoreLock {
    file: Option<File>,
}

impl StoreLock {
    /// A guard that holds nothing, for stores without cross-process access
    pub fn none() -> Self {
        Self { file: None }
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    #[cfg(unix)]
    fn acquire(path: &Path) -> Result<Self, StateError> {
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| StateError::Lock(format!("{}: {}", path.display(), e)))?;

        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(StateError::Lock(format!(
                "{}: {}",
                path.display(),
                std::io::Error::last_os_error()
            )));
        }

        Ok(Self { file: Some(file) })
    }

    #[cfg(not(unix))]
    fn acquire(_path: &Path) -> Result<Self, StateError> {
        Ok(Self::none())
    }

    #[cfg(unix)]
    fn release(&mut self) {
        use std::os::unix::io::AsRawFd;

        if let Some(file) = self.file.take() {
            // SAFETY: the descriptor is owned by `file`, which is closed right after.
            unsafe {
                libc::flock(file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }

    #[cfg(not(unix))]
    fn release(&mut self) {
        self.file = None;
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// JSON file backed store
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<IncidentState, StateError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    "No state file at {}, starting from all-clear",
                    self.path.display()
                );
                return Ok(IncidentState::inactive());
            }
            Err(e) => {
                return Err(StateError::Read(format!("{}: {}", self.path.display(), e)));
            }
        };

        let state: IncidentState = serde_json::from_str(&contents)
            .map_err(|e| StateError::Corrupt(format!("{}: {}", self.path.display(), e)))?;

        Ok(state.normalized())
    }

    fn save(&self, state: &IncidentState) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::Write(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| StateError::Write(format!("{}: {}", parent.display(), e)))?;
            }
        }

        let temp_path = self.temp_path();
        let write_result = (|| -> std::io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&temp_path);
            return Err(StateError::Write(format!("{}: {}", self.path.display(), e)));
        }

        debug!("Wrote incident state to {}", self.path.display());
        Ok(())
    }

    fn lock(&self) -> Result<StoreLock, StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| StateError::Lock(format!("{}: {}", parent.display(), e)))?;
            }
        }
        StoreLock::acquire(&self.lock_path())
    }
}
