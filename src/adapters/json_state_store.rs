//! JSON file state store.
//!
//! Snapshots are written to `<path>.tmp`, fsynced, then renamed over `<path>`.
//! The store holds an exclusive advisory lock on `<path>.lock` for its whole
//! lifetime so two runners never share one state file. The kernel drops the
//! lock when the owning process dies, so a crash never leaves the state stuck.
//! The lock file itself stays on disk and records the last owner's pid.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, Write};
use std::path::{Path, PathBuf};

use crate::domain::error::BarwardenError;
use crate::domain::state::{RunState, STATE_SCHEMA_VERSION};
use crate::ports::state_port::StatePort;

#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
    lock_path: PathBuf,
    // held open for the store's lifetime; closing it releases the lock
    lock: File,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl JsonStateStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BarwardenError> {
        let path = path.as_ref().to_path_buf();
        let lock_path = with_suffix(&path, ".lock");
        let persistence = |reason: String| BarwardenError::StatePersistence {
            path: path.display().to_string(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| persistence(format!("failed to create directory: {e}")))?;
        }

        let mut lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| persistence(format!("failed to open lock file: {e}")))?;

        if let Err(e) = lock.try_lock_exclusive() {
            if e.raw_os_error() != fs2::lock_contended_error().raw_os_error() {
                return Err(persistence(format!("failed to lock {}: {e}", lock_path.display())));
            }
            let owner = fs::read_to_string(&lock_path)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .map_or_else(|| "unknown owner".to_string(), |pid| format!("pid {pid}"));
            return Err(BarwardenError::StateLocked {
                path: path.display().to_string(),
                owner,
            });
        }

        let record_owner = |lock: &mut File| -> std::io::Result<()> {
            lock.set_len(0)?;
            lock.rewind()?;
            write!(lock, "{}", std::process::id())?;
            lock.sync_all()
        };
        record_owner(&mut lock)
            .map_err(|e| persistence(format!("failed to write lock file: {e}")))?;

        tracing::debug!(path = %path.display(), "state store opened");
        Ok(Self {
            path,
            lock_path,
            lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, reason: impl Into<String>) -> BarwardenError {
        BarwardenError::StatePersistence {
            path: self.path.display().to_string(),
            reason: reason.into(),
        }
    }
}

impl StatePort for JsonStateStore {
    fn snapshot(&mut self, state: &RunState) -> Result<(), BarwardenError> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| self.error(format!("serialization failed: {e}")))?;
        let tmp_path = with_suffix(&self.path, ".tmp");

        let write_tmp = || -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()
        };
        write_tmp().map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            self.error(format!("failed to write {}: {e}", tmp_path.display()))
        })?;

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            self.error(format!("atomic rename failed: {e}"))
        })?;
        tracing::trace!(
            path = %self.path.display(),
            bytes = json.len(),
            "state snapshot written"
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<RunState>, BarwardenError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error(format!("failed to read: {e}"))),
        };
        let state: RunState = serde_json::from_slice(&bytes)
            .map_err(|e| self.error(format!("unparsable state file: {e}")))?;
        if state.schema_version != STATE_SCHEMA_VERSION {
            return Err(self.error(format!(
                "schema version {} is not supported (expected {})",
                state.schema_version, STATE_SCHEMA_VERSION
            )));
        }
        tracing::info!(
            path = %self.path.display(),
            runs = state.meta.runs,
            positions = state.positions.len(),
            "resumed run state"
        );
        Ok(Some(state))
    }
}

impl Drop for JsonStateStore {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.lock) {
            tracing::warn!(
                path = %self.lock_path.display(),
                error = %e,
                "failed to release state lock"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::Position;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn sample_state() -> RunState {
        let mut state = RunState::fresh(10_000.0);
        state.cash = 7_500.25;
        state.positions.insert(
            "BTC/USD".into(),
            Position {
                symbol: "BTC/USD".into(),
                entry_price: 42_000.5,
                size: 0.0595,
                stop_loss: 41_160.49,
                take_profit: 43_680.52,
                opened_at: Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap(),
            },
        );
        state.last_processed.insert(
            "BTC/USD".into(),
            Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap(),
        );
        state
    }

    #[test]
    fn load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonStateStore::open(dir.path().join("state.json")).unwrap();
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.load_or_init(500.0).unwrap(), RunState::fresh(500.0));
    }

    #[test]
    fn snapshot_then_load() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonStateStore::open(dir.path().join("nested/state.json")).unwrap();
        let state = sample_state();
        store.snapshot(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
        assert!(!dir.path().join("nested/state.json.tmp").exists());
    }

    #[test]
    fn second_open_is_locked_until_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let first = JsonStateStore::open(&path).unwrap();
        let err = JsonStateStore::open(&path).unwrap_err();
        match err {
            BarwardenError::StateLocked { owner, .. } => {
                assert_eq!(owner, format!("pid {}", std::process::id()));
            }
            other => panic!("expected StateLocked, got {other}"),
        }
        drop(first);
        assert!(JsonStateStore::open(&path).is_ok());
    }

    #[test]
    fn lock_left_by_a_dead_process_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let lock_path = dir.path().join("state.json.lock");
        fs::write(&lock_path, "999999").unwrap();

        let mut store = JsonStateStore::open(&path).unwrap();
        store.snapshot(&sample_state()).unwrap();
        assert_eq!(
            fs::read_to_string(&lock_path).unwrap(),
            std::process::id().to_string()
        );
        assert_eq!(store.load().unwrap(), Some(sample_state()));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let store = JsonStateStore::open(&path).unwrap();
        assert!(matches!(
            store.load(),
            Err(BarwardenError::StatePersistence { .. })
        ));
    }

    #[test]
    fn schema_mismatch_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut state = sample_state();
        state.schema_version = STATE_SCHEMA_VERSION + 1;
        fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();
        let store = JsonStateStore::open(&path).unwrap();
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("schema version"));
    }
}
