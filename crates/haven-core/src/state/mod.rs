//! The state store (C1): a durable, linearizable `taskId -> AgentRecord` map
//! shared across concurrent CLI invocations on one host.
//!
//! The file is the single consistency boundary. Writers always go through
//! `update`, which takes an OS-level advisory lock on a sibling `.lock` file
//! (via `fs2`) for the duration of the read-modify-write, then persists by
//! writing a temp file, fsyncing it, and renaming it over the target —
//! never a partial write is visible to a concurrent reader.

mod record;
mod watch;

pub use record::{AgentRecord, AgentStatus, ResultStatus, WorktreeRef};
pub use watch::{watch, ChangeEvent};

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{HavenError, Result};

/// Point-in-time view of the whole store.
pub type Snapshot = BTreeMap<String, AgentRecord>;

/// Durable map of task id to agent record, backed by a single JSON file.
pub struct StateStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a point-in-time view of the store.
    ///
    /// An empty or missing file is treated as an empty map. A file that
    /// exists but fails to parse is reported as `StateCorrupt` rather than
    /// silently discarded.
    pub fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            return Ok(Snapshot::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Snapshot::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            HavenError::StateCorrupt(format!("{}: {e}", self.path.display()))
        })
    }

    /// Atomic read-modify-write. `f` receives a mutable snapshot and may
    /// insert, mutate, or remove records; the result is persisted before
    /// this call returns. Concurrent `update` calls on the same file are
    /// serialized by an advisory lock on the sibling `.lock` file.
    pub fn update<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Snapshot) -> Result<T>,
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_file = File::create(&self.lock_path)?;
        lock_file.lock_exclusive()?;

        let result = (|| {
            let mut snapshot = self.load()?;
            let out = f(&mut snapshot)?;
            self.persist(&snapshot)?;
            Ok(out)
        })();

        lock_file.unlock()?;
        result
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| HavenError::StateCorrupt(e.to_string()))?;

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(json.as_bytes())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state.json".to_string());
    name.push_str(".lock");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample_record(status: AgentStatus) -> AgentRecord {
        let mut record = AgentRecord::new(status);
        record.timeout = 600;
        record
    }

    #[test]
    fn load_missing_file_returns_empty_map() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn update_persists_across_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));

        store
            .update(|snapshot| {
                snapshot.insert("T001".into(), sample_record(AgentStatus::Spawned));
                Ok(())
            })
            .unwrap();

        let snapshot = store.load().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["T001"].status, AgentStatus::Spawned);
    }

    #[test]
    fn round_trip_without_mutation_is_byte_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        store
            .update(|snapshot| {
                snapshot.insert("T001".into(), sample_record(AgentStatus::Spawned));
                Ok(())
            })
            .unwrap();

        let before = fs::read_to_string(&store.path).unwrap();
        store.update(|_snapshot| Ok(())).unwrap();
        let after = fs::read_to_string(&store.path).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn corrupt_file_reports_state_corrupt_and_refuses_mutation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");
        fs::write(&path, "{not valid json").unwrap();
        let store = StateStore::new(path);

        assert!(matches!(store.load(), Err(HavenError::StateCorrupt(_))));
        let result = store.update(|snapshot| {
            snapshot.insert("T001".into(), sample_record(AgentStatus::Spawned));
            Ok(())
        });
        assert!(matches!(result, Err(HavenError::StateCorrupt(_))));
    }

    #[test]
    fn concurrent_updates_lose_no_mutation() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::new(tmp.path().join("state.json")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .update(|snapshot| {
                            snapshot.insert(format!("T{i:03}"), sample_record(AgentStatus::Spawned));
                            Ok(())
                        })
                        .unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = store.load().unwrap();
        assert_eq!(snapshot.len(), 8);
    }
}
