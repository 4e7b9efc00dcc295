//! Run claims (§3): a small YAML blob recorded under the runs directory
//! before a child spawns, whose presence indicates a task is actively being
//! worked. A claim is orphan iff its `pid` is no longer alive; orphans are
//! garbage-collected the next time a claim is attempted (§5).

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunClaim {
    pub task_id: String,
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub pid: u32,
}

impl RunClaim {
    pub fn new(task_id: &str, operation: &str, pid: u32) -> Self {
        Self {
            task_id: task_id.to_string(),
            operation: operation.to_string(),
            started_at: Utc::now(),
            pid,
        }
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let yaml = serde_yaml::to_string(self).map_err(|e| {
            crate::error::HavenError::Artifact(format!("failed to serialize run claim: {e}"))
        })?;
        tokio::fs::write(path, yaml).await?;
        Ok(())
    }

    pub async fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(path).await?;
        let claim: Self = serde_yaml::from_str(&raw).map_err(|e| {
            crate::error::HavenError::Artifact(format!("malformed run claim: {e}"))
        })?;
        Ok(Some(claim))
    }

    pub async fn clear(path: &Path) -> Result<()> {
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    /// `true` when the recorded pid no longer belongs to a live process.
    pub fn is_orphan(&self) -> bool {
        !pid_alive(self.pid)
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    // Signal 0 performs no-op existence/permission checks only.
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

/// Claim the run, clearing any orphaned prior claim first. Returns an error
/// if a live claim already exists for this task.
pub async fn claim_run(path: &Path, task_id: &str, operation: &str, pid: u32) -> Result<()> {
    if let Some(existing) = RunClaim::read(path).await? {
        if existing.is_orphan() {
            tracing::info!(task = task_id, prior_pid = existing.pid, "clearing orphaned run claim");
            RunClaim::clear(path).await?;
        } else {
            return Err(crate::error::HavenError::AlreadyRunning(format!(
                "task {task_id} already claimed by pid {} for operation '{}'",
                existing.pid, existing.operation
            )));
        }
    }
    RunClaim::new(task_id, operation, pid).write(path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("T001.run");
        let claim = RunClaim::new("T001", "spawn", std::process::id());
        claim.write(&path).await.unwrap();

        let read_back = RunClaim::read(&path).await.unwrap().unwrap();
        assert_eq!(read_back.task_id, "T001");
        assert_eq!(read_back.pid, std::process::id());
    }

    #[tokio::test]
    async fn read_missing_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let result = RunClaim::read(&tmp.path().join("missing.run")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn own_pid_is_not_orphan() {
        let claim = RunClaim::new("T001", "spawn", std::process::id());
        assert!(!claim.is_orphan());
    }

    #[tokio::test]
    async fn dead_pid_is_orphan() {
        let claim = RunClaim::new("T001", "spawn", 999_999_999);
        assert!(claim.is_orphan());
    }

    #[tokio::test]
    async fn claim_run_rejects_live_claim() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("T001.run");
        claim_run(&path, "T001", "spawn", std::process::id()).await.unwrap();

        let result = claim_run(&path, "T001", "reap", std::process::id()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn claim_run_clears_orphaned_claim() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("T001.run");
        claim_run(&path, "T001", "spawn", 999_999_999).await.unwrap();

        // Should succeed: the prior claim's pid is dead.
        claim_run(&path, "T001", "spawn", std::process::id()).await.unwrap();
        let claim = RunClaim::read(&path).await.unwrap().unwrap();
        assert_eq!(claim.pid, std::process::id());
    }
}
