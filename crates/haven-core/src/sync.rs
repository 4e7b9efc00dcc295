//! Sync (§6 `sync [--dry-run]`, §7(a) reconciliation): reconcile the state
//! store against what's actually on disk — worktrees without a record, live
//! records whose pid has died without anyone observing it, and orphaned run
//! claims — so an operator can recover from a lost or stale state file
//! without hand-editing JSON.

use std::path::Path;

use crate::error::Result;
use crate::haven_layout::HavenLayout;
use crate::run_claim::RunClaim;
use crate::state::{AgentRecord, AgentStatus, StateStore, WorktreeRef};
use crate::worktree::WorktreeManager;

#[derive(Debug, Clone)]
pub struct SyncEntry {
    pub task_id: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub added: Vec<SyncEntry>,
    pub updated: Vec<SyncEntry>,
    pub orphaned: Vec<SyncEntry>,
}

fn pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

fn task_id_from_worktree_path(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
}

/// Reconcile worktrees, live records, and run claims against disk. Without
/// `dry_run`, mutates the state store and run claim directory to match what
/// was found; with it, only reports what would change.
pub async fn sync(
    layout: &HavenLayout,
    store: &StateStore,
    worktree_mgr: &WorktreeManager,
    dry_run: bool,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    let worktrees = worktree_mgr.list_worktrees().await.map_err(|e| {
        crate::error::HavenError::Artifact(format!("failed to list worktrees: {e}"))
    })?;
    let worktrees_dir = worktree_mgr.worktrees_dir();

    let snapshot = store.load()?;
    let mut additions: Vec<(String, AgentRecord)> = Vec::new();

    for entry in &worktrees {
        if !entry.path.starts_with(worktrees_dir) {
            continue;
        }
        let Some(task_id) = task_id_from_worktree_path(&entry.path) else {
            continue;
        };
        if snapshot.contains_key(&task_id) {
            continue;
        }

        report.added.push(SyncEntry {
            task_id: task_id.clone(),
            detail: format!("worktree at {} with no state record", entry.path.display()),
        });

        let mut record = AgentRecord::new(AgentStatus::Completed);
        record.worktree = Some(WorktreeRef {
            path: entry.path.to_string_lossy().into_owned(),
            branch: entry.branch.clone(),
            base_branch: worktree_mgr.trunk().to_string(),
            branching: "inferred".to_string(),
            resumed: true,
        });
        additions.push((task_id, record));
    }

    let mut updates: Vec<String> = Vec::new();
    for (task_id, record) in snapshot.iter() {
        if !record.is_alive_status() {
            continue;
        }
        let Some(pid) = record.pid else { continue };
        if pid_alive(pid) {
            continue;
        }
        report.updated.push(SyncEntry {
            task_id: task_id.clone(),
            detail: format!("pid {pid} no longer alive but record still shows {:?}", record.status),
        });
        updates.push(task_id.clone());
    }

    let mut orphan_claims: Vec<std::path::PathBuf> = Vec::new();
    let runs_dir = layout.runs_dir();
    if runs_dir.exists() {
        let mut read_dir = tokio::fs::read_dir(&runs_dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("run") {
                continue;
            }
            let Some(claim) = RunClaim::read(&path).await? else {
                continue;
            };
            if claim.is_orphan() {
                report.orphaned.push(SyncEntry {
                    task_id: claim.task_id.clone(),
                    detail: format!("orphaned run claim for pid {}", claim.pid),
                });
                orphan_claims.push(path);
            }
        }
    }

    if dry_run {
        return Ok(report);
    }

    if !additions.is_empty() || !updates.is_empty() {
        store.update(move |snapshot| {
            for (task_id, record) in additions {
                snapshot.insert(task_id, record);
            }
            for task_id in updates {
                if let Some(r) = snapshot.get_mut(&task_id) {
                    r.status = AgentStatus::Orphaned;
                    r.pid = None;
                }
            }
            Ok(())
        })?;
    }

    for path in orphan_claims {
        RunClaim::clear(&path).await?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BranchingStrategy;
    use crate::git_exec::run_git;

    async fn init_repo(path: &Path) {
        tokio::fs::create_dir_all(path).await.unwrap();
        run_git(&["init", "-b", "main"], path).await.unwrap();
        run_git(&["config", "user.email", "t@example.com"], path).await.unwrap();
        run_git(&["config", "user.name", "t"], path).await.unwrap();
        tokio::fs::write(path.join("README.md"), "x").await.unwrap();
        run_git(&["add", "."], path).await.unwrap();
        run_git(&["commit", "-m", "init"], path).await.unwrap();
    }

    fn layout_and_store(tmp: &Path) -> (HavenLayout, StateStore) {
        let layout = HavenLayout::new(tmp.join(".haven"));
        let store = StateStore::new(layout.state_path());
        (layout, store)
    }

    #[tokio::test]
    async fn dry_run_reports_worktree_without_mutating() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path()).await;
        let (layout, store) = layout_and_store(tmp.path());
        let worktree_mgr = WorktreeManager::new(
            tmp.path().to_path_buf(),
            layout.worktrees_dir(),
            "main".into(),
            BranchingStrategy::Flat,
        );

        let wt_path = layout.worktree_dir("T005");
        tokio::fs::create_dir_all(wt_path.parent().unwrap()).await.unwrap();
        run_git(
            &[
                "worktree",
                "add",
                "-b",
                "task/T005",
                wt_path.to_str().unwrap(),
            ],
            tmp.path(),
        )
        .await
        .unwrap();

        let report = sync(&layout, &store, &worktree_mgr, true).await.unwrap();
        assert!(report.added.iter().any(|e| e.task_id == "T005"));
        assert!(store.load().unwrap().get("T005").is_none());
    }

    #[tokio::test]
    async fn real_run_persists_added_worktree() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path()).await;
        let (layout, store) = layout_and_store(tmp.path());
        let worktree_mgr = WorktreeManager::new(
            tmp.path().to_path_buf(),
            layout.worktrees_dir(),
            "main".into(),
            BranchingStrategy::Flat,
        );

        let wt_path = layout.worktree_dir("T006");
        tokio::fs::create_dir_all(wt_path.parent().unwrap()).await.unwrap();
        run_git(
            &[
                "worktree",
                "add",
                "-b",
                "task/T006",
                wt_path.to_str().unwrap(),
            ],
            tmp.path(),
        )
        .await
        .unwrap();

        let report = sync(&layout, &store, &worktree_mgr, false).await.unwrap();
        assert!(report.added.iter().any(|e| e.task_id == "T006"));

        let snapshot = store.load().unwrap();
        let record = snapshot.get("T006").unwrap();
        assert_eq!(record.status, AgentStatus::Completed);
        assert!(record.worktree.is_some());
    }

    #[tokio::test]
    async fn dead_pid_on_live_record_reported_and_marked_orphaned() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path()).await;
        let (layout, store) = layout_and_store(tmp.path());
        let worktree_mgr = WorktreeManager::new(
            tmp.path().to_path_buf(),
            layout.worktrees_dir(),
            "main".into(),
            BranchingStrategy::Flat,
        );

        store
            .update(|s| {
                let mut record = AgentRecord::new(AgentStatus::Running);
                record.pid = Some(999_999_999);
                s.insert("T007".into(), record);
                Ok(())
            })
            .unwrap();

        let report = sync(&layout, &store, &worktree_mgr, false).await.unwrap();
        assert!(report.updated.iter().any(|e| e.task_id == "T007"));

        let snapshot = store.load().unwrap();
        assert_eq!(snapshot["T007"].status, AgentStatus::Orphaned);
        assert!(snapshot["T007"].pid.is_none());
    }

    #[tokio::test]
    async fn orphaned_run_claim_is_cleared() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path()).await;
        let (layout, store) = layout_and_store(tmp.path());
        let worktree_mgr = WorktreeManager::new(
            tmp.path().to_path_buf(),
            layout.worktrees_dir(),
            "main".into(),
            BranchingStrategy::Flat,
        );

        let claim_path = layout.run_claim_path("T008");
        RunClaim::new("T008", "spawn", 999_999_999)
            .write(&claim_path)
            .await
            .unwrap();

        let report = sync(&layout, &store, &worktree_mgr, false).await.unwrap();
        assert!(report.orphaned.iter().any(|e| e.task_id == "T008"));
        assert!(!claim_path.exists());
    }
}
