//! Classification of a task's worktree/branch pair against trunk (§4.2).
//!
//! This is the sole input to the spawn and reap decision tables — nothing
//! downstream re-derives worktree state from scratch.

use super::{naming, WorktreeError, WorktreeManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Absent,
    CleanNoncontributing,
    Dirty,
    Ahead,
    AlreadyMergedClean,
    AlreadyMergedDirty,
}

pub async fn classify(
    manager: &WorktreeManager,
    task_id: &str,
) -> Result<Classification, WorktreeError> {
    let wt_path = manager.worktree_path(task_id);
    if !wt_path.exists() {
        return Ok(Classification::Absent);
    }

    let branch = naming::task_branch(task_id);
    let porcelain = manager
        .run_git_in(&wt_path, &["status", "--porcelain"])
        .await?;
    let dirty = !porcelain.trim().is_empty();

    let already_merged = is_ancestor(manager, &branch, manager.trunk()).await?;

    if already_merged {
        return Ok(if dirty {
            Classification::AlreadyMergedDirty
        } else {
            Classification::AlreadyMergedClean
        });
    }

    if dirty {
        return Ok(Classification::Dirty);
    }

    let trunk_is_ancestor = is_ancestor(manager, manager.trunk(), &branch).await?;
    if !trunk_is_ancestor {
        // Trunk moved since branch diverged and branch has no unmerged
        // commits on top of it, or the branch never committed anything.
        return Ok(Classification::CleanNoncontributing);
    }

    let spec = format!("{}..{}", manager.trunk(), branch);
    let ahead_log = manager.run_git(&["log", "--oneline", &spec]).await?;
    if ahead_log.trim().is_empty() {
        Ok(Classification::CleanNoncontributing)
    } else {
        Ok(Classification::Ahead)
    }
}

async fn is_ancestor(
    manager: &WorktreeManager,
    ancestor: &str,
    descendant: &str,
) -> Result<bool, WorktreeError> {
    let output = tokio::process::Command::new("git")
        .args(["merge-base", "--is-ancestor", ancestor, descendant])
        .current_dir(manager.repo_root())
        .output()
        .await?;
    Ok(output.status.success())
}
