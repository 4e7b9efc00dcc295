//! Reap pipeline (C5): wait -> classify -> (auto-commit) -> merge -> transition
//! task -> record (§4.5). The decision table for a *new* spawn finding a
//! prior record lives in [`crate::spawn::decide_prior_record`]; this module
//! covers reconciling a run that has already finished or is being force-
//! reaped.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collaborators::Artefacts;
use crate::config::MergeStrategy;
use crate::diagnose::{self, DiagnoseReport};
use crate::error::{HavenError, Result};
use crate::escalation::{Escalation, OpResult, Outcome};
use crate::haven_layout::HavenLayout;
use crate::log_tail::SummaryWidths;
use crate::noise_filter::FilterScope;
use crate::state::{AgentStatus, ResultStatus, StateStore};
use crate::worktree::{Classification, WorktreeManager};

/// How often the reap wait loop polls for completion (§4.5 step 1).
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct ReapOptions {
    /// If the record still has a live pid: wait up to `timeout` rather than
    /// escalating immediately.
    pub wait: bool,
    pub timeout_override: Option<u64>,
    pub cleanup_worktree_after: bool,
}

/// Read from the child's result file (`result.yaml`); `completed | failed |
/// blocked`, defaulting to `completed` when absent (§4.5 step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFile {
    pub status: ResultStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ResultFile {
    pub async fn read(path: &Path) -> Result<ResultStatus> {
        if !path.exists() {
            return Ok(ResultStatus::Completed);
        }
        let raw = tokio::fs::read_to_string(path).await?;
        let file: Self = serde_yaml::from_str(&raw)
            .map_err(|e| HavenError::Artifact(format!("malformed result file: {e}")))?;
        Ok(file.status)
    }
}

#[derive(Debug, Clone)]
pub struct ReapOutput {
    pub task_id: String,
    pub result_status: ResultStatus,
    pub merge_performed: bool,
    pub worktree_removed: bool,
    /// Set when `auto_diagnose` is enabled and the run left a structured
    /// jsonlog behind (§4.8). `None` when diagnosis is off or there was
    /// nothing to scan.
    pub diagnose_report: Option<DiagnoseReport>,
}

/// Scan the task's jsonlog and produce a C8 report, or `None` if there's
/// no jsonlog to read. No noise filters are loaded here; a caller that
/// teaches filters is expected to pass them through a future extension
/// point rather than this pipeline reaching into an external store.
async fn run_diagnose(layout: &HavenLayout, task_id: &str) -> Option<DiagnoseReport> {
    let raw_log = tokio::fs::read_to_string(layout.run_jsonlog_path(task_id))
        .await
        .ok()?;
    Some(diagnose::diagnose(
        &raw_log,
        &[],
        &FilterScope::Global,
        &SummaryWidths::default(),
    ))
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

fn conflict_escalation(branch: &str, files: &[crate::worktree::ConflictFile]) -> Escalation {
    let reconcile_branch = format!(
        "reconcile/{}",
        branch.strip_prefix("task/").unwrap_or(branch)
    );
    let mut next_steps = vec![format!(
        "create '{reconcile_branch}' to resolve the conflict manually"
    )];
    next_steps.extend(files.iter().map(|f| format!("conflicting file: {}", f.path)));
    Escalation::new("Merge conflicts detected", next_steps)
}

/// Run the reap pipeline end to end for a task whose record already exists.
pub async fn reap(
    task_id: &str,
    layout: &HavenLayout,
    store: &StateStore,
    worktree_mgr: &WorktreeManager,
    artefacts: &dyn Artefacts,
    merge_strategy: MergeStrategy,
    auto_diagnose: bool,
    options: ReapOptions,
) -> OpResult<ReapOutput> {
    let Some(record) = store.load()?.get(task_id).cloned() else {
        return Ok(Outcome::Escalate(Escalation::single_step(
            format!("no agent record for task {task_id}"),
            "spawn the task before reaping it",
        )));
    };

    if record.status == AgentStatus::Reaped {
        return Ok(Outcome::Escalate(Escalation::single_step(
            "task is already reaped",
            "spawn a new run to reap again",
        )));
    }

    // Step 1: if a live pid remains, either wait for it or escalate.
    if let Some(pid) = record.pid {
        if pid_alive(pid) {
            if !options.wait {
                return Ok(Outcome::Escalate(Escalation::new(
                    "task still has a live pid",
                    vec![
                        "re-run reap without --no-wait to wait for completion".to_string(),
                        "or `kill` the task first".to_string(),
                    ],
                )));
            }
            let timeout = Duration::from_secs(options.timeout_override.unwrap_or(record.timeout));
            if !wait_for_completion(store, task_id, layout, timeout).await {
                return Ok(Outcome::Escalate(Escalation::single_step(
                    "timed out waiting for task to finish",
                    "re-run reap, or `kill` the task and reap again",
                )));
            }
        }
    }

    // Step 2: determine result status from the child's result sentinel.
    let result_status = ResultFile::read(&layout.result_path(task_id)).await?;

    let mut merge_performed = false;
    let mut worktree_removed = false;

    // Step 3: worktree reconciliation, only when the record ran in worktree mode.
    if let Some(worktree_ref) = &record.worktree {
        let branch = worktree_ref.branch.clone();

        // 3(a): auto-commit any uncommitted files.
        let wt_path = Path::new(&worktree_ref.path);
        auto_commit_uncommitted(wt_path, task_id).await?;

        // 3(b): classify against trunk.
        let classification = worktree_mgr.classify(task_id).await.map_err(|e| {
            HavenError::GitFailure(format!("classify {task_id}: {e}"))
        })?;

        match classification {
            Classification::Absent | Classification::AlreadyMergedClean => {
                // Nothing to merge; either the worktree is gone or trunk
                // already has everything.
            }
            Classification::CleanNoncontributing => {
                // Clean but contributes nothing to trunk: nothing to merge.
            }
            Classification::AlreadyMergedDirty => {
                // Auto-commit above should have cleaned this up; if it
                // didn't (e.g. untracked files outside the index), there is
                // still nothing unmerged to bring into trunk.
            }
            Classification::Dirty | Classification::Ahead => {
                // 3(c)/3(d): dry-run merge first; a conflict stops here with
                // no trunk mutation.
                let dry_run = worktree_mgr
                    .merge_to(&branch, merge_strategy.clone(), true)
                    .await
                    .map_err(|e| HavenError::GitFailure(format!("merge dry-run {branch}: {e}")))?;

                if !dry_run.can_merge {
                    return Ok(Outcome::Escalate(conflict_escalation(
                        &branch,
                        &dry_run.conflicts,
                    )));
                }

                worktree_mgr
                    .merge_to(&branch, merge_strategy.clone(), false)
                    .await
                    .map_err(|e| HavenError::GitFailure(format!("merge {branch}: {e}")))?;
                merge_performed = true;
            }
        }

        // 3(e): optionally remove the worktree.
        if options.cleanup_worktree_after {
            if worktree_mgr
                .remove_worktree(task_id, crate::worktree::RemoveOptions { force: true })
                .await
                .is_ok()
            {
                worktree_removed = true;
            }
        }
    }

    // Step 4: ask the artefact collaborator to transition the task.
    let new_status = if result_status == ResultStatus::Completed {
        "Done"
    } else {
        "Blocked"
    };
    artefacts.transition_task(task_id, new_status).await?;

    // Step 5: atomically record reaped.
    let task_id_owned = task_id.to_string();
    store.update(move |snapshot| {
        if let Some(record) = snapshot.get_mut(&task_id_owned) {
            record.mark_reaped(result_status);
        }
        Ok(())
    })?;

    crate::run_claim::RunClaim::clear(&layout.run_claim_path(task_id)).await?;

    let diagnose_report = if auto_diagnose {
        run_diagnose(layout, task_id).await
    } else {
        None
    };

    Ok(Outcome::Ok(ReapOutput {
        task_id: task_id.to_string(),
        result_status,
        merge_performed,
        worktree_removed,
        diagnose_report,
    }))
}

/// Poll the state store every [`WAIT_POLL_INTERVAL`] until the record leaves
/// its live states or `timeout` elapses. Returns `true` if it settled.
async fn wait_for_completion(
    store: &StateStore,
    task_id: &str,
    _layout: &HavenLayout,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(snapshot) = store.load() {
            if let Some(record) = snapshot.get(task_id) {
                if !record.is_alive_status() {
                    return true;
                }
                if let Some(pid) = record.pid {
                    if !pid_alive(pid) {
                        return true;
                    }
                }
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL.min(timeout)).await;
    }
}

/// §4.5 step 3(a): commit any uncommitted files under a fixed conventional
/// message. Best-effort — an empty tree (nothing to commit) is not an error.
async fn auto_commit_uncommitted(worktree_path: &Path, task_id: &str) -> Result<()> {
    if !worktree_path.exists() {
        return Ok(());
    }
    let status = crate::git_exec::run_git(&["status", "--porcelain"], worktree_path)
        .await
        .map_err(|e| HavenError::GitFailure(e.to_string()))?;
    if status.stdout.trim().is_empty() {
        return Ok(());
    }

    crate::git_exec::run_git(&["add", "-A"], worktree_path)
        .await
        .map_err(|e| HavenError::GitFailure(e.to_string()))?;
    let message = format!("chore({task_id}): auto-commit agent changes");
    let commit = crate::git_exec::run_git(&["commit", "-m", &message], worktree_path).await;
    match commit {
        Ok(_) => Ok(()),
        // "nothing to commit" after `add -A` (e.g. only ignored files
        // changed) is not a failure worth surfacing.
        Err(crate::git_exec::GitExecError::NonZeroExit { stdout, .. })
            if stdout.contains("nothing to commit") =>
        {
            Ok(())
        }
        Err(e) => Err(HavenError::GitFailure(e.to_string())),
    }
}
