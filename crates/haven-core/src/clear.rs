//! Clear (§6 `clear [<T>] [--force]`): discard an agent record and its
//! on-disk artefacts entirely. Without `--force`, refuses a task whose
//! record still shows a live pid, so an operator cannot lose a running
//! agent's bookkeeping by accident.

use crate::error::Result;
use crate::escalation::{Escalation, OpResult, Outcome};
use crate::haven_layout::HavenLayout;
use crate::state::StateStore;
use crate::worktree::WorktreeManager;

#[derive(Debug, Clone, Copy, Default)]
pub struct ClearOptions {
    pub force: bool,
}

/// Remove `task_id`'s record, worktree, and agent directory.
pub async fn clear_task(
    task_id: &str,
    layout: &HavenLayout,
    store: &StateStore,
    worktree_mgr: &WorktreeManager,
    options: ClearOptions,
) -> OpResult<()> {
    let existing = store.load()?.get(task_id).cloned();
    if let Some(record) = &existing {
        if record.is_alive_status() && !options.force {
            return Ok(Outcome::Escalate(Escalation::new(
                "task still has a live record",
                vec![
                    "kill it first".to_string(),
                    "or re-run with --force".to_string(),
                ],
            )));
        }
    }

    worktree_mgr.cleanup(task_id).await;

    let agent_dir = layout.agent_dir(task_id);
    if agent_dir.exists() {
        tokio::fs::remove_dir_all(&agent_dir).await?;
    }
    crate::run_claim::RunClaim::clear(&layout.run_claim_path(task_id)).await?;

    let task_id_owned = task_id.to_string();
    store.update(move |snapshot| {
        snapshot.remove(&task_id_owned);
        Ok(())
    })?;

    Ok(Outcome::Ok(()))
}

/// Clear every task currently in the state store. Tasks refused for being
/// live (without `--force`) are skipped, not treated as a hard failure.
pub async fn clear_all(
    layout: &HavenLayout,
    store: &StateStore,
    worktree_mgr: &WorktreeManager,
    options: ClearOptions,
) -> Result<Vec<String>> {
    let ids: Vec<String> = store.load()?.keys().cloned().collect();
    let mut cleared = Vec::new();
    for id in ids {
        if let Outcome::Ok(()) = clear_task(&id, layout, store, worktree_mgr, options).await? {
            cleared.push(id);
        }
    }
    Ok(cleared)
}
