//! `haven reap <T>` (§6): run the wait -> classify -> merge -> transition
//! pipeline for a single task that has already been spawned.

use std::path::PathBuf;

use clap::Args;
use haven_core::reap::{self, ReapOptions};

use crate::context::Context;
use crate::output;

#[derive(Debug, Args)]
pub struct ReapArgs {
    pub task_id: String,

    #[arg(long = "no-wait")]
    pub no_wait: bool,

    #[arg(long)]
    pub timeout: Option<u64>,

    #[arg(long = "cleanup-worktree-after")]
    pub cleanup_worktree_after: bool,

    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ReapArgs) -> i32 {
    let ctx = match Context::load(args.repo.clone()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("error: {err}");
            return output::EXIT_ESCALATION;
        }
    };

    let options = ReapOptions {
        wait: !args.no_wait,
        timeout_override: args.timeout,
        cleanup_worktree_after: args.cleanup_worktree_after,
    };

    let result = reap::reap(
        &args.task_id,
        &ctx.layout,
        &ctx.store,
        &ctx.worktree_mgr,
        &ctx.artefacts,
        ctx.config.agent.merge_strategy.clone(),
        ctx.config.agent.auto_diagnose,
        options,
    )
    .await
    .map_err(anyhow::Error::from);

    output::render(result, args.json, |out, json| {
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "task_id": out.task_id,
                    "result_status": out.result_status,
                    "merge_performed": out.merge_performed,
                    "worktree_removed": out.worktree_removed,
                    "diagnose_report": out.diagnose_report,
                }))
                .unwrap()
            );
        } else {
            println!(
                "{}: {:?} (merged={}, worktree_removed={})",
                out.task_id, out.result_status, out.merge_performed, out.worktree_removed
            );
            if let Some(report) = &out.diagnose_report {
                print!("{}", report.render());
            }
        }
    })
}
