//! `haven sync [--dry-run]` (§6): reconcile the state store against disk.

use std::path::PathBuf;

use clap::Args;
use haven_core::sync;

use crate::context::Context;
use crate::output;

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: SyncArgs) -> i32 {
    let ctx = match Context::load(args.repo.clone()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("error: {err}");
            return output::EXIT_ESCALATION;
        }
    };

    let report = match sync::sync(&ctx.layout, &ctx.store, &ctx.worktree_mgr, args.dry_run).await {
        Ok(report) => report,
        Err(err) => return output::print_error(&err, args.json),
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "added": report.added.iter().map(|e| serde_json::json!({"task_id": e.task_id, "detail": e.detail})).collect::<Vec<_>>(),
                "updated": report.updated.iter().map(|e| serde_json::json!({"task_id": e.task_id, "detail": e.detail})).collect::<Vec<_>>(),
                "orphaned": report.orphaned.iter().map(|e| serde_json::json!({"task_id": e.task_id, "detail": e.detail})).collect::<Vec<_>>(),
            }))
            .unwrap()
        );
    } else {
        for e in &report.added {
            println!("added {}: {}", e.task_id, e.detail);
        }
        for e in &report.updated {
            println!("updated {}: {}", e.task_id, e.detail);
        }
        for e in &report.orphaned {
            println!("orphaned {}: {}", e.task_id, e.detail);
        }
        if report.added.is_empty() && report.updated.is_empty() && report.orphaned.is_empty() {
            println!("sync: nothing to reconcile");
        }
    }

    output::EXIT_OK
}
