//! `haven conflicts` (§6): dry-run merge every live worktree against trunk
//! and report which ones would conflict.

use std::path::PathBuf;

use clap::Args;

use crate::context::Context;
use crate::output;

#[derive(Debug, Args)]
pub struct ConflictsArgs {
    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ConflictsArgs) -> i32 {
    let ctx = match Context::load(args.repo.clone()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("error: {err}");
            return output::EXIT_ESCALATION;
        }
    };

    let snapshot = match ctx.store.load() {
        Ok(snapshot) => snapshot,
        Err(err) => return output::print_error(&err, args.json),
    };

    let mut conflicted = Vec::new();
    for (id, record) in snapshot.iter() {
        let Some(worktree) = &record.worktree else { continue };
        let report = match ctx
            .worktree_mgr
            .merge_to(&worktree.branch, ctx.config.agent.merge_strategy.clone(), true)
            .await
        {
            Ok(report) => report,
            Err(_) => continue,
        };
        if !report.conflicts.is_empty() {
            conflicted.push((id.clone(), report));
        }
    }

    if args.json {
        let body: Vec<_> = conflicted
            .iter()
            .map(|(id, report)| {
                serde_json::json!({
                    "task_id": id,
                    "branch": report.source_branch,
                    "conflicts": report.conflicts.iter().map(|c| serde_json::json!({
                        "path": c.path,
                        "conflict_type": c.conflict_type,
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&body).unwrap());
    } else if conflicted.is_empty() {
        println!("conflicts: none");
    } else {
        for (id, report) in &conflicted {
            println!("{id} ({}):", report.source_branch);
            for c in &report.conflicts {
                println!("  {} [{}]", c.path, c.conflict_type);
            }
        }
    }

    if conflicted.is_empty() {
        output::EXIT_OK
    } else {
        output::EXIT_ESCALATION
    }
}
