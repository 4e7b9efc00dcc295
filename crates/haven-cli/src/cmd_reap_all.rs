//! `haven reap-all [<T…>]` (§6): reap every task given, or every task
//! currently in the state store when none are named. Each task is reaped
//! independently; one escalation doesn't stop the rest.

use std::path::PathBuf;

use clap::Args;
use haven_core::escalation::Outcome;
use haven_core::reap::{self, ReapOptions};

use crate::context::Context;
use crate::output;

#[derive(Debug, Args)]
pub struct ReapAllArgs {
    pub task_ids: Vec<String>,

    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ReapAllArgs) -> i32 {
    let ctx = match Context::load(args.repo.clone()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("error: {err}");
            return output::EXIT_ESCALATION;
        }
    };

    let task_ids = if !args.task_ids.is_empty() {
        args.task_ids.clone()
    } else {
        match ctx.store.load() {
            Ok(snapshot) => snapshot.keys().cloned().collect(),
            Err(err) => {
                eprintln!("error: {err}");
                return output::EXIT_ESCALATION;
            }
        }
    };

    let mut reaped = Vec::new();
    let mut escalated = Vec::new();
    let mut failed = Vec::new();

    for task_id in &task_ids {
        let result = reap::reap(
            task_id,
            &ctx.layout,
            &ctx.store,
            &ctx.worktree_mgr,
            &ctx.artefacts,
            ctx.config.agent.merge_strategy.clone(),
            ctx.config.agent.auto_diagnose,
            ReapOptions {
                wait: true,
                ..ReapOptions::default()
            },
        )
        .await;

        match result {
            Ok(Outcome::Ok(out)) => reaped.push(out),
            Ok(Outcome::Escalate(escalation)) => {
                escalated.push((task_id.clone(), escalation));
            }
            Err(err) => failed.push((task_id.clone(), err.to_string())),
        }
    }

    if args.json {
        let body = serde_json::json!({
            "reaped": reaped.iter().map(|o| serde_json::json!({
                "task_id": o.task_id,
                "result_status": o.result_status,
                "merge_performed": o.merge_performed,
                "worktree_removed": o.worktree_removed,
                "diagnose_report": o.diagnose_report,
            })).collect::<Vec<_>>(),
            "escalated": escalated.iter().map(|(id, e)| serde_json::json!({
                "task_id": id,
                "reason": e.reason,
                "next_steps": e.next_steps,
            })).collect::<Vec<_>>(),
            "failed": failed.iter().map(|(id, msg)| serde_json::json!({
                "task_id": id,
                "message": msg,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap());
    } else {
        for out in &reaped {
            println!("{}: {:?}", out.task_id, out.result_status);
            if let Some(report) = &out.diagnose_report {
                print!("{}", report.render());
            }
        }
        for (id, e) in &escalated {
            eprintln!("{id}: escalation: {}", e.reason);
        }
        for (id, msg) in &failed {
            eprintln!("{id}: error: {msg}");
        }
    }

    if escalated.is_empty() && failed.is_empty() {
        output::EXIT_OK
    } else {
        output::EXIT_ESCALATION
    }
}
