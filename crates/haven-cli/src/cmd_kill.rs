//! `haven kill <T>` (§6): SIGTERM a live agent, escalating to SIGKILL after
//! a grace period, and mark the record killed.

use std::path::PathBuf;

use clap::Args;
use haven_core::kill;

use crate::context::Context;
use crate::output;

#[derive(Debug, Args)]
pub struct KillArgs {
    pub task_id: String,

    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: KillArgs) -> i32 {
    let ctx = match Context::load(args.repo.clone()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("error: {err}");
            return output::EXIT_ESCALATION;
        }
    };

    let result = kill::kill(&args.task_id, &ctx.store)
        .await
        .map_err(anyhow::Error::from);

    output::render(result, args.json, |out, json| {
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "task_id": out.task_id,
                    "pid": out.pid,
                    "forced": out.forced,
                }))
                .unwrap()
            );
        } else {
            println!(
                "{} (pid {}): {}",
                out.task_id,
                out.pid,
                if out.forced { "killed (forced)" } else { "killed" }
            );
        }
    })
}
