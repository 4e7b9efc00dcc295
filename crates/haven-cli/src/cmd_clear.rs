//! `haven clear [<T>] [--force]` (§6): discard a record and its on-disk
//! artefacts, or every record in the store when no task is named.

use std::path::PathBuf;

use clap::Args;
use haven_core::clear::{self, ClearOptions};

use crate::context::Context;
use crate::output;

#[derive(Debug, Args)]
pub struct ClearArgs {
    pub task_id: Option<String>,

    #[arg(long)]
    pub force: bool,

    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ClearArgs) -> i32 {
    let ctx = match Context::load(args.repo.clone()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("error: {err}");
            return output::EXIT_ESCALATION;
        }
    };

    let options = ClearOptions { force: args.force };

    match &args.task_id {
        Some(task_id) => {
            let result = clear::clear_task(task_id, &ctx.layout, &ctx.store, &ctx.worktree_mgr, options)
                .await
                .map_err(anyhow::Error::from);
            output::render(result, args.json, |(), json| {
                if json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({ "task_id": task_id, "cleared": true }))
                            .unwrap()
                    );
                } else {
                    println!("{task_id} cleared");
                }
            })
        }
        None => match clear::clear_all(&ctx.layout, &ctx.store, &ctx.worktree_mgr, options).await {
            Ok(cleared) => {
                if args.json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({ "cleared": cleared })).unwrap()
                    );
                } else {
                    for id in &cleared {
                        println!("{id} cleared");
                    }
                }
                output::EXIT_OK
            }
            Err(err) => output::print_error(&err, args.json),
        },
    }
}
