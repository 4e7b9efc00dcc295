//! `haven reject <T>` (§6): discard a record without merging, moving the
//! task artefact to an operator-chosen terminal status.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use haven_core::reject::{self, RejectStatus as CoreRejectStatus};

use crate::context::Context;
use crate::output;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RejectStatusArg {
    Blocked,
    NotStarted,
}

impl From<RejectStatusArg> for CoreRejectStatus {
    fn from(value: RejectStatusArg) -> Self {
        match value {
            RejectStatusArg::Blocked => CoreRejectStatus::Blocked,
            RejectStatusArg::NotStarted => CoreRejectStatus::NotStarted,
        }
    }
}

#[derive(Debug, Args)]
pub struct RejectArgs {
    pub task_id: String,

    #[arg(long)]
    pub reason: Option<String>,

    #[arg(long, value_enum, default_value = "blocked")]
    pub status: RejectStatusArg,

    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: RejectArgs) -> i32 {
    let ctx = match Context::load(args.repo.clone()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("error: {err}");
            return output::EXIT_ESCALATION;
        }
    };

    let result = reject::reject(
        &args.task_id,
        &ctx.store,
        &ctx.artefacts,
        args.reason.as_deref(),
        args.status.into(),
    )
    .await
    .map_err(anyhow::Error::from);

    output::render(result, args.json, |(), json| {
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "task_id": args.task_id, "rejected": true }))
                    .unwrap()
            );
        } else {
            println!("{} rejected", args.task_id);
        }
    })
}
