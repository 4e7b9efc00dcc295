//! `haven wait-all [<T…>]` (§6): wait for multiple tasks, or every task
//! currently in the store when none are named.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use haven_core::wait::{self, WaitOutcome};

use crate::context::Context;
use crate::output;

#[derive(Debug, Args)]
pub struct WaitAllArgs {
    pub task_ids: Vec<String>,

    #[arg(long)]
    pub any: bool,

    #[arg(long)]
    pub timeout: Option<u64>,

    #[arg(long)]
    pub heartbeat: Option<u64>,

    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: WaitAllArgs) -> i32 {
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
            Err(err) => return output::print_error(&err, args.json),
        }
    };

    let timeout = Duration::from_secs(args.timeout.unwrap_or(600));

    let heartbeat_handle = if !args.json {
        let count = task_ids.len();
        let period = Duration::from_secs(args.heartbeat.unwrap_or(30).max(1));
        Some(tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // first tick fires immediately; discard it
            loop {
                ticker.tick().await;
                eprintln!(
                    "still waiting on {count} task(s) ({}s elapsed)",
                    started.elapsed().as_secs()
                );
            }
        }))
    } else {
        None
    };

    let results = wait::wait_for_many(&ctx.store, &task_ids, timeout, args.any).await;

    if let Some(handle) = heartbeat_handle {
        handle.abort();
    }

    let results = match results {
        Ok(results) => results,
        Err(err) => return output::print_error(&err, args.json),
    };

    let mut any_timed_out = false;
    let mut any_unknown = false;

    if args.json {
        let body: Vec<_> = results
            .iter()
            .map(|(id, outcome)| match outcome {
                WaitOutcome::Settled(record) => {
                    serde_json::json!({ "task_id": id, "outcome": "settled", "record": record })
                }
                WaitOutcome::TimedOut => serde_json::json!({ "task_id": id, "outcome": "timed_out" }),
                WaitOutcome::Unknown => serde_json::json!({ "task_id": id, "outcome": "unknown" }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&body).unwrap());
    } else {
        for (id, outcome) in &results {
            match outcome {
                WaitOutcome::Settled(record) => println!("{id} settled: {:?}", record.status),
                WaitOutcome::TimedOut => eprintln!("{id}: timed out"),
                WaitOutcome::Unknown => eprintln!("{id}: no record found"),
            }
        }
    }

    for (_, outcome) in &results {
        match outcome {
            WaitOutcome::TimedOut => any_timed_out = true,
            WaitOutcome::Unknown => any_unknown = true,
            WaitOutcome::Settled(_) => {}
        }
    }

    if any_timed_out {
        output::EXIT_TIMEOUT
    } else if any_unknown {
        output::EXIT_ESCALATION
    } else {
        output::EXIT_OK
    }
}
