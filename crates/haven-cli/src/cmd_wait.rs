//! `haven wait <T>` (§6): reattach to an already-spawned task, optionally
//! following its run log while polling the state store for settlement.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use haven_core::log_tail::{parse_json_event, tail_lines, LogTailer, SummaryWidths};
use haven_core::wait::{self, WaitOutcome};

use crate::context::Context;
use crate::output;

#[derive(Debug, Args)]
pub struct WaitArgs {
    pub task_id: String,

    #[arg(long)]
    pub timeout: Option<u64>,

    #[arg(long = "no-log")]
    pub no_log: bool,

    #[arg(long = "no-heartbeat")]
    pub no_heartbeat: bool,

    #[arg(long)]
    pub heartbeat: Option<u64>,

    #[arg(short = 'n', long = "lines")]
    pub lines: Option<usize>,

    #[arg(short = 'e', long = "events")]
    pub events: Vec<String>,

    #[arg(long)]
    pub raw: bool,

    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

fn print_log_line(line: &str, raw: bool, events: &[String], widths: &SummaryWidths) {
    if raw {
        println!("{line}");
        return;
    }
    match parse_json_event(line, widths) {
        Some(event) => {
            if events.is_empty() || events.iter().any(|e| e == &event.event_type) {
                println!("[{}] {}", event.event_type, event.summary);
            }
        }
        None if !line.trim().is_empty() => println!("{line}"),
        None => {}
    }
}

pub async fn run(args: WaitArgs) -> i32 {
    let ctx = match Context::load(args.repo.clone()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("error: {err}");
            return output::EXIT_ESCALATION;
        }
    };

    let log_path = ctx.layout.run_jsonlog_path(&args.task_id);
    let widths = SummaryWidths::default();

    if !args.no_log && !args.json {
        if let Some(n) = args.lines {
            if let Ok(initial) = tail_lines(&log_path, n).await {
                for line in &initial {
                    print_log_line(line, args.raw, &args.events, &widths);
                }
            }
        }
    }

    let timeout = Duration::from_secs(args.timeout.unwrap_or(600));

    let heartbeat_handle = if !args.no_heartbeat && !args.json {
        let task_id = args.task_id.clone();
        let period = Duration::from_secs(args.heartbeat.unwrap_or(30).max(1));
        Some(tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // first tick fires immediately; discard it
            loop {
                ticker.tick().await;
                eprintln!("{task_id}: still waiting ({}s elapsed)", started.elapsed().as_secs());
            }
        }))
    } else {
        None
    };

    let tailer_handle = if !args.no_log && !args.json {
        let log_path = log_path.clone();
        let raw = args.raw;
        let events = args.events.clone();
        Some(tokio::spawn(async move {
            let mut tailer = LogTailer::new(log_path);
            loop {
                match tailer.poll().await {
                    Ok(lines) => {
                        for line in lines {
                            print_log_line(&line, raw, &events, &SummaryWidths::default());
                        }
                    }
                    Err(_) => break,
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }))
    } else {
        None
    };

    let outcome = wait::wait_for_task(&ctx.store, &args.task_id, timeout).await;

    if let Some(handle) = tailer_handle {
        handle.abort();
    }
    if let Some(handle) = heartbeat_handle {
        handle.abort();
    }

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => return output::print_error(&err, args.json),
    };

    match outcome {
        WaitOutcome::Settled(record) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "outcome": "settled", "record": record })).unwrap());
            } else {
                println!("{} settled: {:?}", args.task_id, record.status);
            }
            output::EXIT_OK
        }
        WaitOutcome::TimedOut => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "outcome": "timed_out" })).unwrap());
            } else {
                eprintln!("{}: timed out waiting for settlement", args.task_id);
            }
            output::EXIT_TIMEOUT
        }
        WaitOutcome::Unknown => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "outcome": "unknown" })).unwrap());
            } else {
                eprintln!("{}: no record found", args.task_id);
            }
            output::EXIT_ESCALATION
        }
    }
}
