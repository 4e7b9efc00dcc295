//! `haven log <T>` (§6): print a task's run log, structured or raw.

use std::path::PathBuf;

use clap::Args;
use haven_core::log_tail::{parse_json_event, tail_lines, SummaryWidths};

use crate::context::Context;
use crate::output;

#[derive(Debug, Args)]
pub struct LogArgs {
    pub task_id: String,

    #[arg(short = 'n', long = "lines")]
    pub lines: Option<usize>,

    #[arg(short = 't', long = "tail")]
    pub tail: Option<usize>,

    #[arg(short = 'e', long = "events")]
    pub events: Vec<String>,

    #[arg(long)]
    pub raw: bool,

    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: LogArgs) -> i32 {
    let ctx = match Context::load(args.repo.clone()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("error: {err}");
            return output::EXIT_ESCALATION;
        }
    };

    let log_path = ctx.layout.run_jsonlog_path(&args.task_id);
    let n = args.tail.or(args.lines).unwrap_or(200);

    let lines = match tail_lines(&log_path, n).await {
        Ok(lines) => lines,
        Err(err) => return output::print_error(&err, args.json),
    };

    if args.raw {
        for line in &lines {
            println!("{line}");
        }
        return output::EXIT_OK;
    }

    let widths = SummaryWidths::default();
    let events: Vec<_> = lines
        .iter()
        .filter_map(|line| parse_json_event(line, &widths))
        .filter(|event| args.events.is_empty() || args.events.iter().any(|e| e == &event.event_type))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&events).unwrap());
    } else {
        for event in &events {
            println!("[{}] {}", event.event_type, event.summary);
        }
    }

    output::EXIT_OK
}
