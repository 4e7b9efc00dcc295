//! `haven status [<T>]` (§6): report the state-store view of one or more
//! tasks, optionally cross-checked against the worktrees on disk.

use std::path::PathBuf;

use chrono::Utc;
use clap::Args;

use crate::context::Context;
use crate::output;

#[derive(Debug, Args)]
pub struct StatusArgs {
    pub task_id: Option<String>,

    #[arg(long)]
    pub all: bool,

    #[arg(long)]
    pub active: bool,

    #[arg(long)]
    pub unmerged: bool,

    /// Only records spawned within this window, e.g. `12h` or `3d`.
    #[arg(long)]
    pub since: Option<String>,

    /// Cross-check each record against its worktree's ahead/behind state.
    #[arg(long)]
    pub git: bool,

    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

fn parse_since(spec: &str) -> Option<chrono::Duration> {
    let spec = spec.trim();
    let (digits, unit) = spec.split_at(spec.len().saturating_sub(1));
    let value: i64 = digits.parse().ok()?;
    match unit {
        "h" => Some(chrono::Duration::hours(value)),
        "d" => Some(chrono::Duration::days(value)),
        _ => None,
    }
}

pub async fn run(args: StatusArgs) -> i32 {
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

    let since = args.since.as_deref().and_then(parse_since);
    let now = Utc::now();

    let mut ids: Vec<String> = match &args.task_id {
        Some(id) => vec![id.clone()],
        None => snapshot.keys().cloned().collect(),
    };
    ids.sort();

    let mut rows = Vec::new();
    for id in &ids {
        let Some(record) = snapshot.get(id) else { continue };

        if args.active && !record.is_alive_status() {
            continue;
        }
        if let Some(window) = since {
            let in_window = record
                .spawned_at
                .map(|t| now - t <= window)
                .unwrap_or(false);
            if !in_window {
                continue;
            }
        }

        let classification = if args.unmerged || args.git {
            ctx.worktree_mgr.classify(id).await.ok()
        } else {
            None
        };

        if args.unmerged {
            use haven_core::worktree::Classification;
            let is_unmerged = !matches!(
                classification,
                Some(Classification::AlreadyMergedClean) | Some(Classification::Absent) | None
            );
            if !is_unmerged {
                continue;
            }
        }

        let git_status = if args.git {
            ctx.worktree_mgr.status(id).await.ok()
        } else {
            None
        };

        rows.push((id.clone(), record.clone(), classification, git_status));
    }

    if args.json {
        let body: Vec<_> = rows
            .iter()
            .map(|(id, record, classification, git_status)| -> serde_json::Value {
                let mut entry = serde_json::json!({
                    "task_id": id,
                    "status": record.status,
                    "pid": record.pid,
                    "spawned_at": record.spawned_at,
                    "ended_at": record.ended_at,
                    "result_status": record.result_status,
                    "pr_url": record.pr_url,
                });
                if let Some(c) = classification {
                    entry["classification"] = serde_json::json!(format!("{c:?}"));
                }
                if let Some(g) = git_status {
                    entry["git"] = serde_json::json!({
                        "exists": g.exists,
                        "clean": g.clean,
                        "ahead": g.ahead,
                        "behind": g.behind,
                        "branch": g.branch,
                    });
                }
                entry
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&body).unwrap());
    } else if rows.is_empty() {
        println!("status: no matching tasks");
    } else {
        for (id, record, classification, git_status) in &rows {
            let mut line = format!("{id}: {:?}", record.status);
            if let Some(pid) = record.pid {
                line.push_str(&format!(" pid={pid}"));
            }
            if let Some(c) = classification {
                line.push_str(&format!(" classification={c:?}"));
            }
            if let Some(g) = git_status {
                line.push_str(&format!(" ahead={} behind={} clean={}", g.ahead, g.behind, g.clean));
            }
            println!("{line}");
        }
    }

    output::EXIT_OK
}
