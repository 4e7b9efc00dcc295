//! `haven check` (§6): verify the MCP agent server is reachable, and (unless
//! `--skip-spawn`) that the repo is in a state a `spawn` could act on.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use haven_core::mcp;

use crate::context::Context;
use crate::output;

#[derive(Debug, Args)]
pub struct CheckArgs {
    #[arg(long)]
    pub timeout: Option<u64>,

    #[arg(long = "skip-spawn")]
    pub skip_spawn: bool,

    #[arg(long)]
    pub debug: bool,

    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: CheckArgs) -> i32 {
    let ctx = match Context::load(args.repo.clone()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("error: {err}");
            return output::EXIT_ESCALATION;
        }
    };

    let timeout = Duration::from_secs(args.timeout.unwrap_or(5));
    let report = match tokio::time::timeout(timeout, mcp::check_mcp_agent_server(ctx.layout.root())).await {
        Ok(Ok(report)) => Some(report),
        Ok(Err(err)) => {
            if args.debug {
                eprintln!("mcp check error: {err}");
            }
            None
        }
        Err(_) => None,
    };

    let mut spawn_ready = true;
    let mut spawn_detail = String::new();
    if !args.skip_spawn {
        match std::process::Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(&ctx.repo_root)
            .output()
        {
            Ok(output) if output.status.success() && output.stdout.is_empty() => {}
            Ok(output) if output.status.success() => {
                spawn_ready = false;
                spawn_detail = "trunk has uncommitted changes".to_string();
            }
            _ => {
                spawn_ready = false;
                spawn_detail = "repository root is not a git repository".to_string();
            }
        }
    }

    let (pid_alive, connectivity_ok) = report
        .as_ref()
        .map(|r| (r.pid_alive, r.connectivity_ok))
        .unwrap_or((false, false));

    let healthy = pid_alive && connectivity_ok && spawn_ready;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "pid_alive": pid_alive,
                "connectivity_ok": connectivity_ok,
                "spawn_ready": spawn_ready,
                "spawn_detail": spawn_detail,
                "healthy": healthy,
            }))
            .unwrap()
        );
    } else {
        println!("mcp pid alive: {pid_alive}");
        println!("mcp connectivity: {connectivity_ok}");
        if !args.skip_spawn {
            println!("spawn ready: {spawn_ready}{}", if spawn_ready { String::new() } else { format!(" ({spawn_detail})") });
        }
    }

    if healthy {
        output::EXIT_OK
    } else {
        output::EXIT_ESCALATION
    }
}
