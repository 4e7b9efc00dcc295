//! `haven spawn <T>` (§6): launch an agent for a task and supervise it to
//! completion in the foreground. This process owns the child for its whole
//! lifetime; a separate `wait` can reattach afterwards by polling the record.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use haven_core::config::HeartbeatConfig;
use haven_core::escalation::Outcome;
use haven_core::spawn::{self, SpawnOptions};
use haven_core::supervisor::{self, SupervisorExit, SupervisorOptions};

use crate::context::Context;
use crate::launcher::AgentLauncherArgs;
use crate::output::{self, EXIT_OK};

#[derive(Debug, Args)]
pub struct SpawnArgs {
    pub task_id: String,

    #[arg(long)]
    pub timeout: Option<u64>,

    #[arg(long, conflicts_with = "no_worktree")]
    pub worktree: bool,

    #[arg(long)]
    pub no_worktree: bool,

    #[arg(long)]
    pub resume: bool,

    #[arg(long)]
    pub no_log: bool,

    #[arg(long)]
    pub no_heartbeat: bool,

    #[arg(long)]
    pub heartbeat: Option<u64>,

    #[arg(long)]
    pub verbose: bool,

    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[command(flatten)]
    pub launcher: AgentLauncherArgs,

    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: SpawnArgs) -> i32 {
    match run_inner(&args).await {
        Ok(code) => code,
        Err(err) => {
            if args.json {
                let body = serde_json::json!({ "error": { "kind": "internal", "message": err.to_string() } });
                println!("{}", serde_json::to_string_pretty(&body).unwrap());
            } else {
                eprintln!("error: {err}");
            }
            output::EXIT_ESCALATION
        }
    }
}

async fn run_inner(args: &SpawnArgs) -> anyhow::Result<i32> {
    let ctx = Context::load(args.repo.clone())?;
    let launcher = args.launcher.build()?;

    let use_worktree_override = if args.no_worktree {
        Some(false)
    } else if args.worktree {
        Some(true)
    } else {
        None
    };

    let options = SpawnOptions {
        resume: args.resume,
        timeout_override: args.timeout,
        use_worktree_override,
        heartbeat: !args.no_heartbeat,
    };

    let spawn_result = spawn::spawn(
        &args.task_id,
        &ctx.repo_root,
        &ctx.layout,
        &ctx.config,
        &ctx.worktree_mgr,
        &ctx.store,
        &ctx.artefacts,
        &ctx.prompts,
        &ctx.memory,
        &launcher,
        options,
    )
    .await?;

    let output = match spawn_result {
        Outcome::Escalate(escalation) => {
            return Ok(output::print_escalation(&escalation, args.json));
        }
        Outcome::Ok(output) => output,
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "task_id": output.task_id.clone(),
                "pid": output.pid,
                "worktree_path": output.worktree_path.clone(),
            }))
            .unwrap()
        );
    } else if !args.no_log {
        println!("spawned {} (pid {})", output.task_id, output.pid);
    }

    let timeout = Duration::from_secs(args.timeout.unwrap_or(ctx.config.agent.timeout));
    let watchdog_timeout = if ctx.config.agent.watchdog_timeout > 0 {
        Some(Duration::from_secs(ctx.config.agent.watchdog_timeout))
    } else {
        None
    };
    let heartbeat = HeartbeatConfig {
        enabled: !args.no_heartbeat && ctx.config.heartbeat.enabled,
        quiet_interval_seconds: args
            .heartbeat
            .unwrap_or(ctx.config.heartbeat.quiet_interval_seconds),
        verbose_interval_seconds: if args.verbose {
            args.heartbeat.unwrap_or(ctx.config.heartbeat.verbose_interval_seconds)
        } else {
            ctx.config.heartbeat.verbose_interval_seconds
        },
    };

    let supervisor_options = SupervisorOptions {
        timeout,
        watchdog_timeout,
        heartbeat,
        verbose: args.verbose,
        capture_jsonlog: true,
    };

    // Held across the whole supervision loop and shut down on every exit
    // path below (success, detach, timeout/kill, or error) so a sandboxed
    // run never leaves its forwarding task behind.
    let socket_bridge = output.socket_bridge;

    let result = supervisor::supervise(
        &output.task_id,
        output.child,
        &ctx.layout,
        &ctx.store,
        supervisor_options,
    )
    .await;

    if let Some(bridge) = socket_bridge {
        bridge.shutdown().await;
    }

    let result = result?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "exit": format!("{:?}", result.exit),
                "exit_code": result.exit_code,
                "exit_signal": result.exit_signal,
            }))
            .unwrap()
        );
    } else {
        println!(
            "{} finished: {:?} (exit_code={:?})",
            output.task_id, result.exit, result.exit_code
        );
    }

    Ok(match result.exit {
        SupervisorExit::TimedOut => output::EXIT_TIMEOUT,
        SupervisorExit::ChildExited | SupervisorExit::Detached | SupervisorExit::Killed => EXIT_OK,
    })
}
