mod cmd_check;
mod cmd_clear;
mod cmd_conflicts;
mod cmd_kill;
mod cmd_log;
mod cmd_reap;
mod cmd_reap_all;
mod cmd_reject;
mod cmd_spawn;
mod cmd_status;
mod cmd_sync;
mod cmd_wait;
mod cmd_wait_all;
mod context;
mod launcher;
mod output;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "haven", version, about = "Agent lifecycle supervisor")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Launch an agent for a task and supervise it to completion.
    Spawn(cmd_spawn::SpawnArgs),
    /// Wait -> classify -> merge -> transition a finished task.
    Reap(cmd_reap::ReapArgs),
    /// Reap several tasks (or every task on record) in one pass.
    #[command(name = "reap-all")]
    ReapAll(cmd_reap_all::ReapAllArgs),
    /// Discard a record without merging it.
    Reject(cmd_reject::RejectArgs),
    /// Terminate a live agent.
    Kill(cmd_kill::KillArgs),
    /// Discard a record and its on-disk artefacts.
    Clear(cmd_clear::ClearArgs),
    /// Reconcile the state store against what's actually on disk.
    Sync(cmd_sync::SyncArgs),
    /// Reattach to a spawned task and wait for it to settle.
    Wait(cmd_wait::WaitArgs),
    /// Wait for several tasks (or every task on record) to settle.
    #[command(name = "wait-all")]
    WaitAll(cmd_wait_all::WaitAllArgs),
    /// Print a task's run log.
    Log(cmd_log::LogArgs),
    /// Verify the MCP agent server is reachable and spawn preconditions hold.
    Check(cmd_check::CheckArgs),
    /// Report the state-store view of one or more tasks.
    Status(cmd_status::StatusArgs),
    /// List worktrees that would conflict if merged to trunk right now.
    Conflicts(cmd_conflicts::ConflictsArgs),
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    haven_core::init_tracing();

    let cli = Cli::parse();

    let code = match cli.command {
        Some(Command::Spawn(args)) => cmd_spawn::run(args).await,
        Some(Command::Reap(args)) => cmd_reap::run(args).await,
        Some(Command::ReapAll(args)) => cmd_reap_all::run(args).await,
        Some(Command::Reject(args)) => cmd_reject::run(args).await,
        Some(Command::Kill(args)) => cmd_kill::run(args).await,
        Some(Command::Clear(args)) => cmd_clear::run(args).await,
        Some(Command::Sync(args)) => cmd_sync::run(args).await,
        Some(Command::Wait(args)) => cmd_wait::run(args).await,
        Some(Command::WaitAll(args)) => cmd_wait_all::run(args).await,
        Some(Command::Log(args)) => cmd_log::run(args).await,
        Some(Command::Check(args)) => cmd_check::run(args).await,
        Some(Command::Status(args)) => cmd_status::run(args).await,
        Some(Command::Conflicts(args)) => cmd_conflicts::run(args).await,
        None => {
            println!("haven {}", env!("CARGO_PKG_VERSION"));
            0
        }
    };

    std::process::ExitCode::from(code as u8)
}
