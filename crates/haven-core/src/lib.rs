pub mod clear;
pub mod collaborators;
pub mod config;
pub mod diagnose;
pub mod error;
pub mod escalation;
pub mod git_exec;
pub mod git_ref;
pub mod haven_layout;
pub mod kill;
pub mod log_tail;
pub mod mcp;
pub mod mission;
pub mod noise_filter;
pub mod platform;
pub mod reap;
pub mod reject;
pub mod run_claim;
pub mod security;
pub mod spawn;
pub mod state;
pub mod supervisor;
pub mod sync;
pub mod wait;
pub mod worktree;

pub use error::{HavenError, Result};
pub use escalation::{Escalation, OpResult, Outcome};

use tracing::info;

/// Initialise a default tracing subscriber for the library consumer.
///
/// Call this once at program start. Uses `RUST_LOG` env var for filtering,
/// defaulting to `info` level.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).init();

    info!("haven tracing initialised");
}
