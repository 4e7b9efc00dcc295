//! Construction of the child agent command. `haven.toml` and the on-disk
//! spec deliberately say nothing about which binary a spawned agent actually
//! runs — that's an invocation-time choice, not a repo-level policy — so it
//! comes from CLI flags, falling back to `HAVEN_AGENT_CMD`/`HAVEN_AGENT_ARGS`
//! env vars, and finally to `claude` with no arguments.

use clap::Args;
use haven_core::spawn::ChildLauncher;

#[derive(Debug, Clone, Args)]
pub struct AgentLauncherArgs {
    /// Program to launch as the agent child (default: $HAVEN_AGENT_CMD or "claude").
    #[arg(long = "agent-cmd")]
    pub agent_cmd: Option<String>,

    /// Argument to pass to the agent child; repeat for multiple.
    #[arg(long = "agent-arg")]
    pub agent_arg: Vec<String>,

    /// Extra KEY=VALUE env var to set for the agent child; repeat for multiple.
    #[arg(long = "agent-env")]
    pub agent_env: Vec<String>,
}

impl AgentLauncherArgs {
    pub fn build(&self) -> anyhow::Result<ChildLauncher> {
        let program = self
            .agent_cmd
            .clone()
            .or_else(|| std::env::var("HAVEN_AGENT_CMD").ok())
            .unwrap_or_else(|| "claude".to_string());

        let args = if !self.agent_arg.is_empty() {
            self.agent_arg.clone()
        } else if let Ok(raw) = std::env::var("HAVEN_AGENT_ARGS") {
            raw.split_whitespace().map(str::to_string).collect()
        } else {
            Vec::new()
        };

        let mut env = Vec::new();
        for pair in &self.agent_env {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("--agent-env expects KEY=VALUE, got {pair:?}"))?;
            env.push((key.to_string(), value.to_string()));
        }

        Ok(ChildLauncher { program, args, env })
    }
}
