//! Crate-wide configuration.
//!
//! A single `HavenConfig` TOML document, loaded from `<repo>/haven.toml` if
//! present else defaults. `agent` mirrors the `Config` collaborator's
//! `agentConfig` shape (§6) field for field; `general`/`branching`/
//! `heartbeat`/`retention` are ambient settings the collaborator interface
//! doesn't need to expose to the core's own callers.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HavenError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Merge,
    Squash,
    Rebase,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BranchingStrategy {
    Flat,
    Prd,
    Epic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    None,
    Failed,
    All,
}

/// Mirrors the `Config` collaborator's `agentConfig` record (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub use_subprocess: bool,
    pub use_worktrees: bool,
    pub sandbox: bool,
    pub risky_mode: bool,
    pub max_budget_usd: f64,
    pub watchdog_timeout: u64,
    pub timeout: u64,
    pub merge_strategy: MergeStrategy,
    pub pr_provider: Option<String>,
    pub auto_pr: bool,
    pub pr_draft: bool,
    pub auto_diagnose: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            use_subprocess: true,
            use_worktrees: true,
            sandbox: true,
            risky_mode: false,
            max_budget_usd: 0.0,
            watchdog_timeout: 120,
            timeout: 600,
            merge_strategy: MergeStrategy::Merge,
            pr_provider: None,
            auto_pr: false,
            pr_draft: false,
            auto_diagnose: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub trunk: String,
    pub haven_dir: Option<String>,
    pub sync_parent: bool,
    pub unsafe_mode: bool,
    pub allow_writes_outside_worktree: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            trunk: "main".to_string(),
            haven_dir: None,
            sync_parent: true,
            unsafe_mode: false,
            allow_writes_outside_worktree: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchingConfig {
    pub strategy: BranchingStrategy,
}

impl Default for BranchingConfig {
    fn default() -> Self {
        Self {
            strategy: BranchingStrategy::Flat,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub quiet_interval_seconds: u64,
    pub verbose_interval_seconds: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quiet_interval_seconds: 60,
            verbose_interval_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub policy: RetentionPolicy,
    pub max_age_days: Option<u64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            policy: RetentionPolicy::Failed,
            max_age_days: Some(14),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HavenConfig {
    pub general: GeneralConfig,
    pub agent: AgentConfig,
    pub branching: BranchingConfig,
    pub heartbeat: HeartbeatConfig,
    pub retention: RetentionConfig,
}

impl HavenConfig {
    /// Load from `<repo>/haven.toml`, erroring if present but unparsable.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = repo_root.join("haven.toml");
        let raw = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| HavenError::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `<repo>/haven.toml` if present, else return defaults.
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let path = repo_root.join("haven.toml");
        if path.exists() {
            Self::load(repo_root)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.timeout == 0 {
            return Err(HavenError::Config(
                "agent.timeout must be greater than zero".into(),
            ));
        }
        if self.agent.max_budget_usd < 0.0 {
            return Err(HavenError::Config(
                "agent.max_budget_usd must not be negative".into(),
            ));
        }
        if self.general.trunk.trim().is_empty() {
            return Err(HavenError::Config("general.trunk must not be empty".into()));
        }
        if self.heartbeat.quiet_interval_seconds == 0
            || self.heartbeat.verbose_interval_seconds == 0
        {
            return Err(HavenError::Config(
                "heartbeat intervals must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = HavenConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_toml() {
        let raw = r#"
            [general]
            trunk = "trunk"
            sync_parent = false

            [agent]
            timeout = 300
            watchdog_timeout = 60
            merge_strategy = "squash"
            auto_pr = true

            [branching]
            strategy = "epic"
        "#;
        let config: HavenConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.general.trunk, "trunk");
        assert!(!config.general.sync_parent);
        assert_eq!(config.agent.timeout, 300);
        assert_eq!(config.agent.merge_strategy, MergeStrategy::Squash);
        assert_eq!(config.branching.strategy, BranchingStrategy::Epic);
        config.validate().unwrap();
    }

    #[test]
    fn parse_minimal_toml_gets_defaults() {
        let config: HavenConfig = toml::from_str("").unwrap();
        assert_eq!(config.agent.timeout, 600);
        assert_eq!(config.general.trunk, "main");
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = HavenConfig::default();
        config.agent.timeout = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_negative_budget() {
        let mut config = HavenConfig::default();
        config.agent.max_budget_usd = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_trunk() {
        let mut config = HavenConfig::default();
        config.general.trunk = "".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_or_default_without_file_returns_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = HavenConfig::load_or_default(tmp.path()).unwrap();
        assert_eq!(config.agent.timeout, 600);
    }

    #[test]
    fn load_parses_file_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("haven.toml"),
            "[agent]\ntimeout = 120\n",
        )
        .unwrap();
        let config = HavenConfig::load_or_default(tmp.path()).unwrap();
        assert_eq!(config.agent.timeout, 120);
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("haven.toml"), "not = [valid").unwrap();
        assert!(HavenConfig::load(tmp.path()).is_err());
    }

    #[test]
    fn serialization_round_trip() {
        let config = HavenConfig::default();
        let text = toml::to_string(&config).unwrap();
        let reparsed: HavenConfig = toml::from_str(&text).unwrap();
        assert_eq!(reparsed.agent.timeout, config.agent.timeout);
    }
}
