//! Collaborator wiring shared by every subcommand: the handful of core
//! objects (layout, config, state store, worktree manager, artefact store)
//! that nearly every operation needs, built the same way against whatever
//! repo root the invocation resolves to.

use std::path::PathBuf;

use haven_core::collaborators::{DefaultPrompts, FileArtefacts, NoopMemory};
use haven_core::config::HavenConfig;
use haven_core::haven_layout::HavenLayout;
use haven_core::state::StateStore;
use haven_core::worktree::WorktreeManager;

pub struct Context {
    pub repo_root: PathBuf,
    pub layout: HavenLayout,
    pub config: HavenConfig,
    pub store: StateStore,
    pub worktree_mgr: WorktreeManager,
    pub artefacts: FileArtefacts,
    pub prompts: DefaultPrompts,
    pub memory: NoopMemory,
}

impl Context {
    pub fn load(repo_override: Option<PathBuf>) -> anyhow::Result<Self> {
        let repo_root = match repo_override {
            Some(p) => p,
            None => discover_repo_root()?,
        };
        let layout = HavenLayout::for_repo(&repo_root);
        let config = HavenConfig::load_or_default(&repo_root)?;
        let store = StateStore::new(layout.state_path());
        let worktree_mgr = WorktreeManager::new(
            repo_root.clone(),
            layout.worktrees_dir(),
            config.general.trunk.clone(),
            config.branching.strategy.clone(),
        );
        let artefacts = FileArtefacts::new(&repo_root);
        Ok(Self {
            repo_root,
            layout,
            config,
            store,
            worktree_mgr,
            artefacts,
            prompts: DefaultPrompts,
            memory: NoopMemory,
        })
    }
}

/// Resolve the repo root the same way the child `git` process itself would.
pub fn discover_repo_root() -> anyhow::Result<PathBuf> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .output()?;
    if !output.status.success() {
        anyhow::bail!(
            "not inside a git repository (run from a repo, or pass --repo): {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let path = String::from_utf8(output.stdout)?.trim().to_string();
    Ok(PathBuf::from(path))
}
