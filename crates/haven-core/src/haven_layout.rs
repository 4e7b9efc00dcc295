//! Deterministic filesystem layout for a project's "haven" directory.
//!
//! Every path the rest of the crate touches for a given task id is derived
//! here so that no other module hardcodes a join of path segments.

use std::path::{Path, PathBuf};

/// Resolves every well-known path under a project's haven directory.
///
/// `root` is the haven directory itself (conventionally `<repo>/.haven`),
/// not the repo root.
#[derive(Debug, Clone)]
pub struct HavenLayout {
    root: PathBuf,
}

impl HavenLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Derive the haven directory from a repo root using the conventional
    /// `.haven` child directory name.
    pub fn for_repo(repo_root: &Path) -> Self {
        Self::new(repo_root.join(".haven"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn state_lock_path(&self) -> PathBuf {
        self.root.join("state.json.lock")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.root.join("worktrees")
    }

    pub fn worktree_dir(&self, task_id: &str) -> PathBuf {
        self.worktrees_dir().join(task_id)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn run_claim_path(&self, task_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{task_id}.run"))
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    pub fn agent_dir(&self, task_id: &str) -> PathBuf {
        self.agents_dir().join(task_id)
    }

    pub fn mission_path(&self, task_id: &str) -> PathBuf {
        self.agent_dir(task_id).join("mission.yaml")
    }

    pub fn srt_settings_path(&self, task_id: &str) -> PathBuf {
        self.agent_dir(task_id).join("srt-settings.json")
    }

    pub fn mcp_config_path(&self, task_id: &str) -> PathBuf {
        self.agent_dir(task_id).join("mcp-config.json")
    }

    pub fn run_log_path(&self, task_id: &str) -> PathBuf {
        self.agent_dir(task_id).join("run.log")
    }

    pub fn run_jsonlog_path(&self, task_id: &str) -> PathBuf {
        self.agent_dir(task_id).join("run.jsonlog")
    }

    pub fn result_path(&self, task_id: &str) -> PathBuf {
        self.agent_dir(task_id).join("result.yaml")
    }

    pub fn done_sentinel_path(&self, task_id: &str) -> PathBuf {
        self.agent_dir(task_id).join("done")
    }

    pub fn mcp_descriptor_path(&self) -> PathBuf {
        self.root.join("mcp-transport.json")
    }

    pub fn mcp_conductor_log_path(&self) -> PathBuf {
        self.root.join("mcp-conductor.log")
    }

    pub fn mcp_agent_log_path(&self) -> PathBuf {
        self.root.join("mcp-agent.log")
    }

    /// Create every directory this task's artifacts live under.
    pub async fn create_agent_dirs(&self, task_id: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.agent_dir(task_id)).await?;
        tokio::fs::create_dir_all(self.runs_dir()).await?;
        tokio::fs::create_dir_all(self.worktrees_dir()).await?;
        Ok(())
    }

    /// List task ids with an agent directory under this haven root.
    pub fn list_agent_task_ids(&self) -> std::io::Result<Vec<String>> {
        let dir = self.agents_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_deterministic() {
        let layout = HavenLayout::new("/repo/.haven");
        assert_eq!(
            layout.mission_path("T001"),
            PathBuf::from("/repo/.haven/agents/T001/mission.yaml")
        );
        assert_eq!(
            layout.worktree_dir("T001"),
            PathBuf::from("/repo/.haven/worktrees/T001")
        );
        assert_eq!(
            layout.run_claim_path("T001"),
            PathBuf::from("/repo/.haven/runs/T001.run")
        );
    }

    #[test]
    fn for_repo_derives_dot_haven() {
        let layout = HavenLayout::for_repo(Path::new("/repo"));
        assert_eq!(layout.root(), Path::new("/repo/.haven"));
    }

    #[tokio::test]
    async fn create_agent_dirs_creates_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = HavenLayout::new(tmp.path());
        layout.create_agent_dirs("T001").await.unwrap();
        assert!(layout.agent_dir("T001").is_dir());
        assert!(layout.runs_dir().is_dir());
        assert!(layout.worktrees_dir().is_dir());
    }

    #[tokio::test]
    async fn list_agent_task_ids_returns_created_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = HavenLayout::new(tmp.path());
        layout.create_agent_dirs("T002").await.unwrap();
        layout.create_agent_dirs("T001").await.unwrap();
        let ids = layout.list_agent_task_ids().unwrap();
        assert_eq!(ids, vec!["T001".to_string(), "T002".to_string()]);
    }

    #[test]
    fn list_agent_task_ids_empty_when_no_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = HavenLayout::new(tmp.path().join("nonexistent"));
        assert!(layout.list_agent_task_ids().unwrap().is_empty());
    }
}
