//! Worktree / branch manager (C2): deterministic mapping from task id to
//! isolated working copy, hierarchical branch layout, and safe
//! reconciliation against trunk.

mod classify;
mod merge;
mod naming;

pub use classify::Classification;
pub use merge::{ConflictFile, MergeReport};
pub use naming::BranchContext;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;

use crate::config::{BranchingStrategy, MergeStrategy};
use crate::git_ref::{validate_agent_key, validate_branch_name, RefNameError};

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("git command failed: {detail}")]
    GitFailed { detail: String },

    #[error("worktree already exists at '{path}'")]
    AlreadyExists { path: String },

    #[error("worktree not found at '{path}'")]
    NotFound { path: String },

    #[error("not inside a git repository")]
    NotARepo,

    #[error("invalid ref name: {0}")]
    InvalidRefName(#[from] RefNameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a created or resumed worktree.
#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: String,
    pub base_branch: String,
    pub branching: BranchingStrategy,
    pub task_id: String,
    pub resumed: bool,
}

/// Metadata returned by `list()` for existing worktrees.
#[derive(Debug, Clone)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: String,
    pub head_commit: String,
}

#[derive(Debug, Clone, Default)]
pub struct WorktreeStatus {
    pub exists: bool,
    pub clean: bool,
    pub ahead: u32,
    pub behind: u32,
    pub branch: Option<String>,
    pub conflict_files: Vec<String>,
}

/// Options controlling `createWorktree`.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub resume: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    pub force: bool,
}

/// Manages git worktrees and the branch hierarchy tasks live on.
///
/// Every mutation is a subprocess invocation of the real `git` binary — this
/// crate never links a git library. Operations on different task ids may
/// run concurrently; operations on the same task id must be serialized by
/// the caller (the supervisor owns exactly one task id per process).
pub struct WorktreeManager {
    repo_root: PathBuf,
    worktrees_dir: PathBuf,
    trunk: String,
    strategy: BranchingStrategy,
}

impl WorktreeManager {
    pub fn new(
        repo_root: PathBuf,
        worktrees_dir: PathBuf,
        trunk: String,
        strategy: BranchingStrategy,
    ) -> Self {
        Self {
            repo_root,
            worktrees_dir,
            trunk,
            strategy,
        }
    }

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    pub fn worktrees_dir(&self) -> &Path {
        &self.worktrees_dir
    }

    /// List worktrees registered with git under this repo (includes the
    /// main worktree itself; callers filter by path as needed).
    pub async fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>, WorktreeError> {
        let out = self.run_git(&["worktree", "list", "--porcelain"]).await?;
        Ok(parse_worktree_list_porcelain(&out))
    }

    /// Create any missing intermediate branches from their parent. Idempotent:
    /// running twice creates nothing the second time (P5).
    pub async fn ensure_hierarchy(&self, context: &BranchContext) -> Result<(), WorktreeError> {
        for branch in naming::hierarchy_branches(&self.strategy, context) {
            validate_branch_name(&branch.name)?;
            if self.branch_exists(&branch.name).await? {
                continue;
            }
            self.run_git(&["branch", &branch.name, &branch.parent]).await?;
            tracing::info!(branch = %branch.name, parent = %branch.parent, "created hierarchy branch");
        }
        Ok(())
    }

    /// Fast-forward the immediate parent of the task branch from its own
    /// parent. Gated by the caller's config flag; pass `enabled = false` to
    /// get a no-op `Disabled` result.
    pub async fn sync_parent(
        &self,
        context: &BranchContext,
        enabled: bool,
    ) -> Result<SyncParentResult, WorktreeError> {
        if !enabled {
            return Ok(SyncParentResult::Disabled);
        }
        let Some(parent_branch) = naming::immediate_parent(&self.strategy, context) else {
            return Ok(SyncParentResult::NoParent);
        };
        let grandparent = naming::parent_of(&self.strategy, context, &parent_branch)
            .unwrap_or_else(|| self.trunk.clone());

        let merge_base = self
            .run_git(&["merge-base", &parent_branch, &grandparent])
            .await?;
        let grandparent_head = self.run_git(&["rev-parse", &grandparent]).await?;
        if merge_base.trim() != grandparent_head.trim() {
            // The parent has diverged from its own parent; fast-forward is
            // impossible without losing commits.
            return Err(WorktreeError::GitFailed {
                detail: format!(
                    "cannot fast-forward '{parent_branch}' from '{grandparent}': branches have diverged"
                ),
            });
        }

        self.run_git(&[
            "fetch",
            ".",
            &format!("{grandparent}:{parent_branch}"),
        ])
        .await?;
        Ok(SyncParentResult::FastForwarded)
    }

    /// Materialize `<worktreesDir>/T` on `task/T`.
    ///
    /// If the branch already exists with no commits ahead of its base it is
    /// reused; if its working tree already exists and is non-empty it is
    /// resumed (caller must have asked for resume via `options.resume`).
    pub async fn create_worktree(
        &self,
        task_id: &str,
        base_branch: &str,
        options: CreateOptions,
    ) -> Result<WorktreeInfo, WorktreeError> {
        validate_agent_key(task_id)?;
        let branch = naming::task_branch(task_id);
        validate_branch_name(&branch)?;
        let wt_path = self.worktrees_dir.join(task_id);

        if wt_path.exists() {
            if !options.resume {
                return Err(WorktreeError::AlreadyExists {
                    path: wt_path.display().to_string(),
                });
            }
            return Ok(WorktreeInfo {
                path: wt_path,
                branch,
                base_branch: base_branch.to_string(),
                branching: self.strategy.clone(),
                task_id: task_id.to_string(),
                resumed: true,
            });
        }

        if let Some(parent) = wt_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let branch_exists = self.branch_exists(&branch).await?;
        let args: Vec<String> = if branch_exists {
            vec![
                "worktree".into(),
                "add".into(),
                wt_path.display().to_string(),
                branch.clone(),
            ]
        } else {
            vec![
                "worktree".into(),
                "add".into(),
                "-b".into(),
                branch.clone(),
                wt_path.display().to_string(),
                base_branch.to_string(),
            ]
        };
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_git(&arg_refs).await?;

        tracing::info!(
            task = task_id,
            path = %wt_path.display(),
            branch = %branch,
            "created worktree"
        );

        Ok(WorktreeInfo {
            path: wt_path,
            branch,
            base_branch: base_branch.to_string(),
            branching: self.strategy.clone(),
            task_id: task_id.to_string(),
            resumed: false,
        })
    }

    /// Detach the worktree; does not delete the branch.
    pub async fn remove_worktree(
        &self,
        task_id: &str,
        options: RemoveOptions,
    ) -> Result<(), WorktreeError> {
        let wt_path = self.worktrees_dir.join(task_id);
        if !wt_path.exists() {
            return Err(WorktreeError::NotFound {
                path: wt_path.display().to_string(),
            });
        }

        let mut args = vec!["worktree".to_string(), "remove".to_string()];
        if options.force {
            args.push("--force".to_string());
        }
        args.push(wt_path.display().to_string());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_git(&arg_refs).await?;

        tracing::info!(task = task_id, "removed worktree");
        Ok(())
    }

    /// Worktree + local branch + remote branch deletion, best-effort, each
    /// step independent of the others' success.
    pub async fn cleanup(&self, task_id: &str) {
        let branch = naming::task_branch(task_id);
        let wt_path = self.worktrees_dir.join(task_id);

        if wt_path.exists() {
            let _ = self
                .remove_worktree(task_id, RemoveOptions { force: true })
                .await;
            let _ = tokio::fs::remove_dir_all(&wt_path).await;
        }
        let _ = self.run_git(&["worktree", "prune"]).await;
        let _ = self.run_git(&["branch", "-D", &branch]).await;
        let _ = self
            .run_git(&["push", "origin", "--delete", &branch])
            .await;

        tracing::info!(task = task_id, "cleanup complete");
    }

    pub async fn status(&self, task_id: &str) -> Result<WorktreeStatus, WorktreeError> {
        let wt_path = self.worktrees_dir.join(task_id);
        if !wt_path.exists() {
            return Ok(WorktreeStatus::default());
        }
        let branch = naming::task_branch(task_id);

        let porcelain = self.run_git_in(&wt_path, &["status", "--porcelain"]).await?;
        let clean = porcelain.trim().is_empty();

        let (ahead, behind) = self.ahead_behind(&branch).await.unwrap_or((0, 0));

        Ok(WorktreeStatus {
            exists: true,
            clean,
            ahead,
            behind,
            branch: Some(branch),
            conflict_files: Vec::new(),
        })
    }

    /// Classify a task's worktree/branch pair against trunk. The sole input
    /// to the spawn/reap decision tables (§4.3/§4.5).
    pub async fn classify(&self, task_id: &str) -> Result<Classification, WorktreeError> {
        classify::classify(self, task_id).await
    }

    /// Dry-run (or real) merge of `branch` into `trunk` under `strategy`.
    /// Conflicts are detected via a dry-run merge-tree before any mutation.
    pub async fn merge_to(
        &self,
        branch: &str,
        strategy: MergeStrategy,
        dry_run: bool,
    ) -> Result<MergeReport, WorktreeError> {
        merge::merge_to(self, branch, strategy, dry_run).await
    }

    pub(crate) async fn branch_exists(&self, branch: &str) -> Result<bool, WorktreeError> {
        let output = Command::new("git")
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .current_dir(&self.repo_root)
            .output()
            .await?;
        Ok(output.status.success())
    }

    async fn ahead_behind(&self, branch: &str) -> Result<(u32, u32), WorktreeError> {
        let spec = format!("{}...{}", self.trunk, branch);
        let out = self
            .run_git(&["rev-list", "--left-right", "--count", &spec])
            .await?;
        let mut parts = out.trim().split_whitespace();
        let behind = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let ahead = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok((ahead, behind))
    }

    pub(crate) async fn run_git(&self, args: &[&str]) -> Result<String, WorktreeError> {
        self.run_git_in(&self.repo_root, args).await
    }

    pub(crate) async fn run_git_in(
        &self,
        cwd: &Path,
        args: &[&str],
    ) -> Result<String, WorktreeError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorktreeError::GitFailed {
                detail: stderr.trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub(crate) fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub(crate) fn worktree_path(&self, task_id: &str) -> PathBuf {
        self.worktrees_dir.join(task_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncParentResult {
    Disabled,
    NoParent,
    FastForwarded,
}

/// Parse `git worktree list --porcelain` output into entries.
pub(crate) fn parse_worktree_list_porcelain(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut head = String::new();
    let mut branch = String::new();

    for line in output.lines() {
        if let Some(p) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(p));
        } else if let Some(h) = line.strip_prefix("HEAD ") {
            head = h.to_string();
        } else if let Some(b) = line.strip_prefix("branch ") {
            branch = b.strip_prefix("refs/heads/").unwrap_or(b).to_string();
        } else if line.is_empty() {
            if let Some(p) = path.take() {
                entries.push(WorktreeEntry {
                    path: p,
                    branch: std::mem::take(&mut branch),
                    head_commit: std::mem::take(&mut head),
                });
            }
        }
    }

    if let Some(p) = path.take() {
        entries.push(WorktreeEntry {
            path: p,
            branch,
            head_commit: head,
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test_repo(dir: &Path) {
        use std::process::Command as StdCommand;
        StdCommand::new("git").args(["init"]).current_dir(dir).output().unwrap();
        StdCommand::new("git")
            .args(["config", "user.email", "test@haven.dev"])
            .current_dir(dir)
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.name", "Haven Test"])
            .current_dir(dir)
            .output()
            .unwrap();
        std::fs::write(dir.join("README.md"), "# test").unwrap();
        StdCommand::new("git").args(["add", "."]).current_dir(dir).output().unwrap();
        StdCommand::new("git")
            .args(["commit", "-m", "init"])
            .current_dir(dir)
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["branch", "-M", "main"])
            .current_dir(dir)
            .output()
            .unwrap();
    }

    fn manager(repo: PathBuf, worktrees: PathBuf) -> WorktreeManager {
        WorktreeManager::new(repo, worktrees, "main".into(), BranchingStrategy::Flat)
    }

    #[test]
    fn parse_porcelain_output() {
        let output = "\
worktree /home/user/repo
HEAD abc123def456
branch refs/heads/main

worktree /home/user/repo/.haven/worktrees/T001
HEAD def789abc012
branch refs/heads/task/T001

";
        let entries = parse_worktree_list_porcelain(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].branch, "task/T001");
        assert_eq!(entries[1].head_commit, "def789abc012");
    }

    #[tokio::test]
    async fn create_and_remove_worktree() {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_test_repo(&repo);

        let mgr = manager(repo.clone(), tmp.path().join("worktrees"));
        let info = mgr
            .create_worktree("T001", "main", CreateOptions::default())
            .await
            .unwrap();

        assert!(info.path.exists());
        assert_eq!(info.branch, "task/T001");
        assert!(!info.resumed);

        mgr.remove_worktree("T001", RemoveOptions::default())
            .await
            .unwrap();
        assert!(!info.path.exists());
    }

    #[tokio::test]
    async fn create_duplicate_without_resume_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_test_repo(&repo);

        let mgr = manager(repo.clone(), tmp.path().join("worktrees"));
        mgr.create_worktree("T002", "main", CreateOptions::default())
            .await
            .unwrap();
        let result = mgr
            .create_worktree("T002", "main", CreateOptions::default())
            .await;
        assert!(result.is_err());
        mgr.cleanup("T002").await;
    }

    #[tokio::test]
    async fn create_duplicate_with_resume_succeeds() {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_test_repo(&repo);

        let mgr = manager(repo.clone(), tmp.path().join("worktrees"));
        mgr.create_worktree("T003", "main", CreateOptions::default())
            .await
            .unwrap();
        let resumed = mgr
            .create_worktree("T003", "main", CreateOptions { resume: true })
            .await
            .unwrap();
        assert!(resumed.resumed);
        mgr.cleanup("T003").await;
    }

    #[tokio::test]
    async fn cleanup_removes_worktree_and_branch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_test_repo(&repo);

        let mgr = manager(repo.clone(), tmp.path().join("worktrees"));
        let info = mgr
            .create_worktree("T004", "main", CreateOptions::default())
            .await
            .unwrap();
        assert!(info.path.exists());

        mgr.cleanup("T004").await;
        assert!(!info.path.exists());

        let branch_check = std::process::Command::new("git")
            .args(["branch", "--list", &info.branch])
            .current_dir(&repo)
            .output()
            .unwrap();
        assert!(String::from_utf8_lossy(&branch_check.stdout).trim().is_empty());
    }

    #[tokio::test]
    async fn remove_nonexistent_worktree_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_test_repo(&repo);

        let mgr = manager(repo, tmp.path().join("worktrees"));
        let result = mgr.remove_worktree("nonexistent", RemoveOptions::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn ensure_hierarchy_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_test_repo(&repo);

        let mgr = WorktreeManager::new(
            repo.clone(),
            tmp.path().join("worktrees"),
            "main".into(),
            BranchingStrategy::Prd,
        );
        let ctx = BranchContext {
            task_id: "T005".into(),
            epic_id: None,
            prd_id: Some("PRD-001".into()),
        };
        mgr.ensure_hierarchy(&ctx).await.unwrap();
        assert!(mgr.branch_exists("prd/PRD-001").await.unwrap());

        // Second call must create nothing new and must not error.
        mgr.ensure_hierarchy(&ctx).await.unwrap();
        assert!(mgr.branch_exists("prd/PRD-001").await.unwrap());
    }
}
