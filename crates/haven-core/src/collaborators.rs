//! External interfaces (§6) consumed by the core but never implemented by
//! it: the markdown/frontmatter artefact store, memory/log consolidation,
//! and PR creation on forges all live outside this crate. These traits are
//! the seams; the file-backed `Artefacts` and concatenating `Prompts` below
//! are reference implementations sufficient for this crate's own tests and
//! for a caller with nothing else wired up yet.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{HavenError, Result};

/// A task's place in the PRD/epic hierarchy, as the core needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskParent {
    pub prd_id: String,
    pub epic_id: Option<String>,
}

/// What `Artefacts::get_task` returns: the artefact's own file path plus the
/// parent linkage the spawn pipeline needs (§4.3 precondition 3).
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub file: PathBuf,
    pub parent: TaskParent,
}

/// The markdown/frontmatter task store, external to this crate.
#[async_trait]
pub trait Artefacts: Send + Sync {
    async fn get_task(&self, task_id: &str) -> Result<TaskHandle>;
    async fn transition_task(&self, task_id: &str, new_status: &str) -> Result<()>;
}

/// Opaque memory/log consolidation collaborator. The core never interprets
/// its output; it only knows it may be surfaced into a bootstrap prompt.
pub trait Memory: Send + Sync {
    fn surface(&self, task_id: &str) -> Option<String>;
}

/// A `Memory` that never has anything to contribute.
pub struct NoopMemory;

impl Memory for NoopMemory {
    fn surface(&self, _task_id: &str) -> Option<String> {
        None
    }
}

/// Builds the free-form bootstrap prompt handed to a spawned child. The
/// core does not interpret the result (§4.6).
pub trait Prompts: Send + Sync {
    fn build_agent_spawn_prompt(&self, request: &PromptRequest) -> String;
}

#[derive(Debug, Clone)]
pub struct PromptRequest<'a> {
    pub task_id: &'a str,
    pub epic_id: Option<&'a str>,
    pub prd_id: &'a str,
    pub deliverables: &'a [String],
    pub memory: Option<&'a str>,
    pub use_worktree: bool,
}

/// Concatenates task/epic/prd/deliverables/memory into plain text.
pub struct DefaultPrompts;

impl Prompts for DefaultPrompts {
    fn build_agent_spawn_prompt(&self, request: &PromptRequest) -> String {
        let mut out = String::new();
        out.push_str(&format!("Task: {}\n", request.task_id));
        out.push_str(&format!("PRD: {}\n", request.prd_id));
        if let Some(epic) = request.epic_id {
            out.push_str(&format!("Epic: {epic}\n"));
        }
        out.push_str(&format!(
            "Mode: {}\n",
            if request.use_worktree {
                "worktree"
            } else {
                "inline"
            }
        ));
        if !request.deliverables.is_empty() {
            out.push_str("Deliverables:\n");
            for item in request.deliverables {
                out.push_str(&format!("- {item}\n"));
            }
        }
        if let Some(memory) = request.memory {
            out.push_str("\nRelevant memory:\n");
            out.push_str(memory);
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreatePrOptions {
    pub cwd: PathBuf,
    pub title: Option<String>,
    pub draft: bool,
    pub epic_id: Option<String>,
    pub prd_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PrResult {
    pub url: String,
}

/// PR creation on a forge. No implementation ships with this crate
/// (Non-goal); callers with their own forge client supply one.
#[async_trait]
pub trait Pr: Send + Sync {
    async fn create_pr(
        &self,
        task_id: &str,
        options: CreatePrOptions,
    ) -> std::result::Result<PrResult, String>;
}

/// A minimal file-backed `Artefacts` implementation: tasks are read from
/// `<repo>/.haven/tasks/<id>.json`; `transition_task` rewrites that file's
/// `status` field. This is a test/reference implementation only — it is not
/// a claim that this crate owns the markdown/frontmatter store.
pub struct FileArtefacts {
    tasks_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct TaskFile {
    status: String,
    prd_id: String,
    #[serde(default)]
    epic_id: Option<String>,
}

impl FileArtefacts {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            tasks_dir: repo_root.join(".haven").join("tasks"),
        }
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.tasks_dir.join(format!("{task_id}.json"))
    }
}

#[async_trait]
impl Artefacts for FileArtefacts {
    async fn get_task(&self, task_id: &str) -> Result<TaskHandle> {
        let path = self.task_path(task_id);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| HavenError::NotFound(format!("task {task_id}: {e}")))?;
        let task: TaskFile = serde_json::from_str(&raw)
            .map_err(|e| HavenError::Artifact(format!("malformed task file {task_id}: {e}")))?;
        Ok(TaskHandle {
            file: path,
            parent: TaskParent {
                prd_id: task.prd_id,
                epic_id: task.epic_id,
            },
        })
    }

    async fn transition_task(&self, task_id: &str, new_status: &str) -> Result<()> {
        let path = self.task_path(task_id);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| HavenError::NotFound(format!("task {task_id}: {e}")))?;
        let mut task: TaskFile = serde_json::from_str(&raw)
            .map_err(|e| HavenError::Artifact(format!("malformed task file {task_id}: {e}")))?;
        task.status = new_status.to_string();
        let serialized = serde_json::to_string_pretty(&task)
            .map_err(|e| HavenError::Artifact(e.to_string()))?;
        tokio::fs::write(&path, serialized).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_task(dir: &Path, id: &str, prd_id: &str) {
        tokio::fs::create_dir_all(dir).await.unwrap();
        let body = serde_json::json!({ "status": "InProgress", "prd_id": prd_id, "epic_id": null });
        tokio::fs::write(dir.join(format!("{id}.json")), body.to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_task_reads_parent_linkage() {
        let tmp = tempfile::tempdir().unwrap();
        write_task(&tmp.path().join(".haven").join("tasks"), "T001", "PRD-1").await;

        let artefacts = FileArtefacts::new(tmp.path());
        let handle = artefacts.get_task("T001").await.unwrap();
        assert_eq!(handle.parent.prd_id, "PRD-1");
    }

    #[tokio::test]
    async fn get_task_missing_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let artefacts = FileArtefacts::new(tmp.path());
        assert!(matches!(
            artefacts.get_task("ghost").await,
            Err(HavenError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn transition_task_rewrites_status() {
        let tmp = tempfile::tempdir().unwrap();
        write_task(&tmp.path().join(".haven").join("tasks"), "T002", "PRD-1").await;

        let artefacts = FileArtefacts::new(tmp.path());
        artefacts.transition_task("T002", "Done").await.unwrap();

        let handle = artefacts.get_task("T002").await.unwrap();
        let raw = tokio::fs::read_to_string(&handle.file).await.unwrap();
        assert!(raw.contains("\"Done\""));
    }

    #[test]
    fn default_prompts_concatenates_fields() {
        let prompts = DefaultPrompts;
        let request = PromptRequest {
            task_id: "T001",
            epic_id: Some("E1"),
            prd_id: "PRD-1",
            deliverables: &["ship the thing".to_string()],
            memory: Some("past attempt failed on edge case X"),
            use_worktree: true,
        };
        let text = prompts.build_agent_spawn_prompt(&request);
        assert!(text.contains("T001"));
        assert!(text.contains("PRD-1"));
        assert!(text.contains("E1"));
        assert!(text.contains("ship the thing"));
        assert!(text.contains("edge case X"));
    }

    #[test]
    fn noop_memory_surfaces_nothing() {
        assert!(NoopMemory.surface("T001").is_none());
    }
}
