//! Mission file: a write-once YAML dossier describing a single spawn, kept
//! for debug/trace only — nothing in the core re-reads it to make
//! decisions (§3).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HavenError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionFile {
    pub task_id: String,
    pub epic_id: Option<String>,
    pub prd_id: String,
    pub instructions: String,
    pub constraints: Vec<String>,
    pub timeout: u64,
}

impl MissionFile {
    /// Write the dossier to `path`, failing if one is already there — the
    /// mission file is write-once per spawn.
    pub async fn write_once(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Err(HavenError::AlreadyRunning(format!(
                "mission file already exists at {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| HavenError::Artifact(format!("failed to serialize mission: {e}")))?;
        tokio::fs::write(path, yaml).await?;
        Ok(())
    }

    pub async fn read_from(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| HavenError::NotFound(format!("mission file {}: {e}", path.display())))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| HavenError::Artifact(format!("malformed mission file: {e}")))
    }
}
