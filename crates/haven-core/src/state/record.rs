use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version written by this build. Read by `sync` to detect
/// records written by an incompatible future version, so it can escalate
/// rather than silently misinterpret them.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Spawned,
    Running,
    Completed,
    Error,
    Reaped,
    Merged,
    Killed,
    Rejected,
    Orphaned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Failed,
    Blocked,
}

/// Present when the task runs in worktree mode. Absent in inline mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeRef {
    pub path: String,
    pub branch: String,
    pub base_branch: String,
    pub branching: String,
    #[serde(default)]
    pub resumed: bool,
}

/// Primary entity of the state store, keyed by task id.
///
/// Mutated only through [`super::StateStore::update`]; see invariants I1-I6
/// in the spec for the constraints every mutation must preserve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentRecord {
    pub schema_version: u32,
    pub status: AgentStatus,

    pub spawned_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub reaped_at: Option<DateTime<Utc>>,
    pub killed_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,

    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<i32>,

    pub mission_file: Option<String>,
    pub log_file: Option<String>,
    pub srt_config: Option<String>,
    pub mcp_config: Option<String>,

    pub mcp_server: Option<String>,
    pub mcp_port: Option<u16>,
    pub mcp_pid: Option<u32>,

    pub worktree: Option<WorktreeRef>,

    pub dirty_worktree: bool,
    pub uncommitted_files: u32,

    pub result_status: Option<ResultStatus>,

    pub pr_url: Option<String>,
    pub pr_created_at: Option<DateTime<Utc>>,

    pub timeout: u64,
}

impl Default for AgentRecord {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            status: AgentStatus::Spawned,
            spawned_at: None,
            ended_at: None,
            reaped_at: None,
            killed_at: None,
            rejected_at: None,
            pid: None,
            exit_code: None,
            exit_signal: None,
            mission_file: None,
            log_file: None,
            srt_config: None,
            mcp_config: None,
            mcp_server: None,
            mcp_port: None,
            mcp_pid: None,
            worktree: None,
            dirty_worktree: false,
            uncommitted_files: 0,
            result_status: None,
            pr_url: None,
            pr_created_at: None,
            timeout: 0,
        }
    }
}

impl AgentRecord {
    pub fn new(status: AgentStatus) -> Self {
        Self {
            status,
            spawned_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// I2: `pid` should only be set while the record is in an alive state.
    pub fn is_alive_status(&self) -> bool {
        matches!(self.status, AgentStatus::Spawned | AgentStatus::Running)
    }

    /// I5: once set, `reaped_at` must never be cleared by a later mutation.
    pub fn mark_reaped(&mut self, result_status: ResultStatus) {
        self.status = AgentStatus::Reaped;
        self.result_status = Some(result_status);
        self.reaped_at = Some(Utc::now());
        self.pid = None;
    }

    /// Transition from `spawned` once the supervisor has observed the child
    /// producing its first line of output or the first heartbeat tick.
    pub fn mark_running(&mut self) {
        if self.status == AgentStatus::Spawned {
            self.status = AgentStatus::Running;
        }
    }

    /// Recorded by the supervisor the moment the child process exits.
    pub fn mark_exited(&mut self, exit_code: Option<i32>, exit_signal: Option<i32>, success: bool) {
        self.status = if success {
            AgentStatus::Completed
        } else {
            AgentStatus::Error
        };
        self.exit_code = exit_code;
        self.exit_signal = exit_signal;
        self.ended_at = Some(Utc::now());
    }

    pub fn mark_killed(&mut self) {
        self.status = AgentStatus::Killed;
        self.killed_at = Some(Utc::now());
        self.pid = None;
    }

    pub fn mark_rejected(&mut self) {
        self.status = AgentStatus::Rejected;
        self.rejected_at = Some(Utc::now());
        self.pid = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_alive_with_spawned_at_set() {
        let record = AgentRecord::new(AgentStatus::Spawned);
        assert!(record.is_alive_status());
        assert!(record.spawned_at.is_some());
    }

    #[test]
    fn mark_reaped_is_sticky() {
        let mut record = AgentRecord::new(AgentStatus::Completed);
        record.pid = Some(123);
        record.mark_reaped(ResultStatus::Completed);
        assert_eq!(record.status, AgentStatus::Reaped);
        assert!(record.reaped_at.is_some());
        assert!(record.pid.is_none());
        assert!(!record.is_alive_status());
    }

    #[test]
    fn serde_round_trip() {
        let record = AgentRecord::new(AgentStatus::Spawned);
        let json = serde_json::to_string(&record).unwrap();
        let back: AgentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, record.status);
        assert_eq!(back.schema_version, CURRENT_SCHEMA_VERSION);
    }
}
