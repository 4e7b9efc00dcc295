//! Spawn pipeline (C3): ordered preconditions, then ordered provisioning
//! steps, ending with an atomically recorded `spawned` status (§4.3).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};

use crate::collaborators::{Artefacts, Memory, PromptRequest, Prompts};
use crate::config::HavenConfig;
use crate::error::{HavenError, Result};
use crate::escalation::{Escalation, OpResult, Outcome};
use crate::git_exec;
use crate::haven_layout::HavenLayout;
use crate::mcp::{self, TransportDescriptor, TransportMode};
use crate::run_claim;
use crate::state::{AgentRecord, AgentStatus, StateStore, WorktreeRef};
use crate::worktree::{BranchContext, Classification, CreateOptions, WorktreeManager};

/// Budget and watchdog parameters recognized by the child launcher (§4.3).
/// Passed through to the child; the supervisor does not enforce budget.
#[derive(Debug, Clone)]
pub struct ChildBudget {
    pub timeout: u64,
    pub max_budget_usd: f64,
    pub watchdog_timeout: u64,
    pub risky_mode: bool,
    pub sandbox: bool,
    pub append_logs: bool,
}

/// The opaque child program the core launches: a configurable external
/// command, not a multi-vendor adapter registry.
#[derive(Debug, Clone)]
pub struct ChildLauncher {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub resume: bool,
    pub timeout_override: Option<u64>,
    pub use_worktree_override: Option<bool>,
    pub heartbeat: bool,
}

/// Read/write path allowlists and IPC endpoints enumerated for a sandboxed
/// child (glossary: "Sandbox settings").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    pub read_paths: Vec<String>,
    pub write_paths: Vec<String>,
    pub mcp_endpoints: Vec<String>,
    pub unsafe_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct McpClientConfig {
    mode: TransportMode,
    socket: Option<String>,
    port: Option<u16>,
}

pub struct SpawnOutput {
    pub task_id: String,
    pub pid: u32,
    pub record: AgentRecord,
    pub worktree_path: Option<PathBuf>,
    pub child: Child,
    pub socket_bridge: Option<mcp::SocketBridge>,
}

fn no_resume_reject(reason: &str) -> Escalation {
    Escalation::new(
        reason,
        vec![
            "re-run with --resume to reuse the existing worktree".to_string(),
            "or run `reap` on the existing record first".to_string(),
            "or run `reject` to discard it".to_string(),
        ],
    )
}

/// Resolution of §4.3 precondition 4 / §4.5's "new spawn finds a previous
/// record" decision table.
enum PriorRecordDecision {
    FreshCleanup,
    ResumeInPlace,
    Reject(Escalation),
}

fn decide_prior_record(
    classification: Classification,
    prior_status: Option<AgentStatus>,
    resume_requested: bool,
) -> PriorRecordDecision {
    use Classification::*;

    match classification {
        Absent | CleanNoncontributing => PriorRecordDecision::FreshCleanup,
        AlreadyMergedClean => PriorRecordDecision::FreshCleanup,
        AlreadyMergedDirty => {
            if resume_requested {
                PriorRecordDecision::ResumeInPlace
            } else {
                PriorRecordDecision::Reject(no_resume_reject(
                    "existing worktree is already merged but has uncommitted changes",
                ))
            }
        }
        Dirty | Ahead => {
            let was_completed = matches!(
                prior_status,
                Some(AgentStatus::Completed) | Some(AgentStatus::Reaped)
            );
            if resume_requested {
                PriorRecordDecision::ResumeInPlace
            } else if was_completed {
                PriorRecordDecision::Reject(no_resume_reject(
                    "existing worktree has unmerged work from a completed run",
                ))
            } else {
                PriorRecordDecision::Reject(no_resume_reject(
                    "existing worktree has unmerged or uncommitted work",
                ))
            }
        }
    }
}

/// Run the spawn pipeline end to end. The returned `Child` is owned by the
/// caller, which hands it to [`crate::supervisor`] to tail and reap.
#[allow(clippy::too_many_arguments)]
pub async fn spawn(
    task_id: &str,
    repo_root: &Path,
    layout: &HavenLayout,
    config: &HavenConfig,
    worktree_mgr: &WorktreeManager,
    store: &StateStore,
    artefacts: &dyn Artefacts,
    prompts: &dyn Prompts,
    memory: &dyn Memory,
    launcher: &ChildLauncher,
    options: SpawnOptions,
) -> OpResult<SpawnOutput> {
    // Precondition 1: subprocess mode enabled.
    if !config.agent.use_subprocess {
        return Ok(Outcome::Escalate(Escalation::single_step(
            "subprocess mode is disabled in config",
            "set agent.use_subprocess = true in haven.toml",
        )));
    }

    // Precondition 2: reachable MCP server.
    match mcp::check_mcp_agent_server(layout.root()).await {
        Ok(report) if report.pid_alive && report.connectivity_ok => {}
        Ok(_) => {
            return Ok(Outcome::Escalate(Escalation::single_step(
                "MCP server is not reachable",
                "start the MCP agent server before spawning",
            )));
        }
        Err(e) => {
            return Ok(Outcome::Escalate(Escalation::single_step(
                format!("MCP server is not reachable: {e}"),
                "start the MCP agent server before spawning",
            )));
        }
    }

    // Precondition 3: task artefact exists with a valid parent.
    let task = match artefacts.get_task(task_id).await {
        Ok(task) => task,
        Err(HavenError::NotFound(detail)) => {
            return Ok(Outcome::Escalate(Escalation::single_step(
                format!("task artefact not found: {detail}"),
                "create the task artefact before spawning",
            )));
        }
        Err(e) => return Err(e),
    };

    // Precondition 4: reconcile against any pre-existing record.
    let use_worktree = options
        .use_worktree_override
        .unwrap_or(config.agent.use_worktrees);
    let classification = worktree_mgr.classify(task_id).await.map_err(|e| {
        HavenError::GitFailure(format!("classify {task_id}: {e}"))
    })?;

    let existing_status = store.load()?.get(task_id).map(|r| r.status);
    if let Some(status) = existing_status {
        if matches!(status, AgentStatus::Spawned | AgentStatus::Running) {
            let live = store
                .load()?
                .get(task_id)
                .and_then(|r| r.pid)
                .map(pid_alive)
                .unwrap_or(false);
            if live {
                return Ok(Outcome::Escalate(Escalation::new(
                    "task already has a live run",
                    vec![
                        "wait for it with `wait`".to_string(),
                        "kill it with `kill`".to_string(),
                        "or reap it with `reap`".to_string(),
                    ],
                )));
            }
        }
    }

    let resume = match decide_prior_record(classification, existing_status, options.resume) {
        PriorRecordDecision::FreshCleanup => {
            if use_worktree && classification != Classification::Absent {
                worktree_mgr.cleanup(task_id).await;
            }
            false
        }
        PriorRecordDecision::ResumeInPlace => true,
        PriorRecordDecision::Reject(escalation) => {
            return Ok(Outcome::Escalate(escalation));
        }
    };

    // Precondition 5: worktree-mode repo sanity.
    if use_worktree {
        let is_repo = git_exec::run_git(&["rev-parse", "--is-inside-work-tree"], repo_root)
            .await
            .is_ok();
        if !is_repo {
            return Ok(Outcome::Escalate(Escalation::single_step(
                "repository root is not a git repository",
                "run spawn from inside a git repository, or disable --worktree",
            )));
        }
        let trunk_status = git_exec::run_git(&["status", "--porcelain"], repo_root)
            .await
            .map_err(|e| HavenError::GitFailure(e.to_string()))?;
        if !trunk_status.stdout.trim().is_empty() {
            return Ok(Outcome::Escalate(Escalation::single_step(
                "trunk has uncommitted changes",
                "commit or stash changes on trunk before spawning",
            )));
        }
        if git_exec::run_git(&["rev-parse", "HEAD"], repo_root)
            .await
            .is_err()
        {
            return Ok(Outcome::Escalate(Escalation::single_step(
                "repository has no commits",
                "create an initial commit before spawning",
            )));
        }
    }

    // Step (a): ensure hierarchy + sync parent.
    let branch_context = BranchContext {
        task_id: task_id.to_string(),
        epic_id: task.parent.epic_id.clone(),
        prd_id: Some(task.parent.prd_id.clone()),
    };
    if use_worktree {
        worktree_mgr
            .ensure_hierarchy(&branch_context)
            .await
            .map_err(|e| HavenError::GitFailure(e.to_string()))?;
        worktree_mgr
            .sync_parent(&branch_context, config.general.sync_parent)
            .await
            .map_err(|e| HavenError::GitFailure(e.to_string()))?;
    }

    // Step (b): create or resume the worktree.
    let worktree_info = if use_worktree {
        let base_branch = worktree_mgr.trunk().to_string();
        Some(
            worktree_mgr
                .create_worktree(task_id, &base_branch, CreateOptions { resume })
                .await
                .map_err(|e| HavenError::GitFailure(e.to_string()))?,
        )
    } else {
        None
    };
    let cwd = worktree_info
        .as_ref()
        .map(|w| w.path.clone())
        .unwrap_or_else(|| repo_root.to_path_buf());

    layout.create_agent_dirs(task_id).await?;

    // Step (c): claim the run.
    let pid_placeholder = std::process::id();
    run_claim::claim_run(&layout.run_claim_path(task_id), task_id, "spawn", pid_placeholder)
        .await?;

    // Step (d): write the mission file.
    let timeout = options.timeout_override.unwrap_or(config.agent.timeout);
    let deliverables: Vec<String> = Vec::new();
    let prompt = prompts.build_agent_spawn_prompt(&PromptRequest {
        task_id,
        epic_id: task.parent.epic_id.as_deref(),
        prd_id: &task.parent.prd_id,
        deliverables: &deliverables,
        memory: memory.surface(task_id).as_deref(),
        use_worktree,
    });
    let mission = crate::mission::MissionFile {
        task_id: task_id.to_string(),
        epic_id: task.parent.epic_id.clone(),
        prd_id: task.parent.prd_id.clone(),
        instructions: prompt.clone(),
        constraints: Vec::new(),
        timeout,
    };
    mission.write_once(&layout.mission_path(task_id)).await?;

    // Step (e): materialize MCP client config, bridging if sandboxed.
    let descriptor = TransportDescriptor::read(&layout.mcp_descriptor_path()).await?;
    let mut socket_bridge = None;
    let client_config = if config.agent.sandbox && descriptor.mode == TransportMode::Tcp {
        let bridge_socket = layout.agent_dir(task_id).join("mcp-bridge.sock");
        let port = descriptor
            .port
            .ok_or_else(|| HavenError::TransportUnreachable("descriptor missing port".into()))?;
        let bridge = mcp::SocketBridge::start(bridge_socket.clone(), port).await?;
        socket_bridge = Some(bridge);
        McpClientConfig {
            mode: TransportMode::Unix,
            socket: Some(bridge_socket.display().to_string()),
            port: None,
        }
    } else {
        McpClientConfig {
            mode: descriptor.mode,
            socket: descriptor.socket.clone(),
            port: descriptor.port,
        }
    };
    let client_config_json = serde_json::to_string_pretty(&client_config)
        .map_err(|e| HavenError::Artifact(e.to_string()))?;
    tokio::fs::write(layout.mcp_config_path(task_id), client_config_json).await?;

    // Step (f): materialize sandbox settings.
    let mut mcp_endpoints = Vec::new();
    if let Some(socket) = &client_config.socket {
        mcp_endpoints.push(socket.clone());
    }
    if let Some(port) = client_config.port {
        mcp_endpoints.push(format!("127.0.0.1:{port}"));
    }
    let sandbox_settings = SandboxSettings {
        read_paths: vec![cwd.display().to_string()],
        write_paths: vec![cwd.display().to_string()],
        mcp_endpoints,
        unsafe_mode: config.general.unsafe_mode,
    };
    let sandbox_json = serde_json::to_string_pretty(&sandbox_settings)
        .map_err(|e| HavenError::Artifact(e.to_string()))?;
    tokio::fs::write(layout.srt_settings_path(task_id), sandbox_json).await?;

    // Step (g): start the child.
    let mut command = Command::new(&launcher.program);
    command
        .args(&launcher.args)
        .current_dir(&cwd)
        .envs(launcher.env.iter().cloned())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command
        .spawn()
        .map_err(|e| HavenError::ChildFailed(format!("failed to start child: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        use tokio::io::AsyncWriteExt;
        let _ = stdin.write_all(prompt.as_bytes()).await;
        let _ = stdin.shutdown().await;
    }

    let pid = child
        .id()
        .ok_or_else(|| HavenError::ChildFailed("child exited before pid was observable".into()))?;

    // Run claim recorded the supervisor's own pid as a placeholder; now that
    // the child is alive, re-point the claim at it.
    run_claim::claim_run(&layout.run_claim_path(task_id), task_id, "spawn", pid)
        .await
        .ok();

    // Step (h): atomically record spawned status.
    let record = store.update(|snapshot| {
        let mut record = AgentRecord::new(AgentStatus::Spawned);
        record.pid = Some(pid);
        record.timeout = timeout;
        record.mission_file = Some(layout.mission_path(task_id).display().to_string());
        record.log_file = Some(layout.run_log_path(task_id).display().to_string());
        record.srt_config = Some(layout.srt_settings_path(task_id).display().to_string());
        record.mcp_config = Some(layout.mcp_config_path(task_id).display().to_string());
        record.mcp_server = client_config.socket.clone().or_else(|| client_config.port.map(|p| p.to_string()));
        record.mcp_port = client_config.port;
        record.worktree = worktree_info.as_ref().map(|w| WorktreeRef {
            path: w.path.display().to_string(),
            branch: w.branch.clone(),
            base_branch: w.base_branch.clone(),
            branching: format!("{:?}", w.branching).to_lowercase(),
            resumed: w.resumed,
        });
        snapshot.insert(task_id.to_string(), record.clone());
        Ok(record)
    })?;

    Ok(Outcome::Ok(SpawnOutput {
        task_id: task_id.to_string(),
        pid,
        record,
        worktree_path: worktree_info.map(|w| w.path),
        child,
        socket_bridge,
    }))
}

fn pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DefaultPrompts, FileArtefacts, NoopMemory};
    use crate::config::BranchingStrategy;

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

    async fn write_task(haven_root_repo: &Path, id: &str) {
        let dir = haven_root_repo.join(".haven").join("tasks");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let body = serde_json::json!({ "status": "InProgress", "prd_id": "PRD-1", "epic_id": null });
        tokio::fs::write(dir.join(format!("{id}.json")), body.to_string())
            .await
            .unwrap();
    }

    async fn write_descriptor(layout: &HavenLayout) -> tokio::net::TcpListener {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let descriptor = TransportDescriptor {
            mode: TransportMode::Tcp,
            socket: None,
            port: Some(port),
            pid: std::process::id(),
        };
        descriptor.write(&layout.mcp_descriptor_path()).await.unwrap();
        listener
    }

    #[tokio::test]
    async fn rejects_when_subprocess_mode_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_test_repo(&repo);
        let layout = HavenLayout::for_repo(&repo);

        let mut config = HavenConfig::default();
        config.agent.use_subprocess = false;
        let store = StateStore::new(layout.state_path());
        let worktree_mgr = WorktreeManager::new(
            repo.clone(),
            layout.worktrees_dir(),
            "main".into(),
            BranchingStrategy::Flat,
        );
        let artefacts = FileArtefacts::new(&repo);
        let launcher = ChildLauncher {
            program: "true".into(),
            args: vec![],
            env: vec![],
        };

        let result = spawn(
            "T001",
            &repo,
            &layout,
            &config,
            &worktree_mgr,
            &store,
            &artefacts,
            &DefaultPrompts,
            &NoopMemory,
            &launcher,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

        match result {
            Outcome::Escalate(e) => assert!(e.reason.contains("subprocess mode")),
            Outcome::Ok(_) => panic!("expected escalation"),
        }
    }

    #[tokio::test]
    async fn rejects_when_mcp_unreachable() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_test_repo(&repo);
        let layout = HavenLayout::for_repo(&repo);

        let config = HavenConfig::default();
        let store = StateStore::new(layout.state_path());
        let worktree_mgr = WorktreeManager::new(
            repo.clone(),
            layout.worktrees_dir(),
            "main".into(),
            BranchingStrategy::Flat,
        );
        let artefacts = FileArtefacts::new(&repo);
        let launcher = ChildLauncher {
            program: "true".into(),
            args: vec![],
            env: vec![],
        };

        let result = spawn(
            "T001",
            &repo,
            &layout,
            &config,
            &worktree_mgr,
            &store,
            &artefacts,
            &DefaultPrompts,
            &NoopMemory,
            &launcher,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

        match result {
            Outcome::Escalate(e) => assert!(e.reason.contains("MCP")),
            Outcome::Ok(_) => panic!("expected escalation"),
        }
    }

    #[tokio::test]
    async fn rejects_when_task_artefact_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_test_repo(&repo);
        let layout = HavenLayout::for_repo(&repo);
        let _listener = write_descriptor(&layout).await;

        let config = HavenConfig::default();
        let store = StateStore::new(layout.state_path());
        let worktree_mgr = WorktreeManager::new(
            repo.clone(),
            layout.worktrees_dir(),
            "main".into(),
            BranchingStrategy::Flat,
        );
        let artefacts = FileArtefacts::new(&repo);
        let launcher = ChildLauncher {
            program: "true".into(),
            args: vec![],
            env: vec![],
        };

        let result = spawn(
            "ghost-task",
            &repo,
            &layout,
            &config,
            &worktree_mgr,
            &store,
            &artefacts,
            &DefaultPrompts,
            &NoopMemory,
            &launcher,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

        match result {
            Outcome::Escalate(e) => assert!(e.reason.contains("not found")),
            Outcome::Ok(_) => panic!("expected escalation"),
        }
    }

    #[tokio::test]
    async fn happy_path_spawns_child_and_records_state() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_test_repo(&repo);
        let layout = HavenLayout::for_repo(&repo);
        let _listener = write_descriptor(&layout).await;
        write_task(&repo, "T001").await;

        let config = HavenConfig::default();
        let store = StateStore::new(layout.state_path());
        let worktree_mgr = WorktreeManager::new(
            repo.clone(),
            layout.worktrees_dir(),
            "main".into(),
            BranchingStrategy::Flat,
        );
        let artefacts = FileArtefacts::new(&repo);
        let launcher = ChildLauncher {
            program: "cat".into(),
            args: vec![],
            env: vec![],
        };

        let result = spawn(
            "T001",
            &repo,
            &layout,
            &config,
            &worktree_mgr,
            &store,
            &artefacts,
            &DefaultPrompts,
            &NoopMemory,
            &launcher,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

        let mut output = match result {
            Outcome::Ok(output) => output,
            Outcome::Escalate(e) => panic!("unexpected escalation: {}", e.reason),
        };
        assert_eq!(output.record.status, AgentStatus::Spawned);
        assert!(output.worktree_path.as_ref().unwrap().exists());

        let snapshot = store.load().unwrap();
        assert_eq!(snapshot["T001"].pid, Some(output.pid));

        let _ = output.child.kill().await;
    }
}
