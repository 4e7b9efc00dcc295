//! Supervisor loop (C4): owns a spawned child for its entire lifetime —
//! tails its stdio into the task's logs, ticks a heartbeat, races a wall
//! clock timeout against a watchdog window, and arbitrates operator
//! signals. Exactly one supervisor runs per live child; `wait`/`wait-all`
//! attach to the same child by re-running this loop against the pid
//! recorded in C1 rather than holding a second handle to the process.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::HeartbeatConfig;
use crate::error::{HavenError, Result};
use crate::haven_layout::HavenLayout;
use crate::log_tail::{parse_json_event, SummaryWidths};
use crate::security::redact::SecretRedactor;
use crate::state::{AgentStatus, StateStore};

/// How long the kill escalation waits for the child to exit after SIGTERM
/// before sending SIGKILL (§4.4: "waits ≤5 s").
const KILL_ESCALATION_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub timeout: Duration,
    /// `None` disables the watchdog; any activity on stdout/stderr resets it.
    pub watchdog_timeout: Option<Duration>,
    pub heartbeat: HeartbeatConfig,
    /// Use `heartbeat.verbose_interval_seconds` instead of
    /// `heartbeat.quiet_interval_seconds` as the tick period (§4.4: verbose
    /// mode ticks more often).
    pub verbose: bool,
    /// Mirror structured JSON lines from the child's stdout into the
    /// run's jsonlog in addition to the plain-text run log.
    pub capture_jsonlog: bool,
}

/// Why the supervisor loop returned. Distinct from the child's own exit
/// status, which is only meaningful for [`SupervisorExit::ChildExited`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    ChildExited,
    Detached,
    Killed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct SupervisorResult {
    pub exit: SupervisorExit,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<i32>,
}

/// Drive `child` to completion (or detach/kill), writing everything it
/// emits to the task's log files and keeping C1 in sync with its status.
pub async fn supervise(
    task_id: &str,
    mut child: Child,
    layout: &HavenLayout,
    store: &StateStore,
    options: SupervisorOptions,
) -> Result<SupervisorResult> {
    let log_path = layout.run_log_path(task_id);
    let jsonlog_path = layout.run_jsonlog_path(task_id);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| HavenError::ChildFailed("child spawned without captured stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| HavenError::ChildFailed("child spawned without captured stderr".into()))?;

    let (activity_tx, mut activity_rx) = mpsc::channel::<()>(64);

    let stdout_task = tokio::spawn(ingest_stream(
        stdout,
        log_path.clone(),
        options.capture_jsonlog.then(|| jsonlog_path.clone()),
        "stdout".to_string(),
        activity_tx.clone(),
    ));
    let stderr_task = tokio::spawn(ingest_stream(
        stderr,
        log_path.clone(),
        None,
        "stderr".to_string(),
        activity_tx,
    ));

    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| HavenError::Io(e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| HavenError::Io(e))?;
    let mut sighup = signal(SignalKind::hangup())
        .map_err(|e| HavenError::Io(e))?;

    let started = Instant::now();
    let mut last_activity = started;
    let mut heartbeat = tokio::time::interval(heartbeat_period(&options.heartbeat, options.verbose));
    heartbeat.tick().await; // first tick fires immediately; discard it

    let pid = child.id();
    mark_running(store, task_id).await?;

    let exit = loop {
        let wall_deadline = started + options.timeout;
        let deadline = match options.watchdog_timeout {
            Some(w) => wall_deadline.min(last_activity + w),
            None => wall_deadline,
        };

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(HavenError::Io)?;
                #[cfg(unix)]
                let signal_num = {
                    use std::os::unix::process::ExitStatusExt;
                    status.signal()
                };
                #[cfg(not(unix))]
                let signal_num: Option<i32> = None;

                finish_ingest(stdout_task, stderr_task).await;
                let success = status.success();
                mark_exited(store, task_id, status.code(), signal_num, success).await?;
                return Ok(SupervisorResult {
                    exit: SupervisorExit::ChildExited,
                    exit_code: status.code(),
                    exit_signal: signal_num,
                });
            }
            _ = activity_rx.recv() => {
                last_activity = Instant::now();
            }
            _ = heartbeat.tick(), if options.heartbeat.enabled => {
                emit_heartbeat(task_id, started.elapsed(), pid);
            }
            _ = sighup.recv() => {
                emit_heartbeat(task_id, started.elapsed(), pid);
            }
            _ = sigint.recv() => {
                info!(task = task_id, "SIGINT received, detaching supervisor (child keeps running)");
                break SupervisorExit::Detached;
            }
            _ = sigterm.recv() => {
                info!(task = task_id, "SIGTERM received, killing child");
                if let Some(pid) = pid {
                    escalate_kill(pid, &mut child).await;
                }
                break SupervisorExit::Killed;
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(task = task_id, "timeout or watchdog window expired, killing child");
                if let Some(pid) = pid {
                    escalate_kill(pid, &mut child).await;
                }
                break SupervisorExit::TimedOut;
            }
        }
    };

    match exit {
        SupervisorExit::Detached => {
            // Leave the ingest tasks running; dropping their handles here
            // does not abort them. The next `wait` attaches a fresh tailer
            // instead of rejoining these handles.
        }
        _ => finish_ingest(stdout_task, stderr_task).await,
    }

    let (exit_code, exit_signal) = match exit {
        SupervisorExit::Killed | SupervisorExit::TimedOut => {
            mark_exited(store, task_id, None, Some(libc_sigterm()), false).await?;
            (None, Some(libc_sigterm()))
        }
        SupervisorExit::Detached => (None, None),
        SupervisorExit::ChildExited => unreachable!("handled above via early return"),
    };

    Ok(SupervisorResult {
        exit,
        exit_code,
        exit_signal,
    })
}

fn heartbeat_period(cfg: &HeartbeatConfig, verbose: bool) -> Duration {
    let secs = if verbose {
        cfg.verbose_interval_seconds
    } else {
        cfg.quiet_interval_seconds
    };
    Duration::from_secs(secs.max(1))
}

fn emit_heartbeat(task_id: &str, elapsed: Duration, pid: Option<u32>) {
    info!(
        task = task_id,
        pid,
        elapsed_secs = elapsed.as_secs(),
        "heartbeat"
    );
}

async fn mark_running(store: &StateStore, task_id: &str) -> Result<()> {
    let task_id = task_id.to_string();
    store
        .update(move |snapshot| {
            if let Some(record) = snapshot.get_mut(&task_id) {
                record.mark_running();
            }
            Ok(())
        })
}

async fn mark_exited(
    store: &StateStore,
    task_id: &str,
    exit_code: Option<i32>,
    exit_signal: Option<i32>,
    success: bool,
) -> Result<()> {
    let task_id = task_id.to_string();
    store
        .update(move |snapshot| {
            if let Some(record) = snapshot.get_mut(&task_id) {
                record.mark_exited(exit_code, exit_signal, success);
            }
            Ok(())
        })
}

/// SIGTERM, wait up to [`KILL_ESCALATION_GRACE`] for the child to exit,
/// SIGKILL if it hasn't (§4.4).
async fn escalate_kill(pid: u32, child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }

    if tokio::time::timeout(KILL_ESCALATION_GRACE, child.wait())
        .await
        .is_err()
    {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
        let _ = child.wait().await;
    }
}

#[cfg(unix)]
fn libc_sigterm() -> i32 {
    nix::sys::signal::Signal::SIGTERM as i32
}

#[cfg(not(unix))]
fn libc_sigterm() -> i32 {
    15
}

async fn finish_ingest(
    stdout_task: tokio::task::JoinHandle<()>,
    stderr_task: tokio::task::JoinHandle<()>,
) {
    let _ = stdout_task.await;
    let _ = stderr_task.await;
}

/// Read lines from one of the child's stdio streams, append each
/// (redacted, timestamped) line to the text run log, and — for stdout,
/// when structured capture is enabled — append the raw line to the
/// jsonlog too, provided it parses as one structured event. Every line
/// counts as activity regardless of whether it parses.
async fn ingest_stream(
    stream: impl tokio::io::AsyncRead + Unpin,
    log_path: PathBuf,
    jsonlog_path: Option<PathBuf>,
    stream_name: String,
    activity_tx: mpsc::Sender<()>,
) {
    let redactor = SecretRedactor::new();
    let widths = SummaryWidths::default();
    let mut reader = BufReader::new(stream).lines();

    while let Ok(Some(line)) = reader.next_line().await {
        let _ = activity_tx.send(()).await;

        let redacted = redactor.redact_line(&line);
        let entry = format!(
            "{} [{}] {}\n",
            Utc::now().to_rfc3339(),
            stream_name,
            redacted
        );
        if let Err(e) = append_to(&log_path, &entry).await {
            warn!(error = %e, path = %log_path.display(), "failed to append run log");
        }

        if let Some(jsonlog_path) = &jsonlog_path {
            if parse_json_event(&redacted, &widths).is_some() {
                let mut raw_line = redacted.into_owned();
                raw_line.push('\n');
                if let Err(e) = append_to(jsonlog_path, &raw_line).await {
                    warn!(error = %e, path = %jsonlog_path.display(), "failed to append jsonlog");
                }
            }
        }
    }
}

async fn append_to(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(contents.as_bytes()).await
}
