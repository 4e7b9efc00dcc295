//! Wait (§6 `wait`/`wait-all`): reattach to an already-spawned task by
//! polling the state store and the recorded pid until the record leaves its
//! live states, rather than holding a handle to the child process — that
//! handle belongs to whichever process ran [`crate::supervisor::supervise`];
//! a separate `wait` invocation has none.

use std::time::Duration;

use crate::error::Result;
use crate::state::{AgentRecord, StateStore};

/// Poll period honouring P6 (any wait returns within `timeout + δ`, δ ≤ 5s).
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub enum WaitOutcome {
    Settled(AgentRecord),
    TimedOut,
    Unknown,
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

fn settled(record: &AgentRecord) -> bool {
    !record.is_alive_status() || record.pid.map(|p| !pid_alive(p)).unwrap_or(false)
}

/// Wait for a single task's record to settle, or until `timeout` elapses.
pub async fn wait_for_task(store: &StateStore, task_id: &str, timeout: Duration) -> Result<WaitOutcome> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = store.load()?;
        match snapshot.get(task_id) {
            None => return Ok(WaitOutcome::Unknown),
            Some(record) if settled(record) => return Ok(WaitOutcome::Settled(record.clone())),
            Some(_) => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(WaitOutcome::TimedOut);
        }
        tokio::time::sleep(POLL_INTERVAL.min(timeout)).await;
    }
}

/// Wait for multiple tasks. With `any = true`, returns as soon as one
/// settles, reporting the rest as `TimedOut`. Otherwise waits for all of
/// them, or until `timeout` elapses.
pub async fn wait_for_many(
    store: &StateStore,
    task_ids: &[String],
    timeout: Duration,
    any: bool,
) -> Result<Vec<(String, WaitOutcome)>> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut remaining: Vec<String> = task_ids.to_vec();
    let mut results = Vec::new();

    loop {
        let snapshot = store.load()?;
        let mut still_remaining = Vec::new();
        for id in remaining {
            match snapshot.get(&id) {
                None => results.push((id, WaitOutcome::Unknown)),
                Some(record) if settled(record) => {
                    results.push((id, WaitOutcome::Settled(record.clone())));
                }
                Some(_) => still_remaining.push(id),
            }
        }
        remaining = still_remaining;

        if remaining.is_empty() {
            return Ok(results);
        }
        if any && !results.is_empty() {
            results.extend(remaining.into_iter().map(|id| (id, WaitOutcome::TimedOut)));
            return Ok(results);
        }
        if tokio::time::Instant::now() >= deadline {
            results.extend(remaining.into_iter().map(|id| (id, WaitOutcome::TimedOut)));
            return Ok(results);
        }
        tokio::time::sleep(POLL_INTERVAL.min(timeout)).await;
    }
}
