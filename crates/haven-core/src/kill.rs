//! Standalone kill (§6 `kill <T>`): SIGTERM then SIGKILL after a grace
//! period, targeting the pid recorded in C1 directly. Distinct from
//! [`crate::supervisor::supervise`]'s own kill escalation, which only runs
//! inside the process that owns the child's `Child` handle — a separate
//! `kill` invocation has no such handle and acts on the pid alone.

use std::time::Duration;

use crate::error::Result;
use crate::escalation::{Escalation, OpResult, Outcome};
use crate::state::StateStore;

const KILL_GRACE: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct KillOutput {
    pub task_id: String,
    pub pid: u32,
    pub forced: bool,
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

#[cfg(unix)]
fn send(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), signal);
}

/// SIGTERM the pid recorded for `task_id`, escalating to SIGKILL after
/// [`KILL_GRACE`], and mark the record `killed` (§4.4).
pub async fn kill(task_id: &str, store: &StateStore) -> OpResult<KillOutput> {
    let Some(record) = store.load()?.get(task_id).cloned() else {
        return Ok(Outcome::Escalate(Escalation::single_step(
            format!("no agent record for task {task_id}"),
            "spawn the task before killing it",
        )));
    };

    let Some(pid) = record.pid.filter(|&p| pid_alive(p)) else {
        return Ok(Outcome::Escalate(Escalation::single_step(
            "task has no live process to kill",
            "nothing to do",
        )));
    };

    #[cfg(unix)]
    send(pid, nix::sys::signal::Signal::SIGTERM);

    let deadline = tokio::time::Instant::now() + KILL_GRACE;
    let mut forced = false;
    while pid_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            #[cfg(unix)]
            send(pid, nix::sys::signal::Signal::SIGKILL);
            forced = true;
            tokio::time::sleep(POLL_INTERVAL).await;
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let task_id_owned = task_id.to_string();
    store.update(move |snapshot| {
        if let Some(r) = snapshot.get_mut(&task_id_owned) {
            r.mark_killed();
        }
        Ok(())
    })?;

    Ok(Outcome::Ok(KillOutput {
        task_id: task_id.to_string(),
        pid,
        forced,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AgentRecord, AgentStatus};

    #[tokio::test]
    async fn missing_record_escalates() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        let result = kill("ghost", &store).await.unwrap();
        match result {
            Outcome::Escalate(e) => assert!(e.reason.contains("no agent record")),
            Outcome::Ok(_) => panic!("expected escalation"),
        }
    }

    #[tokio::test]
    async fn record_without_live_pid_escalates() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        store
            .update(|s| {
                s.insert("T001".into(), AgentRecord::new(AgentStatus::Spawned));
                Ok(())
            })
            .unwrap();

        let result = kill("T001", &store).await.unwrap();
        match result {
            Outcome::Escalate(e) => assert!(e.reason.contains("no live process")),
            Outcome::Ok(_) => panic!("expected escalation"),
        }
    }

    #[tokio::test]
    async fn kills_live_child_and_marks_killed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));

        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        store
            .update(|s| {
                let mut record = AgentRecord::new(AgentStatus::Running);
                record.pid = Some(pid);
                s.insert("T002".into(), record);
                Ok(())
            })
            .unwrap();

        let result = kill("T002", &store).await.unwrap();
        let output = match result {
            Outcome::Ok(output) => output,
            Outcome::Escalate(e) => panic!("unexpected escalation: {}", e.reason),
        };
        assert_eq!(output.pid, pid);

        let snapshot = store.load().unwrap();
        assert_eq!(snapshot["T002"].status, AgentStatus::Killed);
        assert!(snapshot["T002"].pid.is_none());

        let _ = child.wait().await;
    }
}
