//! Reject (§6 `reject <T>`): discard a record without merging it, moving the
//! task artefact to an operator-chosen terminal status instead of `Done`.

use crate::collaborators::Artefacts;
use crate::escalation::{Escalation, OpResult, Outcome};
use crate::state::{AgentStatus, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectStatus {
    Blocked,
    NotStarted,
}

impl RejectStatus {
    fn artefact_status(self) -> &'static str {
        match self {
            Self::Blocked => "Blocked",
            Self::NotStarted => "NotStarted",
        }
    }
}

/// Mark `task_id` rejected and transition its artefact to `status`. `reason`
/// is logged for the operator's benefit; the core has nowhere to persist it
/// alongside the record.
pub async fn reject(
    task_id: &str,
    store: &StateStore,
    artefacts: &dyn Artefacts,
    reason: Option<&str>,
    status: RejectStatus,
) -> OpResult<()> {
    let Some(record) = store.load()?.get(task_id).cloned() else {
        return Ok(Outcome::Escalate(Escalation::single_step(
            format!("no agent record for task {task_id}"),
            "nothing to reject",
        )));
    };

    if record.status == AgentStatus::Reaped {
        return Ok(Outcome::Escalate(Escalation::single_step(
            "task is already reaped",
            "rejecting a reaped task has no effect",
        )));
    }

    if let Some(reason) = reason {
        tracing::info!(task = task_id, reason, "rejecting task");
    }

    artefacts.transition_task(task_id, status.artefact_status()).await?;

    let task_id_owned = task_id.to_string();
    store.update(move |snapshot| {
        if let Some(r) = snapshot.get_mut(&task_id_owned) {
            r.mark_rejected();
        }
        Ok(())
    })?;

    Ok(Outcome::Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::FileArtefacts;
    use crate::state::AgentRecord;

    async fn write_task(repo: &std::path::Path, id: &str) {
        let dir = repo.join(".haven").join("tasks");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let body = serde_json::json!({ "status": "InProgress", "prd_id": "PRD-1", "epic_id": null });
        tokio::fs::write(dir.join(format!("{id}.json")), body.to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_record_escalates() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        let artefacts = FileArtefacts::new(tmp.path());

        let result = reject("ghost", &store, &artefacts, None, RejectStatus::Blocked)
            .await
            .unwrap();
        match result {
            Outcome::Escalate(e) => assert!(e.reason.contains("no agent record")),
            Outcome::Ok(_) => panic!("expected escalation"),
        }
    }

    #[tokio::test]
    async fn rejects_and_transitions_artefact() {
        let tmp = tempfile::tempdir().unwrap();
        write_task(tmp.path(), "T001").await;
        let store = StateStore::new(tmp.path().join(".haven").join("state.json"));
        store
            .update(|s| {
                s.insert("T001".into(), AgentRecord::new(AgentStatus::Error));
                Ok(())
            })
            .unwrap();
        let artefacts = FileArtefacts::new(tmp.path());

        let result = reject(
            "T001",
            &store,
            &artefacts,
            Some("gave up mid-edit"),
            RejectStatus::Blocked,
        )
        .await
        .unwrap();
        assert!(matches!(result, Outcome::Ok(())));

        let snapshot = store.load().unwrap();
        assert_eq!(snapshot["T001"].status, AgentStatus::Rejected);

        let handle = artefacts.get_task("T001").await.unwrap();
        let raw = tokio::fs::read_to_string(&handle.file).await.unwrap();
        assert!(raw.contains("\"Blocked\""));
    }

    #[tokio::test]
    async fn already_reaped_escalates() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        let artefacts = FileArtefacts::new(tmp.path());
        store
            .update(|s| {
                let mut record = AgentRecord::new(AgentStatus::Completed);
                record.mark_reaped(crate::state::ResultStatus::Completed);
                s.insert("T001".into(), record);
                Ok(())
            })
            .unwrap();

        let result = reject("T001", &store, &artefacts, None, RejectStatus::Blocked)
            .await
            .unwrap();
        match result {
            Outcome::Escalate(e) => assert!(e.reason.contains("already reaped")),
            Outcome::Ok(_) => panic!("expected escalation"),
        }
    }
}
