use serde::{Deserialize, Serialize};

/// A structured, expected non-success outcome.
///
/// Escalations are not bugs: a dirty worktree blocking a spawn, or a merge
/// conflict blocking a reap, are routine operator-facing situations. They
/// carry enough information for a human (or a JSON consumer) to decide what
/// to do next without the core guessing on their behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub reason: String,
    pub next_steps: Vec<String>,
}

impl Escalation {
    pub fn new(reason: impl Into<String>, next_steps: Vec<String>) -> Self {
        Self {
            reason: reason.into(),
            next_steps,
        }
    }

    pub fn single_step(reason: impl Into<String>, step: impl Into<String>) -> Self {
        Self::new(reason, vec![step.into()])
    }
}

/// The result of an operation that can succeed outright or stop short with
/// an escalation, without that being a [`crate::error::HavenError`].
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Ok(T),
    Escalate(Escalation),
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn escalation(&self) -> Option<&Escalation> {
        match self {
            Outcome::Escalate(e) => Some(e),
            Outcome::Ok(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(v) => Outcome::Ok(f(v)),
            Outcome::Escalate(e) => Outcome::Escalate(e),
        }
    }
}

/// Every public operation in this crate returns `OpResult<T>`: a hard error
/// (`Err`) for anything unexpected, or `Ok(Outcome<T>)` distinguishing a
/// clean success from an expected escalation. Nothing is retried implicitly.
pub type OpResult<T> = crate::error::Result<Outcome<T>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_single_step_wraps_one_item() {
        let e = Escalation::single_step("dirty trunk", "commit or stash changes");
        assert_eq!(e.next_steps.len(), 1);
    }

    #[test]
    fn outcome_map_preserves_escalation() {
        let out: Outcome<i32> = Outcome::Escalate(Escalation::single_step("x", "y"));
        let mapped = out.map(|v| v + 1);
        assert!(!mapped.is_ok());
    }

    #[test]
    fn outcome_map_transforms_ok_value() {
        let out: Outcome<i32> = Outcome::Ok(41);
        let mapped = out.map(|v| v + 1);
        match mapped {
            Outcome::Ok(v) => assert_eq!(v, 42),
            Outcome::Escalate(_) => panic!("expected Ok"),
        }
    }
}
