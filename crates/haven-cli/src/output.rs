//! Shared exit-code and JSON-vs-human rendering conventions (§7): every
//! subcommand resolves to success, a structured escalation, or a hard error,
//! and reports each the same way whether or not `--json` was passed.

use haven_core::escalation::{Escalation, Outcome};
use haven_core::HavenError;

pub const EXIT_OK: i32 = 0;
pub const EXIT_ESCALATION: i32 = 1;
pub const EXIT_TIMEOUT: i32 = 2;

/// Map a hard core error onto one of the documented error kinds.
pub fn error_kind(err: &HavenError) -> &'static str {
    match err {
        HavenError::NotFound(_) => "not_found",
        HavenError::Precondition(_) => "precondition",
        HavenError::AlreadyRunning(_) => "already_running",
        HavenError::Timeout(_) => "timeout",
        HavenError::Conflict(_) => "conflict",
        HavenError::GitFailure(_) => "git_failure",
        HavenError::StateCorrupt(_) => "state_corrupt",
        HavenError::TransportUnreachable(_) => "transport_unreachable",
        HavenError::ChildFailed(_) => "child_failed",
        HavenError::Config(_) => "config",
        HavenError::Artifact(_) => "artifact",
        HavenError::Io(_) => "io",
        HavenError::Git(_) => "git_failure",
    }
}

pub fn print_error(err: &HavenError, json: bool) -> i32 {
    if json {
        let body = serde_json::json!({
            "error": { "kind": error_kind(err), "message": err.to_string() }
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap());
    } else {
        eprintln!("error ({}): {err}", error_kind(err));
    }
    EXIT_ESCALATION
}

pub fn print_escalation(escalation: &Escalation, json: bool) -> i32 {
    if json {
        let body = serde_json::json!({
            "escalation": {
                "reason": escalation.reason,
                "next_steps": escalation.next_steps,
            }
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap());
    } else {
        eprintln!("escalation: {}", escalation.reason);
        for step in &escalation.next_steps {
            eprintln!("  - {step}");
        }
    }
    EXIT_ESCALATION
}

/// Render an `OpResult` with a closure producing the success JSON/human
/// output, and return the process exit code that should follow.
pub fn render<T>(
    result: anyhow::Result<Outcome<T>>,
    json: bool,
    on_ok: impl FnOnce(T, bool),
) -> i32 {
    match result {
        Ok(Outcome::Ok(value)) => {
            on_ok(value, json);
            EXIT_OK
        }
        Ok(Outcome::Escalate(escalation)) => print_escalation(&escalation, json),
        Err(err) => match err.downcast::<HavenError>() {
            Ok(haven_err) => print_error(&haven_err, json),
            Err(other) => {
                if json {
                    let body = serde_json::json!({ "error": { "kind": "internal", "message": other.to_string() } });
                    println!("{}", serde_json::to_string_pretty(&body).unwrap());
                } else {
                    eprintln!("error: {other}");
                }
                EXIT_ESCALATION
            }
        },
    }
}
