use thiserror::Error;

/// Top-level error type for the haven-core library.
///
/// These variants are the error kinds every public operation can surface.
/// They are distinct from [`crate::escalation::Escalation`]: an `Escalation`
/// is an expected, structured outcome (a dirty worktree, a merge conflict);
/// a `HavenError` is everything else — a bug, a corrupt file, an I/O fault.
#[derive(Debug, Error)]
pub enum HavenError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("already running: {0}")]
    AlreadyRunning(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("git failure: {0}")]
    GitFailure(String),

    #[error("state corrupt: {0}")]
    StateCorrupt(String),

    #[error("transport unreachable: {0}")]
    TransportUnreachable(String),

    #[error("child failed: {0}")]
    ChildFailed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git error: {0}")]
    Git(String),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, HavenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = HavenError::Config("missing field".into());
        assert_eq!(err.to_string(), "config error: missing field");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let haven_err: HavenError = io_err.into();
        assert!(matches!(haven_err, HavenError::Io(_)));
    }
}
