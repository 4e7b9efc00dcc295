//! Platform-aware process termination, shared by the kill escalation paths
//! that don't go through [`crate::supervisor`]'s own signal handling.

use std::time::Duration;

use tracing::debug;

use crate::Result;

/// Grace period after initial termination signal before force-killing.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Send a termination signal to a process by PID.
///
/// On Unix: sends SIGTERM, waits [`TERMINATE_GRACE`], then SIGKILL.
/// On Windows: uses `taskkill /PID <pid> /F`.
pub async fn terminate_process(pid: u32) -> Result<()> {
    debug!(pid, "terminating process");

    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let nix_pid = Pid::from_raw(pid as i32);

        // SIGTERM for graceful shutdown.
        if let Err(e) = signal::kill(nix_pid, Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM failed (process may have already exited)");
            return Ok(());
        }

        tokio::time::sleep(TERMINATE_GRACE).await;

        // SIGKILL as fallback.
        if let Err(e) = signal::kill(nix_pid, Signal::SIGKILL) {
            debug!(pid, error = %e, "SIGKILL failed (process may have already exited)");
        }
    }

    #[cfg(windows)]
    {
        let output = tokio::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .output()
            .await;

        match output {
            Ok(o) if !o.status.success() => {
                let stderr = String::from_utf8_lossy(&o.stderr);
                debug!(pid, %stderr, "taskkill failed (process may have already exited)");
            }
            Err(e) => {
                debug!(pid, error = %e, "failed to execute taskkill");
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminate_nonexistent_process_is_ok() {
        // PID 999999999 almost certainly does not exist.
        let result = terminate_process(999_999_999).await;
        assert!(result.is_ok());
    }
}
