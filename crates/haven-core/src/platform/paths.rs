//! Platform-aware path normalisation and validation.
//!
//! Handles Windows long-path prefixes, invalid characters, file locking,
//! and Unicode safety checks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::{HavenError, Result};

/// Maximum retries for [`safe_write`] when a file is locked.
const WRITE_MAX_RETRIES: u32 = 5;

/// Base delay between retries (doubles each attempt).
const WRITE_RETRY_BASE: Duration = Duration::from_millis(100);

/// Normalise a path for the current OS.
///
/// On Windows, prepends the `\\?\` long-path prefix for paths exceeding
/// 260 characters. On other platforms this is a no-op.
pub fn normalize_path(path: &Path) -> PathBuf {
    #[cfg(windows)]
    {
        let path_str = path.to_string_lossy();
        if path_str.len() > 260 && !path_str.starts_with("\\\\?\\") {
            PathBuf::from(format!("\\\\?\\{}", path_str))
        } else {
            path.to_path_buf()
        }
    }
    #[cfg(not(windows))]
    {
        path.to_path_buf()
    }
}

/// Validate that a path is safe for artifact writes.
///
/// Checks for platform-specific invalid characters and excessively long
/// path components.
pub fn validate_artifact_path(path: &Path) -> Result<()> {
    let path_str = path.to_string_lossy();

    // Reject empty paths.
    if path_str.is_empty() {
        return Err(HavenError::Artifact("path is empty".into()));
    }

    // Check for null bytes (invalid on all platforms).
    if path_str.contains('\0') {
        return Err(HavenError::Artifact("path contains null byte".into()));
    }

    #[cfg(windows)]
    {
        let invalid_chars = ['<', '>', ':', '"', '|', '?', '*'];
        for c in invalid_chars {
            // Skip the drive letter colon (e.g. "C:\...").
            if c == ':' && path_str.len() >= 2 {
                let rest = &path_str[2..];
                if rest.contains(c) {
                    return Err(HavenError::Artifact(format!(
                        "path contains invalid Windows character '{c}'"
                    )));
                }
                continue;
            }
            if path_str.contains(c) {
                return Err(HavenError::Artifact(format!(
                    "path contains invalid Windows character '{c}'"
                )));
            }
        }
    }

    // Check individual component lengths (255 byte limit on most filesystems).
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > 255 {
            return Err(HavenError::Artifact(format!(
                "path component '{}...' exceeds 255 byte limit",
                &name[..40]
            )));
        }
    }

    Ok(())
}

/// Write `contents` to `path` with retry-on-lock.
///
/// If the write fails due to a permission or lock error, retries up to
/// [`WRITE_MAX_RETRIES`] times with exponential backoff.
pub async fn safe_write(path: &Path, contents: &[u8]) -> Result<()> {
    let normalized = normalize_path(path);
    validate_artifact_path(&normalized)?;

    // Ensure parent directory exists.
    if let Some(parent) = normalized.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            HavenError::Artifact(format!(
                "failed to create parent directories for {}: {e}",
                normalized.display()
            ))
        })?;
    }

    let mut delay = WRITE_RETRY_BASE;
    for attempt in 0..=WRITE_MAX_RETRIES {
        match tokio::fs::write(&normalized, contents).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                let retryable = matches!(
                    e.kind(),
                    std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::WouldBlock
                );
                if retryable && attempt < WRITE_MAX_RETRIES {
                    debug!(
                        path = %normalized.display(),
                        attempt,
                        error = %e,
                        "write failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                } else {
                    return Err(HavenError::Artifact(format!(
                        "failed to write {}: {e}",
                        normalized.display()
                    )));
                }
            }
        }
    }

    unreachable!()
}

/// Check whether a path contains characters outside the ASCII printable range
/// that may cause portability issues across platforms.
///
/// Returns `true` if the path is safe (ASCII-only or well-formed Unicode),
/// `false` if it contains replacement characters or other indicators of
/// encoding problems.
pub fn check_unicode_safety(path: &Path) -> bool {
    let s = path.to_string_lossy();

    // Replacement character indicates lossy conversion.
    if s.contains('\u{FFFD}') {
        warn!(path = %s, "path contains Unicode replacement characters");
        return false;
    }

    // Check for control characters (except path separators).
    for ch in s.chars() {
        if ch.is_control() && ch != '/' && ch != '\\' {
            warn!(path = %s, char = ?ch, "path contains control character");
            return false;
        }
    }

    true
}
