//! Recursive removal that survives busy mount points.

use std::path::Path;
use std::time::Duration;

use halt_common::error::{HaltError, Result};

use super::mount;

/// Attempts made against a path that keeps reporting `EBUSY`.
const MAX_BUSY_RETRIES: u32 = 50;

const BUSY_BACKOFF: Duration = Duration::from_millis(100);

/// Removes `path` and everything below it.
///
/// An absent path is success. When removal fails with `EBUSY`, every mount
/// point at or below `path` is lazily detached and removal is retried.
///
/// # Errors
///
/// Returns an error for any failure other than absence, or when the path
/// is still busy after repeated unmount attempts.
pub fn ensure_remove_all(path: &Path) -> Result<()> {
    let mut busy_attempts = 0;
    loop {
        let err = match remove_once(path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => e,
        };

        if err.raw_os_error() != Some(nix::errno::Errno::EBUSY as i32) {
            return Err(HaltError::Io {
                path: path.to_path_buf(),
                source: err,
            });
        }
        if busy_attempts == MAX_BUSY_RETRIES {
            return Err(HaltError::Io {
                path: path.to_path_buf(),
                source: err,
            });
        }
        busy_attempts += 1;

        for mount_point in mount::mounts_under(path)? {
            mount::unmount(&mount_point).map_err(|e| {
                HaltError::system(format_args!("error while removing {}", path.display()), e)
            })?;
        }
        tracing::debug!(
            path = %path.display(),
            attempt = busy_attempts,
            "path busy, retrying removal"
        );
        std::thread::sleep(BUSY_BACKOFF);
    }
}

fn remove_once(path: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
