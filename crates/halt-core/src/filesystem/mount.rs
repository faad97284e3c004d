//! Mount table inspection and lazy unmounting.

use std::path::{Path, PathBuf};

use halt_common::error::{HaltError, Result};

/// Lazily detaches the filesystem mounted at `target`.
///
/// A path that is not a mount point, or no longer exists, is already
/// unmounted and succeeds.
///
/// # Errors
///
/// Returns an error if the `umount2(2)` syscall fails for any other reason.
#[cfg(target_os = "linux")]
pub fn unmount(target: &Path) -> Result<()> {
    use nix::errno::Errno;
    use nix::mount::{MntFlags, umount2};

    match umount2(target, MntFlags::MNT_DETACH) {
        Ok(()) => {
            tracing::info!(path = %target.display(), "mount detached");
            Ok(())
        }
        Err(Errno::EINVAL | Errno::ENOENT) => Ok(()),
        Err(e) => Err(HaltError::system_msg(format!(
            "unmount {} failed: {e}",
            target.display()
        ))),
    }
}

/// Stub for non-Linux platforms; nothing is ever mounted by halt there.
///
/// # Errors
///
/// Never fails.
#[cfg(not(target_os = "linux"))]
pub fn unmount(_target: &Path) -> Result<()> {
    Ok(())
}

/// Lists the mount points at or below `dir`, deepest first.
///
/// # Errors
///
/// Returns an error if the mount table exists but cannot be read.
pub fn mounts_under(dir: &Path) -> Result<Vec<PathBuf>> {
    let table = Path::new("/proc/self/mountinfo");
    let raw = match std::fs::read_to_string(table) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(HaltError::Io {
                path: table.to_path_buf(),
                source: e,
            });
        }
    };
    Ok(parse_mounts_under(&raw, dir))
}

fn parse_mounts_under(mountinfo: &str, dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = mountinfo
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(|field| PathBuf::from(unescape(field)))
        .filter(|mount_point| mount_point.starts_with(dir))
        .collect();
    found.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    found.dedup();
    found
}

/// Decodes the octal escapes (`\040` for space) used in mountinfo fields.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(value) = field
                .get(i + 1..i + 4)
                .and_then(|digits| u8::from_str_radix(digits, 8).ok())
            {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
