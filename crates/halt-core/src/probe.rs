//! Process liveness probes.
//!
//! A [`LivenessProbe`] answers one question: is the OS process with a given
//! pid still alive. The termination paths use it to short-circuit work on
//! containers whose process is already gone.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use halt_common::config::ProbeKind;
use halt_common::error::{HaltError, Result};

/// Reports whether an OS process is alive.
pub trait LivenessProbe: Send + Sync + fmt::Debug {
    /// Returns `true` while `pid` refers to a live process.
    ///
    /// Pid `0` is never alive.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probes liveness by sending the null signal (`kill(pid, 0)`).
///
/// A process owned by another user (`EPERM`) counts as alive.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalProbe;

impl LivenessProbe for SignalProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let Some(raw) = to_raw_pid(pid) else {
            return false;
        };
        match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None) {
            Ok(()) | Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

/// Probes liveness by enumerating the `/proc` process table.
///
/// Zombies have exited already and are reported as dead. Hosts without a
/// readable `/proc` fall back to [`SignalProbe`].
#[derive(Debug, Clone)]
pub struct ProcfsProbe {
    root: std::path::PathBuf,
}

impl Default for ProcfsProbe {
    fn default() -> Self {
        Self {
            root: std::path::PathBuf::from("/proc"),
        }
    }
}

impl ProcfsProbe {
    /// Creates a probe that reads the process table below `root`.
    #[must_use]
    pub fn with_root(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn listed(&self, pid: u32) -> Option<bool> {
        let entries = std::fs::read_dir(&self.root).ok()?;
        let wanted = pid.to_string();
        let found = entries
            .filter_map(std::result::Result::ok)
            .any(|entry| entry.file_name().to_str() == Some(wanted.as_str()));
        Some(found)
    }
}

impl LivenessProbe for ProcfsProbe {
    fn is_alive(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        match self.listed(pid) {
            Some(true) => {
                !stat_is_zombie(&self.root.join(pid.to_string()).join("stat")).unwrap_or(false)
            }
            Some(false) => false,
            None => SignalProbe.is_alive(pid),
        }
    }
}

/// Returns the probe selected by configuration.
#[must_use]
pub fn probe_for(kind: ProbeKind) -> Arc<dyn LivenessProbe> {
    match kind {
        ProbeKind::Signal => Arc::new(SignalProbe),
        ProbeKind::Procfs => Arc::new(ProcfsProbe::default()),
    }
}

/// Returns `true` when `pid` is a zombie awaiting its parent's reap.
///
/// A pid without a `/proc` entry is not a zombie.
///
/// # Errors
///
/// Returns an error if the stat file exists but cannot be read or parsed.
pub fn is_zombie(pid: u32) -> Result<bool> {
    if cfg!(target_os = "linux") {
        stat_is_zombie(&Path::new("/proc").join(pid.to_string()).join("stat"))
    } else {
        Ok(false)
    }
}

fn stat_is_zombie(stat: &Path) -> Result<bool> {
    let raw = match std::fs::read_to_string(stat) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(HaltError::Io {
                path: stat.to_path_buf(),
                source: e,
            });
        }
    };
    // The command name may itself contain parentheses; the state field
    // follows the last closing one.
    let state = raw
        .rfind(')')
        .and_then(|idx| raw.get(idx + 1..))
        .and_then(|rest| rest.split_whitespace().next())
        .ok_or_else(|| HaltError::system_msg(format!("malformed {}", stat.display())))?;
    Ok(state == "Z")
}

/// Converts a pid to the signed form the kernel expects, rejecting `0`
/// and values that would address a process group.
pub(crate) fn to_raw_pid(pid: u32) -> Option<i32> {
    i32::try_from(pid).ok().filter(|raw| *raw > 0)
}
