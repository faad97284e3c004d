//! Signal parsing and direct delivery.

use std::str::FromStr;

use halt_common::error::{HaltError, Result};

pub use nix::sys::signal::Signal;

use crate::probe::to_raw_pid;

/// Parses a user-supplied signal.
///
/// Accepts the full name (`SIGTERM`), the short name (`TERM`), either in
/// any case, or the decimal number (`15`).
///
/// # Errors
///
/// Returns [`HaltError::InvalidParameter`] when the value names no signal
/// this platform supports.
pub fn parse_signal(raw: &str) -> Result<Signal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(HaltError::invalid_parameter("empty signal"));
    }
    if let Ok(number) = trimmed.parse::<i32>() {
        return Signal::try_from(number)
            .map_err(|_| HaltError::invalid_parameter(format!("invalid signal: {trimmed}")));
    }
    let upper = trimmed.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name)
        .map_err(|_| HaltError::invalid_parameter(format!("invalid signal: {trimmed}")))
}

/// Sends `signal` straight to `pid`, bypassing any runtime task.
///
/// # Errors
///
/// Returns [`HaltError::NoSuchProcess`] when the process is gone,
/// [`HaltError::InvalidParameter`] for pid `0`, and a system error for any
/// other delivery failure.
pub fn send(pid: u32, signal: Signal) -> Result<()> {
    let raw = to_raw_pid(pid)
        .ok_or_else(|| HaltError::invalid_parameter(format!("refusing to signal pid {pid}")))?;
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), signal) {
        Ok(()) => {
            tracing::debug!(pid, signal = signal.as_str(), "signal delivered");
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) => Err(HaltError::NoSuchProcess {
            pid,
            signal: signal as i32,
        }),
        Err(e) => Err(HaltError::system_msg(format!(
            "cannot kill process (pid={pid}) with signal {}: {e}",
            signal as i32
        ))),
    }
}
