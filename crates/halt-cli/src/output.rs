//! Formatted output helpers for CLI commands.
//!
//! Results go to stdout, failures to stderr, so scripted callers can
//! collect the names that succeeded.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use chrono::{DateTime, Utc};
use halt_common::types::ContainerState;
use halt_runtime::state::StateSnapshot;

/// One line of `ps` output.
#[derive(Debug, Clone)]
pub struct Row {
    /// Short container id.
    pub id: String,
    /// Container name.
    pub name: String,
    /// Human-readable status.
    pub status: String,
    /// Process id, `0` when not running.
    pub pid: u32,
    /// Error left behind by a failed removal.
    pub removal_error: Option<String>,
}

/// Prints `line` to stdout.
pub fn print_line(line: &str) {
    println!("{line}");
}

/// Prints `message` to stderr.
pub fn print_error(message: &str) {
    eprintln!("Error: {message}");
}

/// Prints `rows` as an aligned table.
pub fn print_table(rows: &[Row]) {
    println!("{:<14} {:<20} {:<28} {:<8}", "CONTAINER ID", "NAME", "STATUS", "PID");
    for row in rows {
        let pid = if row.pid == 0 {
            "-".to_owned()
        } else {
            row.pid.to_string()
        };
        println!("{:<14} {:<20} {:<28} {:<8}", row.id, row.name, row.status, pid);
        if let Some(err) = &row.removal_error {
            println!("  removal failed: {err}");
        }
    }
}

/// Describes a container's state the way `ps` shows it, e.g.
/// `Exited (137) 5 minutes ago`.
#[must_use]
pub fn format_status(
    state: &StateSnapshot,
    finished_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> String {
    match state.status {
        ContainerState::Created => "Created".to_owned(),
        ContainerState::Running => "Up".to_owned(),
        ContainerState::Paused => "Up (Paused)".to_owned(),
        ContainerState::Restarting => "Restarting".to_owned(),
        ContainerState::Dead => "Dead".to_owned(),
        ContainerState::Removed => "Removal complete".to_owned(),
        ContainerState::Exited => {
            let code = state
                .exit_code
                .map_or_else(|| "?".to_owned(), |c| c.to_string());
            match finished_at {
                Some(at) => format!("Exited ({code}) {} ago", format_age(now - at)),
                None => format!("Exited ({code})"),
            }
        }
    }
}

fn format_age(age: chrono::TimeDelta) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        0..=1 => "1 second".to_owned(),
        2..=59 => format!("{secs} seconds"),
        60..=119 => "1 minute".to_owned(),
        120..=3599 => format!("{} minutes", secs / 60),
        3600..=7199 => "1 hour".to_owned(),
        7200..=86_399 => format!("{} hours", secs / 3600),
        _ => format!("{} days", secs / 86_400),
    }
}
