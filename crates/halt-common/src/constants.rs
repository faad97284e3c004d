//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for halt data on Linux with root access.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/halt";

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "HALT_HOME";

/// Returns the data directory, preferring `$HALT_HOME`, then
/// `$HOME/.halt`, falling back to `/var/lib/halt`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(HOME_ENV) {
        return PathBuf::from(dir);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".halt");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Subdirectory holding one metadata record per container.
pub const CONTAINERS_DIR: &str = "containers";

/// Subdirectory holding writable layers.
pub const LAYERS_DIR: &str = "layers";

/// Subdirectory holding snapshot leases.
pub const LEASES_DIR: &str = "leases";

/// Subdirectory holding named and anonymous volumes.
pub const VOLUMES_DIR: &str = "volumes";

/// Name of the optional configuration file inside the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// Signal sent by a graceful stop when the container configures none.
pub const DEFAULT_STOP_SIGNAL: &str = "SIGTERM";

/// Seconds a graceful stop waits when neither request nor container say otherwise.
pub const DEFAULT_STOP_TIMEOUT_SECS: i64 = 10;

/// Seconds of graceful stop granted inside a removal, forced or not.
pub const REMOVE_STOP_TIMEOUT_SECS: i64 = 3;

/// Milliseconds `kill` waits for an exit event after SIGKILL.
#[cfg(not(windows))]
pub const KILL_WAIT_MS: u64 = 10_000;

/// Milliseconds `kill` waits for an exit event after SIGKILL.
///
/// Task shutdown on Windows hosts is considerably slower.
#[cfg(windows)]
pub const KILL_WAIT_MS: u64 = 75_000;

/// Milliseconds `kill` waits after the direct last-resort signal.
pub const DIRECT_KILL_WAIT_MS: u64 = 2_000;

/// Milliseconds of extra grace after a failed kill inside a stop.
pub const STOP_KILL_GRACE_MS: u64 = 2_000;

/// Milliseconds between liveness polls of the exit monitor.
pub const MONITOR_INTERVAL_MS: u64 = 250;

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "halt";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "haltctl";
