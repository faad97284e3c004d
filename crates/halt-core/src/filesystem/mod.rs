//! Filesystem teardown for container root directories.
//!
//! Removal unmounts anything still mounted below the target and retries,
//! so a leaked mount does not leave the container half-removed.

pub mod mount;
pub mod remove;

pub use remove::ensure_remove_all;
