//! # halt-core
//!
//! Low-level OS primitives for the halt termination subsystem.
//!
//! This crate provides safe abstractions over:
//! - **Liveness**: answering "is this pid alive" through null-signal
//!   delivery or the `/proc` process table, plus zombie detection.
//! - **Signals**: parsing user-supplied signal names and delivering them
//!   directly to a pid.
//! - **Filesystem**: recursive removal that unmounts busy mount points
//!   and retries.
//! - **Labels**: the registry of reserved MAC process labels.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod filesystem;
pub mod label;
pub mod probe;
pub mod signal;
