//! Container termination subsystem for the halt runtime.
//!
//! The [`engine::Engine`] owns every registered container and exposes the
//! three termination entry points: graceful stop, forced kill, and
//! removal. Each runs under the per-container lock discipline described
//! on [`container::Container`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cleanup;
pub mod container;
pub mod engine;
pub mod events;
pub mod exit;
pub mod kill;
pub mod links;
pub mod metrics;
pub mod monitor;
pub mod names;
pub mod registry;
pub mod remove;
pub mod services;
pub mod state;
pub mod stop;
pub mod storage;
pub mod store;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;
