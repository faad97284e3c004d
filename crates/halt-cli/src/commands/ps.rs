//! `haltctl ps` — List containers.

use std::sync::Arc;

use chrono::Utc;
use clap::Args;
use halt_runtime::engine::Engine;

use crate::output::{self, Row};

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers (including stopped).
    #[arg(short, long)]
    pub all: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Never fails once the engine is open.
pub async fn execute(engine: &Arc<Engine>, args: &PsArgs) -> anyhow::Result<()> {
    let now = Utc::now();
    let mut rows = Vec::new();
    for container in engine.list() {
        let state = container.state();
        if !args.all && !state.is_running() {
            continue;
        }
        let inner = container.lock().await;
        rows.push(Row {
            id: container.id().short().to_owned(),
            name: container.name().to_owned(),
            status: output::format_status(&state, inner.finished_at, now),
            pid: state.pid,
            removal_error: inner.removal_error.clone(),
        });
    }

    if rows.is_empty() {
        output::print_line("No containers found.");
        return Ok(());
    }
    output::print_table(&rows);
    Ok(())
}
