//! `haltctl kill` — Kill containers or send them a signal.

use std::sync::Arc;

use clap::Args;
use halt_runtime::engine::Engine;

/// Arguments for the `kill` command.
#[derive(Args, Debug)]
pub struct KillArgs {
    /// Container IDs or names to signal.
    #[arg(required = true)]
    pub containers: Vec<String>,

    /// Signal to send; SIGKILL waits for the container to exit.
    #[arg(short, long)]
    pub signal: Option<String>,
}

/// Executes the `kill` command.
///
/// # Errors
///
/// Returns an error if the signal is invalid or any container fails.
pub async fn execute(engine: &Arc<Engine>, args: KillArgs) -> anyhow::Result<()> {
    super::for_each(&args.containers, |name| {
        let engine = Arc::clone(engine);
        let signal = args.signal.clone();
        async move { engine.container_kill(&name, signal.as_deref()).await }
    })
    .await
}
