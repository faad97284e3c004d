//! `haltctl stop` — Gracefully stop containers.

use std::sync::Arc;

use clap::Args;
use halt_runtime::engine::Engine;
use halt_runtime::stop::StopOptions;
use tokio_util::sync::CancellationToken;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container IDs or names to stop.
    #[arg(required = true)]
    pub containers: Vec<String>,

    /// Signal to send instead of the container's stop signal.
    #[arg(short, long)]
    pub signal: Option<String>,

    /// Seconds to wait before killing; negative waits until interrupted.
    #[arg(short, long, allow_hyphen_values = true)]
    pub timeout: Option<i64>,
}

/// Executes the `stop` command.
///
/// Ctrl+C ends an unbounded wait without killing the container.
///
/// # Errors
///
/// Returns an error if any container fails to stop.
pub async fn execute(engine: &Arc<Engine>, args: StopArgs) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, abandoning unbounded stop");
                cancel.cancel();
            }
        })
    };

    let result = super::for_each(&args.containers, |name| {
        let opts = StopOptions {
            signal: args.signal.clone(),
            timeout: args.timeout,
            cancel: Some(cancel.clone()),
        };
        let engine = Arc::clone(engine);
        async move { engine.container_stop(&name, opts).await }
    })
    .await;
    interrupt.abort();
    result
}
