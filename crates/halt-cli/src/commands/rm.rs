//! `haltctl rm` — Remove containers.

use std::sync::Arc;

use clap::Args;
use halt_runtime::engine::Engine;
use halt_runtime::remove::RemoveOptions;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container IDs, names or link names to remove.
    #[arg(required = true)]
    pub containers: Vec<String>,

    /// Kill running containers instead of refusing.
    #[arg(short, long)]
    pub force: bool,

    /// Also remove anonymous volumes.
    #[arg(short, long)]
    pub volumes: bool,

    /// Remove the named link only.
    #[arg(short, long)]
    pub link: bool,
}

impl RmArgs {
    const fn options(&self) -> RemoveOptions {
        RemoveOptions {
            force: self.force,
            remove_volumes: self.volumes,
            remove_link: self.link,
        }
    }
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if any container cannot be removed.
pub async fn execute(engine: &Arc<Engine>, args: RmArgs) -> anyhow::Result<()> {
    let opts = args.options();
    super::for_each(&args.containers, |name| {
        let engine = Arc::clone(engine);
        async move { engine.container_rm(&name, opts).await }
    })
    .await
}
