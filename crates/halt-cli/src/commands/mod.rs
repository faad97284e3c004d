//! CLI command definitions and dispatch.

pub mod kill;
pub mod ps;
pub mod rm;
pub mod stop;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use halt_common::config::HaltConfig;
use halt_common::constants;
use halt_runtime::engine::Engine;

/// haltctl — stop, kill and remove halt containers.
#[derive(Parser, Debug)]
#[command(name = "haltctl", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Data directory holding container records and storage.
    #[arg(long, global = true, env = constants::HOME_ENV)]
    pub data_dir: Option<PathBuf>,

    /// Configuration file; defaults to `config.json` in the data directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Gracefully stop containers, killing them after a timeout.
    Stop(stop::StopArgs),
    /// Send a signal to containers (SIGKILL by default).
    Kill(kill::KillArgs),
    /// Remove containers.
    Rm(rm::RmArgs),
    /// List containers.
    Ps(ps::PsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the engine cannot be opened or the command fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.data_dir, cli.config)?;
    let engine = open_engine(config).await?;
    match cli.command {
        Command::Stop(args) => stop::execute(&engine, args).await,
        Command::Kill(args) => kill::execute(&engine, args).await,
        Command::Rm(args) => rm::execute(&engine, args).await,
        Command::Ps(args) => ps::execute(&engine, &args).await,
    }
}

fn load_config(data_dir: Option<PathBuf>, path: Option<PathBuf>) -> anyhow::Result<HaltConfig> {
    let dir = data_dir.clone().unwrap_or_else(|| constants::data_dir().clone());
    let path = path.or_else(|| {
        let default = dir.join(constants::CONFIG_FILE);
        default.exists().then_some(default)
    });
    let mut config = match path {
        Some(path) => {
            let mut config = HaltConfig::load(&path)
                .with_context(|| format!("cannot load configuration {}", path.display()))?;
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            config
        }
        None => HaltConfig::with_data_dir(dir),
    };
    if config.data_dir.as_os_str().is_empty() {
        config.data_dir = constants::data_dir().clone();
    }
    Ok(config)
}

/// Builds the engine, restores recorded containers and watches the
/// running ones for exits.
async fn open_engine(config: HaltConfig) -> anyhow::Result<Arc<Engine>> {
    let engine = Engine::builder(config).build()?;
    let running = engine.restore().await.context("cannot restore containers")?;
    for container in &running {
        let _monitor = engine.spawn_exit_monitor(container);
    }
    tracing::debug!(running = running.len(), "engine ready");
    Ok(engine)
}

/// Runs `op` for every name, reporting each failure and failing overall
/// if any did.
async fn for_each<F, Fut>(names: &[String], mut op: F) -> anyhow::Result<()>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = halt_common::error::Result<()>>,
{
    let mut failed = 0_usize;
    for name in names {
        match op(name.clone()).await {
            Ok(()) => crate::output::print_line(name),
            Err(e) => {
                failed += 1;
                crate::output::print_error(&format!("{name}: {e}"));
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} containers failed", names.len());
    }
    Ok(())
}
