use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cw_core::config::Config;
use cw_core::shutdown::ShutdownSignal;
use cw_daemon::Supervisor;
use cw_surface::file::{FileChannel, FileSurfaceProvider};

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.general.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        agents = ?config.agents.names,
        channel = %config.channel.path,
        "crosswire starting"
    );

    let provider = Arc::new(FileSurfaceProvider::new(expand_tilde(
        &config.agents.surface_root,
    )));
    let channel = Arc::new(FileChannel::new(expand_tilde(&config.channel.path)));

    let shutdown = ShutdownSignal::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.trigger();
            }
        });
    }

    let mut supervisor = Supervisor::new(config, provider, channel);
    supervisor
        .run(shutdown)
        .await
        .context("supervisor loop failed")?;
    Ok(())
}
