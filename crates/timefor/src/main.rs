mod command;
mod discord;
mod registry;
mod version;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result, bail};
use clap::Parser;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::{registry::TimezoneRegistry, version::short_version};

const TIMEZONE_FILE: &str = "timezones.json";

#[derive(Parser)]
#[command(version = short_version())]
struct Args {
    /// Directory holding the persisted timezone registry
    #[arg(long, default_value = "savedTimezones")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    tracing::info!(version = short_version(), "timefor version");

    let token = std::env::var("botToken").unwrap_or_default();
    let token = token.trim_end_matches('\n');
    if token.is_empty() {
        bail!("Bot token is empty, you must specify one in the botToken environment variable");
    }

    let registry = TimezoneRegistry::load(args.data_dir.join(TIMEZONE_FILE))
        .context("Failed to load timezone registry")?;
    info!(entries = registry.len(), "Timezone registry loaded");
    let registry = Arc::new(Mutex::new(registry));

    // From here on the registry is flushed on every exit path, clean
    // shutdown and gateway failure alike.
    let result = discord::run(token, registry.clone()).await;

    let registry = registry.lock().await;
    match registry.save() {
        Ok(()) => info!(entries = registry.len(), "Timezone registry saved"),
        Err(e) => error!(error = %e, "Failed to save timezone registry"),
    }

    result
}
