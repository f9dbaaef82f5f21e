// ABOUTME: Entry point for the keyfan plugin binary
// ABOUTME: Always prints exactly one JSON response on stdout, whatever goes wrong

mod cli;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use cli::Cli;
use keyfan_core::{Plugin, PluginResponse, INTERNAL_ERROR_MSG};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            keyfan_log::init();
            tracing::error!(error = %e, "Invalid arguments");
            return respond(&PluginResponse::error(
                INTERNAL_ERROR_MSG,
                format!("invalid arguments: {e}"),
            ));
        }
    };

    match cli.log_file {
        Some(ref path) => keyfan_log::init_file("keyfan", path.clone()),
        None => keyfan_log::init(),
    }

    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Failed to load settings");
            return respond(&PluginResponse::error(
                INTERNAL_ERROR_MSG,
                format!("failed to load settings: {e:#}"),
            ));
        }
    };

    if cli.write_config {
        let path = cli
            .config_path()
            .context("Could not determine the settings file location")?;
        settings.save(&path)?;
        eprintln!("Settings written to {}", path.display());
        return Ok(());
    }

    let response = Arc::new(Plugin::new(settings)).run_guarded(cli.input).await;
    respond(&response)
}

fn respond(response: &PluginResponse) -> Result<()> {
    let json = serde_json::to_string(response).context("Failed to serialize response")?;
    println!("{json}");
    Ok(())
}
