//! scribe: run a streaming generation or watch a background job

mod commands;
mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scribe_core::{ApiClient, ClientConfig, EnvToken};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Server base URL, overrides config and SCRIBE_API_URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Environment variable holding the bearer token
    #[arg(long, global = true)]
    token_env: Option<String>,

    /// Log filter when RUST_LOG is unset (e.g. `debug`, `scribe_core=trace`)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// POST a payload to a streaming endpoint and print the generated text
    Stream {
        /// Endpoint path below the base URL, e.g. `novel/chapter/generate`
        endpoint: String,

        /// Inline JSON payload
        #[arg(long, conflicts_with = "payload_file")]
        payload: Option<String>,

        /// Read the JSON payload from a file
        #[arg(long)]
        payload_file: Option<PathBuf>,

        /// Print every outcome as one JSON line instead of plain text
        #[arg(long)]
        json: bool,
    },
    /// Poll a background job until it finishes
    Poll {
        job_id: String,

        /// Delay between status fetches, overrides config
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Print every event as one JSON line
        #[arg(long)]
        json: bool,
    },
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = ClientConfig::from_file(path)?;
            config.apply_env()?;
            config
        }
        None => ClientConfig::load()?,
    };

    if let Some(url) = &cli.api_url {
        config.base_url = url.clone();
    }
    if let Some(var) = &cli.token_env {
        config.token_env = var.clone();
    }
    if let Command::Poll {
        interval_ms: Some(ms),
        ..
    } = cli.command
    {
        config.poll_interval_ms = ms;
    }

    config.validate()?;
    Ok(config)
}

fn read_payload(inline: Option<&str>, file: Option<&PathBuf>) -> Result<serde_json::Value> {
    let raw = match (inline, file) {
        (Some(text), _) => text.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload file {}", path.display()))?,
        (None, None) => return Ok(serde_json::json!({})),
    };
    serde_json::from_str(&raw).context("Payload is not valid JSON")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref());

    let config = load_config(&cli)?;
    tracing::debug!("Using server {}", config.base_url);

    let credentials = Arc::new(EnvToken::new(config.token_env.clone()));
    let client = ApiClient::new(config, credentials).context("Failed to build HTTP client")?;

    match cli.command {
        Command::Stream {
            endpoint,
            payload,
            payload_file,
            json,
        } => {
            let payload = read_payload(payload.as_deref(), payload_file.as_ref())?;
            Ok(commands::stream(client, &endpoint, &payload, json).await)
        }
        Command::Poll { job_id, json, .. } => commands::poll(client, job_id, json).await,
    }
}
