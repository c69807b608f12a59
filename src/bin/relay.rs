//! Relay server binary.
//!
//! The upstream credential comes from `DEEPGRAM_API_KEY`; the process does
//! not start without it.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use std::time::Duration;
use voicebridge::{RelayConfig, RelayServer};

#[derive(Parser)]
#[command(name = "voicebridge-relay", about = "Credential-isolating transcript relay")]
struct Args {
    /// Port to listen on (loopback only)
    #[arg(long, default_value_t = 8787)]
    port: u16,

    /// Websocket URL of the upstream speech provider
    #[arg(long, default_value = "wss://api.deepgram.com/v1/listen")]
    upstream_url: String,

    /// Recognition language
    #[arg(long, default_value = "en-US")]
    language: String,

    /// Provider endpointing threshold in milliseconds
    #[arg(long, default_value_t = 300)]
    endpointing_ms: u32,

    /// Grace period after end-of-stream before the upstream is forced shut
    #[arg(long, default_value_t = 500)]
    finalize_grace_ms: u64,

    /// Extra vocabulary boost entries (repeatable)
    #[arg(long = "keyword")]
    keywords: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let api_key = match std::env::var("DEEPGRAM_API_KEY") {
        Ok(key) if !key.trim().is_empty() => key,
        _ => bail!("DEEPGRAM_API_KEY must be set"),
    };

    let mut config = RelayConfig {
        api_key,
        upstream_url: args.upstream_url,
        language: args.language,
        endpointing_ms: args.endpointing_ms,
        finalize_grace: Duration::from_millis(args.finalize_grace_ms),
        ..RelayConfig::default()
    };
    config.keywords.extend(args.keywords);

    let mut server = RelayServer::new(args.port);
    server.start(config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");
    server.stop();
    Ok(())
}
