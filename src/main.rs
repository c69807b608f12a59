//! Microphone CLI: streams the default input device to a relay and prints
//! transcripts as they arrive.

use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use voicebridge::audio_toolkit::list_input_devices;
use voicebridge::{ClientConfig, SessionCallbacks, StreamingClient};

#[derive(Parser)]
#[command(name = "voicebridge", about = "Stream the microphone to a transcript relay")]
struct Args {
    /// Websocket URL of the relay
    #[arg(long, default_value = "ws://127.0.0.1:8787")]
    relay: String,

    /// Capture from this input device instead of the default
    #[arg(long)]
    device: Option<String>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Write the streamed session audio to this WAV file on exit
    #[arg(long)]
    save_wav: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_devices {
        for device in list_input_devices()? {
            println!("{}", device.name);
        }
        return Ok(());
    }

    let client = StreamingClient::new(ClientConfig {
        relay_url: args.relay,
        device_name: args.device,
        wav_dump: args.save_wav,
        ..ClientConfig::default()
    });

    let callbacks = SessionCallbacks {
        on_partial: Arc::new(|text: &str| println!("[partial] {text}")),
        on_final: Arc::new(|text: &str, confidence: Option<f64>| match confidence {
            Some(c) => println!("[final]   {text} ({c:.2})"),
            None => println!("[final]   {text}"),
        }),
        on_error: Arc::new(|err: voicebridge::ClientError| eprintln!("[error]   {err}")),
    };

    let session = client.start(callbacks).await?;
    info!("streaming; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    session.stop();
    // Leave the connection a moment to flush the end-of-stream handshake
    // and print any trailing finals.
    tokio::time::sleep(std::time::Duration::from_millis(800)).await;
    Ok(())
}
