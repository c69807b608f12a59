//! Callback-based streaming client.
//!
//! Owns the microphone, the resample/frame pipeline, and the relay
//! connection for one session at a time. The caller gets transcripts and
//! errors through [`SessionCallbacks`] and controls the session lifetime
//! through the [`StreamSession`] handle returned by
//! [`StreamingClient::start`].

mod session;

pub use session::StreamSession;

use futures_util::StreamExt;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;

use crate::audio_toolkit::audio::recorder::spawn_capture;
use crate::audio_toolkit::CaptureConfig;
use crate::error::ClientError;
use crate::protocol::{SessionConfig, FRAME_DURATION, TRANSPORT_SAMPLE_RATE};
use session::{run_reader, run_writer, Cmd, SessionShared};

/// Streaming client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Websocket URL of the relay.
    pub relay_url: String,
    /// Capture from this device, or the host default when `None`.
    pub device_name: Option<String>,
    /// Transport sample rate frames are resampled to.
    pub sample_rate: u32,
    /// Duration of one transport frame.
    pub frame_duration: Duration,
    /// Bound on reaching the open state of the relay connection.
    pub connect_timeout: Duration,
    /// Write the session's outgoing audio to this WAV file when it ends.
    pub wav_dump: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8787".to_string(),
            device_name: None,
            sample_rate: TRANSPORT_SAMPLE_RATE,
            frame_duration: FRAME_DURATION,
            connect_timeout: Duration::from_secs(5),
            wav_dump: None,
        }
    }
}

/// Caller-supplied hooks for one session.
#[derive(Clone)]
pub struct SessionCallbacks {
    /// In-progress recognition, subject to revision.
    pub on_partial: Arc<dyn Fn(&str) + Send + Sync>,
    /// Settled recognition with the provider's confidence when available.
    pub on_final: Arc<dyn Fn(&str, Option<f64>) + Send + Sync>,
    /// Session-level failures, including loss of the relay connection.
    pub on_error: Arc<dyn Fn(ClientError) + Send + Sync>,
}

impl Default for SessionCallbacks {
    fn default() -> Self {
        Self {
            on_partial: Arc::new(|_: &str| {}),
            on_final: Arc::new(|_: &str, _: Option<f64>| {}),
            on_error: Arc::new(|_: ClientError| {}),
        }
    }
}

/// Entry point for streaming microphone audio to the relay.
pub struct StreamingClient {
    config: ClientConfig,
    active: Arc<AtomicBool>,
}

impl StreamingClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a session: acquire the microphone, open the relay connection,
    /// declare the audio format, and begin forwarding frames.
    ///
    /// Fails with [`ClientError::AlreadyActive`] while a previous session
    /// handle is live. Each session gets a fresh resampler; nothing carries
    /// over from the last one.
    pub async fn start(
        &self,
        callbacks: SessionCallbacks,
    ) -> Result<StreamSession, ClientError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ClientError::AlreadyActive);
        }

        let result = self.start_inner(callbacks).await;
        if result.is_err() {
            self.active.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn start_inner(
        &self,
        callbacks: SessionCallbacks,
    ) -> Result<StreamSession, ClientError> {
        // Microphone first: a capture failure should not touch the network.
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
        let capture = spawn_capture(
            CaptureConfig {
                device_name: self.config.device_name.clone(),
                target_rate: self.config.sample_rate,
                frame_duration: self.config.frame_duration,
            },
            frames_tx,
        )
        .await?;

        debug!("connecting to relay at {}", self.config.relay_url);
        let ws = match timeout(
            self.config.connect_timeout,
            connect_async(self.config.relay_url.as_str()),
        )
        .await
        {
            Err(_) => {
                capture.shutdown();
                return Err(ClientError::ConnectTimeout);
            }
            Ok(Err(e)) => {
                capture.shutdown();
                return Err(ClientError::Transport(e.to_string()));
            }
            Ok(Ok((ws, _response))) => ws,
        };
        info!("relay connection open");

        let (sink, stream) = ws.split();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SessionShared::new(
            self.active.clone(),
            cmd_tx.clone(),
            Some(capture),
        ));

        // Pump captured frames into the writer's command stream. The capture
        // side never blocks on this; both hops are unbounded sends.
        tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                if cmd_tx.send(Cmd::Frame(frame)).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(run_writer(
            sink,
            cmd_rx,
            SessionConfig::pcm_mono(self.config.sample_rate),
            self.config.wav_dump.clone(),
            self.config.sample_rate,
        ));
        tokio::spawn(run_reader(stream, callbacks, shared.clone()));

        // Unpause the graph last; the writer already guarantees the format
        // message precedes any frame on the wire.
        if let Some(capture) = shared.capture().lock().unwrap().as_ref() {
            capture.start();
        }

        Ok(StreamSession::new(shared))
    }
}
