use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::SessionCallbacks;
use crate::audio_toolkit::{save_wav_file, CaptureHandle};
use crate::error::ClientError;
use crate::protocol::{AudioFrame, ClientMessage, ServerMessage, SessionConfig};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands consumed by the writer task, in order.
pub(crate) enum Cmd {
    Frame(AudioFrame),
    End,
    Close,
}

/// State shared between the session handle, the reader task, and teardown.
pub(crate) struct SessionShared {
    /// The client's one-session-at-a-time flag; released on teardown.
    active: Arc<AtomicBool>,
    closed: AtomicBool,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    capture: Mutex<Option<CaptureHandle>>,
}

impl SessionShared {
    pub(crate) fn new(
        active: Arc<AtomicBool>,
        cmd_tx: mpsc::UnboundedSender<Cmd>,
        capture: Option<CaptureHandle>,
    ) -> Self {
        Self {
            active,
            closed: AtomicBool::new(false),
            cmd_tx,
            capture: Mutex::new(capture),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn capture(&self) -> &Mutex<Option<CaptureHandle>> {
        &self.capture
    }

    /// Release everything the session owns, exactly once.
    ///
    /// Safe to call from `stop()`, from the reader task after a lost
    /// connection, and concurrently from both: the swap on `closed` makes
    /// every call after the first a no-op.
    ///
    /// Graceful teardown sends the end-of-stream control message first, then
    /// releases the frame hook, the audio graph and microphone, and finally
    /// the transport.
    pub(crate) fn teardown(&self, graceful: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if graceful {
            let _ = self.cmd_tx.send(Cmd::End);
        }
        if let Some(capture) = self.capture.lock().unwrap().take() {
            capture.shutdown();
        }
        let _ = self.cmd_tx.send(Cmd::Close);

        self.active.store(false, Ordering::SeqCst);
        debug!("session torn down (graceful: {graceful})");
    }
}

/// Owned handle to a running session.
///
/// Holding the handle is what makes the session active; a second `start`
/// fails until this one is stopped or dropped.
pub struct StreamSession {
    shared: Arc<SessionShared>,
}

impl StreamSession {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    /// End the session. Idempotent; a second call has no further effect.
    pub fn stop(&self) {
        self.shared.teardown(true);
    }

    pub fn is_active(&self) -> bool {
        !self.shared.is_closed()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.shared.teardown(true);
    }
}

/// Writer task: the format message goes out first, then frames and control
/// messages in command order, so no frame can precede the configuration.
pub(crate) async fn run_writer(
    mut sink: SplitSink<WsStream, Message>,
    mut cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    config: SessionConfig,
    wav_dump: Option<PathBuf>,
    sample_rate: u32,
) {
    let format = match serde_json::to_string(&ClientMessage::Format { config }) {
        Ok(json) => json,
        Err(e) => {
            error!("failed to encode format message: {e}");
            return;
        }
    };
    if let Err(e) = sink.send(Message::text(format)).await {
        debug!("failed to send format message: {e}");
        return;
    }

    let mut dump: Vec<i16> = Vec::new();
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Cmd::Frame(frame) => {
                if wav_dump.is_some() {
                    dump.extend_from_slice(frame.samples());
                }
                if sink.send(Message::binary(frame.into_le_bytes())).await.is_err() {
                    break;
                }
            }
            Cmd::End => {
                // Best effort; the session is closing either way.
                if let Ok(json) = serde_json::to_string(&ClientMessage::End) {
                    let _ = sink.send(Message::text(json)).await;
                }
            }
            Cmd::Close => break,
        }
    }
    let _ = sink.close().await;

    if let Some(path) = wav_dump {
        match save_wav_file(&path, &dump, sample_rate) {
            Ok(()) => info!("session audio written to {}", path.display()),
            Err(e) => error!("failed to write session WAV dump: {e:#}"),
        }
    }
}

/// Reader task: routes relay messages into the caller's callbacks and turns
/// an unsolicited close into `ConnectionLost` plus a full teardown.
pub(crate) async fn run_reader(
    mut stream: SplitStream<WsStream>,
    callbacks: SessionCallbacks,
    shared: Arc<SessionShared>,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => dispatch_text(text.as_str(), &callbacks),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("relay socket error: {e}");
                break;
            }
        }
    }

    if !shared.is_closed() {
        (callbacks.on_error)(ClientError::ConnectionLost);
        shared.teardown(false);
    }
}

/// Parse one control message and invoke the matching callback.
pub(crate) fn dispatch_text(raw: &str, callbacks: &SessionCallbacks) {
    match serde_json::from_str::<ServerMessage>(raw) {
        Ok(ServerMessage::Partial { text }) => (callbacks.on_partial)(&text),
        Ok(ServerMessage::Final { text, confidence }) => (callbacks.on_final)(&text, confidence),
        Ok(ServerMessage::Error { message }) => (callbacks.on_error)(ClientError::Relay(message)),
        Err(e) => (callbacks.on_error)(ClientError::MalformedMessage(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_callbacks() -> (SessionCallbacks, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let partials = log.clone();
        let finals = log.clone();
        let errors = log.clone();
        let callbacks = SessionCallbacks {
            on_partial: Arc::new(move |text: &str| {
                partials.lock().unwrap().push(format!("partial:{text}"));
            }),
            on_final: Arc::new(move |text: &str, confidence: Option<f64>| {
                finals
                    .lock()
                    .unwrap()
                    .push(format!("final:{text}:{confidence:?}"));
            }),
            on_error: Arc::new(move |err: ClientError| {
                errors.lock().unwrap().push(format!("error:{err}"));
            }),
        };
        (callbacks, log)
    }

    #[test]
    fn dispatch_routes_partial_and_final() {
        let (callbacks, log) = counting_callbacks();
        dispatch_text(r#"{"type":"partial","text":"gar"}"#, &callbacks);
        dispatch_text(
            r#"{"type":"final","text":"garen q","confidence":0.9}"#,
            &callbacks,
        );
        let entries = log.lock().unwrap();
        assert_eq!(
            *entries,
            vec![
                "partial:gar".to_string(),
                "final:garen q:Some(0.9)".to_string()
            ]
        );
    }

    #[test]
    fn dispatch_flags_unknown_shapes() {
        let (callbacks, log) = counting_callbacks();
        dispatch_text(r#"{"type":"mystery"}"#, &callbacks);
        dispatch_text("not json at all", &callbacks);
        let entries = log.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.starts_with("error:")));
    }

    #[test]
    fn dispatch_surfaces_relay_errors() {
        let (callbacks, log) = counting_callbacks();
        dispatch_text(r#"{"type":"error","message":"speech service unavailable"}"#, &callbacks);
        let entries = log.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("speech service unavailable"));
    }

    #[test]
    fn teardown_runs_once() {
        let active = Arc::new(AtomicBool::new(true));
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let shared = SessionShared::new(active.clone(), cmd_tx, None);

        shared.teardown(true);
        shared.teardown(true);
        shared.teardown(false);

        // Exactly one End followed by one Close.
        assert!(matches!(cmd_rx.try_recv(), Ok(Cmd::End)));
        assert!(matches!(cmd_rx.try_recv(), Ok(Cmd::Close)));
        assert!(cmd_rx.try_recv().is_err());
        assert!(!active.load(Ordering::SeqCst));
        assert!(shared.is_closed());
    }

    #[test]
    fn stop_is_idempotent_through_the_handle() {
        let active = Arc::new(AtomicBool::new(true));
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let session = StreamSession::new(Arc::new(SessionShared::new(active, cmd_tx, None)));

        assert!(session.is_active());
        session.stop();
        session.stop();
        assert!(!session.is_active());
        drop(session);

        assert!(matches!(cmd_rx.try_recv(), Ok(Cmd::End)));
        assert!(matches!(cmd_rx.try_recv(), Ok(Cmd::Close)));
        assert!(cmd_rx.try_recv().is_err());
    }

    #[test]
    fn lost_connection_teardown_skips_the_end_message() {
        let active = Arc::new(AtomicBool::new(true));
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let shared = SessionShared::new(active, cmd_tx, None);

        shared.teardown(false);

        assert!(matches!(cmd_rx.try_recv(), Ok(Cmd::Close)));
        assert!(cmd_rx.try_recv().is_err());
    }
}
