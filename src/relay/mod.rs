//! Relay server: terminates consumer sessions, keeps the provider
//! credential out of their reach, and bridges audio up / transcripts down.

mod session;
mod upstream;

use anyhow::{ensure, Result};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Relay configuration, fixed for the lifetime of the server.
///
/// The API key is read once at startup and never serialized or echoed to a
/// consumer.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_key: String,
    /// Base websocket URL of the speech provider.
    pub upstream_url: String,
    pub language: String,
    /// Silence threshold (ms) the provider uses to end an utterance.
    pub endpointing_ms: u32,
    /// Vocabulary boosts appended to every upstream URL.
    pub keywords: Vec<String>,
    /// How long to keep forwarding trailing results after end-of-stream
    /// before forcing the upstream connection shut.
    pub finalize_grace: Duration,
    pub connect_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            upstream_url: "wss://api.deepgram.com/v1/listen".to_string(),
            language: "en-US".to_string(),
            endpointing_ms: 300,
            keywords: default_keywords(),
            finalize_grace: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Game vocabulary the recognizer would otherwise mangle.
pub fn default_keywords() -> Vec<String> {
    [
        "garen", "darius", "gank", "ult", "ulti", "recall", "baron", "dragon", "herald",
        "turret", "minion", "jungler", "toplane", "ignite", "flash", "cooldown",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

#[derive(Clone)]
pub(crate) struct RelayState {
    pub(crate) config: Arc<RelayConfig>,
}

/// Websocket relay server, one consumer session per connection.
pub struct RelayServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    port: u16,
}

impl RelayServer {
    /// Bind to this port on loopback; use 0 to let the OS pick.
    pub fn new(port: u16) -> Self {
        Self {
            shutdown_tx: None,
            port,
        }
    }

    /// Start serving. Fails up front when no credential is configured.
    pub async fn start(&mut self, config: RelayConfig) -> Result<SocketAddr> {
        ensure!(
            !config.api_key.trim().is_empty(),
            "refusing to start without an upstream API key"
        );

        let state = RelayState {
            config: Arc::new(config),
        };
        let app = Router::new()
            .route("/", get(ws_handler))
            .route("/health", get(health))
            .with_state(state);

        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = oneshot::channel();
        self.shutdown_tx = Some(tx);

        info!("relay listening on {local_addr}");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    rx.await.ok();
                })
                .await
            {
                error!("relay server error: {e}");
            }
            info!("relay on {local_addr} stopped");
        });

        Ok(local_addr)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn ws_handler(State(state): State<RelayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run(socket, state))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
