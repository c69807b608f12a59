//! Per-session bridging between one consumer connection and one upstream
//! provider connection.
//!
//! A session moves through `AWAITING_CONFIG` (only a format message is
//! acceptable), `STREAMING` (binary frames forwarded upstream, provider
//! results reshaped downstream), and a closing phase where both sockets are
//! shut exactly once. Control and audio are told apart by websocket frame
//! type: text is control, binary is audio, regardless of payload bytes.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message as UpMessage;

use super::upstream::{self, UpstreamWs};
use super::RelayState;
use crate::protocol::{ClientMessage, ServerMessage, SessionConfig};

type Downstream = SplitSink<WebSocket, WsMessage>;

/// Drive one consumer session to completion.
pub(crate) async fn run(socket: WebSocket, state: RelayState) {
    let (mut down_tx, mut down_rx) = socket.split();

    // AWAITING_CONFIG: nothing but a format message may start the session.
    let config = match await_config(&mut down_tx, &mut down_rx).await {
        Some(config) => config,
        None => {
            let _ = down_tx.close().await;
            return;
        }
    };
    info!(
        "session configured: {:?} at {} Hz, {} channel(s)",
        config.format, config.sample_rate, config.channels
    );

    // The upstream connection exists only once a format is known.
    let upstream = match upstream::connect(&state.config, &config).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("upstream connect failed: {e:#}");
            let _ = send_control(
                &mut down_tx,
                &ServerMessage::Error {
                    message: "speech service unavailable".to_string(),
                },
            )
            .await;
            let _ = down_tx.close().await;
            return;
        }
    };

    let (mut up_tx, mut up_rx) = upstream.split();
    stream_phase(
        &mut down_tx,
        &mut down_rx,
        &mut up_tx,
        &mut up_rx,
        state.config.finalize_grace,
    )
    .await;

    // CLOSING: both sockets are owned here and closed exactly once.
    let _ = up_tx.close().await;
    let _ = down_tx.close().await;
    debug!("session closed");
}

/// Wait for the session's format declaration.
///
/// Binary frames are dropped (no target format exists for them yet) and
/// malformed control JSON ends the session. Returns `None` when the session
/// should close without streaming.
async fn await_config(
    down_tx: &mut Downstream,
    down_rx: &mut SplitStream<WebSocket>,
) -> Option<SessionConfig> {
    loop {
        match down_rx.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(ClientMessage::Format { config }) => {
                        if config.channels != 1 {
                            warn!("rejecting session with {} channels", config.channels);
                            let _ = send_control(
                                down_tx,
                                &ServerMessage::Error {
                                    message: "only mono audio is supported".to_string(),
                                },
                            )
                            .await;
                            return None;
                        }
                        return Some(config);
                    }
                    Ok(ClientMessage::End) => {
                        debug!("session ended before sending any configuration");
                        return None;
                    }
                    Err(e) => {
                        warn!("malformed control message before configuration: {e}");
                        let _ = send_control(
                            down_tx,
                            &ServerMessage::Error {
                                message: "expected a format message first".to_string(),
                            },
                        )
                        .await;
                        return None;
                    }
                }
            }
            Some(Ok(WsMessage::Binary(frame))) => {
                warn!(
                    "dropping {}-byte audio frame received before configuration",
                    frame.len()
                );
            }
            Some(Ok(WsMessage::Close(_))) | None => return None,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!("consumer socket error while awaiting configuration: {e}");
                return None;
            }
        }
    }
}

/// STREAMING: shuttle frames upstream and results downstream until either
/// side finishes.
async fn stream_phase(
    down_tx: &mut Downstream,
    down_rx: &mut SplitStream<WebSocket>,
    up_tx: &mut SplitSink<UpstreamWs, UpMessage>,
    up_rx: &mut SplitStream<UpstreamWs>,
    finalize_grace: Duration,
) {
    loop {
        tokio::select! {
            inbound = down_rx.next() => match inbound {
                Some(Ok(WsMessage::Binary(frame))) => {
                    // Forwarded verbatim and immediately; ordering rides on
                    // the single connection.
                    if up_tx.send(UpMessage::binary(frame)).await.is_err() {
                        let _ = send_control(down_tx, &ServerMessage::Error {
                            message: "speech service unavailable".to_string(),
                        }).await;
                        return;
                    }
                }
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::End) => {
                            debug!("end of stream requested; finalizing upstream");
                            let _ = up_tx.send(UpMessage::text(upstream::FINALIZE_FRAME)).await;
                            drain_upstream_tail(down_tx, up_rx, finalize_grace).await;
                            return;
                        }
                        Ok(other) => {
                            debug!("ignoring unexpected control message mid-stream: {other:?}");
                        }
                        Err(e) => {
                            debug!("ignoring malformed control message mid-stream: {e}");
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("consumer disconnected");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("consumer socket error: {e}");
                    return;
                }
            },
            outbound = up_rx.next() => match outbound {
                Some(Ok(UpMessage::Text(text))) => {
                    if let Some(msg) = upstream::translate(text.as_str()) {
                        let is_error = matches!(msg, ServerMessage::Error { .. });
                        if send_control(down_tx, &msg).await.is_err() || is_error {
                            return;
                        }
                    }
                }
                Some(Ok(UpMessage::Close(_))) | None => {
                    warn!("upstream closed mid-session");
                    let _ = send_control(down_tx, &ServerMessage::Error {
                        message: "speech service closed the stream".to_string(),
                    }).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("upstream socket error: {e}");
                    let _ = send_control(down_tx, &ServerMessage::Error {
                        message: "speech service unavailable".to_string(),
                    }).await;
                    return;
                }
            },
        }
    }
}

/// After finalizing, keep forwarding trailing results for the grace window,
/// then let the caller close the sockets.
async fn drain_upstream_tail(
    down_tx: &mut Downstream,
    up_rx: &mut SplitStream<UpstreamWs>,
    grace: Duration,
) {
    let deadline = Instant::now() + grace;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, up_rx.next()).await {
            Ok(Some(Ok(UpMessage::Text(text)))) => {
                if let Some(msg) = upstream::translate(text.as_str()) {
                    if send_control(down_tx, &msg).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Some(Ok(UpMessage::Close(_)))) | Ok(None) => break,
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_))) => break,
            Err(_) => break,
        }
    }
}

async fn send_control(
    down_tx: &mut Downstream,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => down_tx.send(WsMessage::Text(json.into())).await,
        Err(e) => {
            debug!("failed to encode control message: {e}");
            Ok(())
        }
    }
}
