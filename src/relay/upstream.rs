//! Connection to the upstream speech provider.
//!
//! The provider speaks websocket: binary PCM in, tagged JSON events out.
//! The credential travels in the `Authorization` header, never in the URL
//! and never on the consumer side of the relay.

use anyhow::{anyhow, Context, Result};
use log::debug;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::RelayConfig;
use crate::protocol::{AudioEncoding, ServerMessage, SessionConfig};

pub(crate) type UpstreamWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Control frame asking the provider to flush and finish the stream.
pub(crate) const FINALIZE_FRAME: &str = r#"{"type":"CloseStream"}"#;

/// Events the provider sends back. Anything unrecognized is treated like
/// metadata and dropped.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum UpstreamEvent {
    Results {
        channel: ResultsChannel,
        #[serde(default)]
        is_final: bool,
    },
    Metadata {},
    UtteranceEnd {},
    SpeechStarted {},
    Error {
        #[serde(default, alias = "description")]
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct ResultsChannel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Open the provider connection for one session.
pub(crate) async fn connect(relay: &RelayConfig, session: &SessionConfig) -> Result<UpstreamWs> {
    let url = build_url(relay, session)?;
    let mut request = url
        .as_str()
        .into_client_request()
        .context("building upstream request")?;
    request.headers_mut().insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Token {}", relay.api_key))
            .context("credential is not a valid header value")?,
    );

    let (ws, response) = timeout(relay.connect_timeout, connect_async(request))
        .await
        .map_err(|_| anyhow!("upstream connect timed out after {:?}", relay.connect_timeout))?
        .context("upstream websocket handshake failed")?;

    debug!("upstream connection open ({})", response.status());
    Ok(ws)
}

/// Build the provider URL from the session's declared format plus the fixed
/// recognition options.
pub(crate) fn build_url(relay: &RelayConfig, session: &SessionConfig) -> Result<Url> {
    let encoding = match session.format {
        AudioEncoding::PcmS16le => "linear16",
    };

    let mut url = Url::parse(&relay.upstream_url).context("invalid upstream URL")?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("encoding", encoding)
            .append_pair("sample_rate", &session.sample_rate.to_string())
            .append_pair("channels", &session.channels.to_string())
            .append_pair("language", &relay.language)
            .append_pair("interim_results", "true")
            .append_pair("endpointing", &relay.endpointing_ms.to_string())
            .append_pair("vad_events", "true")
            .append_pair("smart_format", "true");
        for keyword in &relay.keywords {
            query.append_pair("keywords", keyword);
        }
    }
    Ok(url)
}

/// Reshape one provider event into the downstream transcript protocol.
///
/// Returns `None` for metadata, keepalives, empty transcripts, and anything
/// that does not parse as a known event.
pub(crate) fn translate(raw: &str) -> Option<ServerMessage> {
    let event = match serde_json::from_str::<UpstreamEvent>(raw) {
        Ok(event) => event,
        Err(e) => {
            debug!("ignoring unrecognized upstream message: {e}");
            return None;
        }
    };

    match event {
        UpstreamEvent::Results { channel, is_final } => {
            let alternative = channel.alternatives.into_iter().next()?;
            let text = alternative.transcript.trim().to_string();
            if text.is_empty() {
                return None;
            }
            Some(if is_final {
                ServerMessage::Final {
                    text,
                    confidence: alternative.confidence,
                }
            } else {
                ServerMessage::Partial { text }
            })
        }
        UpstreamEvent::Error { message } => Some(ServerMessage::Error {
            message: if message.is_empty() {
                "speech service error".to_string()
            } else {
                message
            },
        }),
        UpstreamEvent::Metadata {}
        | UpstreamEvent::UtteranceEnd {}
        | UpstreamEvent::SpeechStarted {} => None,
    }
}
