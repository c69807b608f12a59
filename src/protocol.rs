//! Wire protocol between the streaming client and the relay.
//!
//! One websocket connection carries two kinds of traffic, told apart by the
//! websocket frame type: text frames are control JSON, binary frames are raw
//! PCM16LE audio. Control messages are small tagged objects; audio frames
//! have no envelope at all.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transport sample rate the relay expects audio at.
pub const TRANSPORT_SAMPLE_RATE: u32 = 16_000;

/// Duration of one audio frame on the wire.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Sample encodings the relay understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioEncoding {
    #[serde(rename = "pcm_s16le")]
    PcmS16le,
}

/// Audio format declared by the client before any frame is sent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub format: AudioEncoding,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    pub channels: u16,
}

impl SessionConfig {
    /// Mono PCM16LE at the transport rate, the only format this system sends.
    pub fn pcm_mono(sample_rate: u32) -> Self {
        Self {
            format: AudioEncoding::PcmS16le,
            sample_rate,
            channels: 1,
        }
    }
}

/// Control messages sent by the client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Must be the first message of the session.
    #[serde(rename = "format")]
    Format {
        #[serde(flatten)]
        config: SessionConfig,
    },
    /// Graceful end of stream; the relay finalizes the upstream session.
    #[serde(rename = "end")]
    End,
}

/// Control messages sent by the relay to the client.
///
/// `confidence` only exists on finals; partials are revisable and carry
/// none by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "partial")]
    Partial { text: String },
    #[serde(rename = "final")]
    Final {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

/// One fixed-duration slice of mono PCM audio, the atomic unit of transport.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Little-endian byte encoding used for the binary websocket payload.
    pub fn into_le_bytes(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

impl From<&[i16]> for AudioFrame {
    fn from(samples: &[i16]) -> Self {
        Self::new(samples.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_message_shape() {
        let msg = ClientMessage::Format {
            config: SessionConfig::pcm_mono(16_000),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "format");
        assert_eq!(json["format"], "pcm_s16le");
        assert_eq!(json["sampleRate"], 16_000);
        assert_eq!(json["channels"], 1);
    }

    #[test]
    fn end_message_shape() {
        assert_eq!(
            serde_json::to_string(&ClientMessage::End).unwrap(),
            r#"{"type":"end"}"#
        );
    }

    #[test]
    fn parses_format_from_consumer_json() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"format","format":"pcm_s16le","sampleRate":16000,"channels":1}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Format { config } => {
                assert_eq!(config.format, AudioEncoding::PcmS16le);
                assert_eq!(config.sample_rate, 16_000);
                assert_eq!(config.channels, 1);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn partial_never_carries_confidence() {
        let json = serde_json::to_string(&ServerMessage::Partial {
            text: "gar".into(),
        })
        .unwrap();
        assert!(!json.contains("confidence"));
    }

    #[test]
    fn final_confidence_omitted_when_absent() {
        let json = serde_json::to_string(&ServerMessage::Final {
            text: "garen q".into(),
            confidence: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"final","text":"garen q"}"#);
    }

    #[test]
    fn final_round_trips_with_confidence() {
        let msg = ServerMessage::Final {
            text: "garen q".into(),
            confidence: Some(0.9),
        };
        let back: ServerMessage =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn frame_bytes_are_little_endian() {
        let frame = AudioFrame::new(vec![0x0102, -2]);
        assert_eq!(frame.into_le_bytes(), vec![0x02, 0x01, 0xFE, 0xFF]);
    }
}
