//! Low-latency microphone streaming to a cloud speech recognizer, split
//! into a capture-side client and a credential-isolating relay.
//!
//! The client owns the microphone and resamples captured audio into fixed
//! 20 ms PCM16 frames inside the capture callback, then ships them over a
//! websocket to the relay. The relay authenticates to the speech provider,
//! forwards the frames, and sends partial/final transcripts back down the
//! same connection.

pub mod audio_toolkit;
pub mod client;
pub mod error;
pub mod protocol;
pub mod relay;

pub use client::{ClientConfig, SessionCallbacks, StreamSession, StreamingClient};
pub use error::ClientError;
pub use relay::{RelayConfig, RelayServer};
