//! Wire protocol and real-time connection layer for cohost.
//!
//! This crate handles the fixed binary format carried over the data
//! channel ([`wire`]), the JSON signaling envelope carried over the client
//! transport ([`envelope`]), and the abstraction over one negotiated
//! real-time connection ([`rtc`]) with a WebRTC backend behind the
//! `webrtc` feature.

pub mod envelope;
pub mod error;
pub mod rtc;
pub mod wire;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use error::ProtocolError;
pub use rtc::{LocalTrack, RemoteTrack, RtcBackend, RtcConfig, RtcConnection, RtcEvent, RtcState};
pub use wire::{ClientFrame, ServerFrame};
