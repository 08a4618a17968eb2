//! Real-time connection abstraction.
//!
//! A backend negotiates one peer connection per session: SDP offer/answer,
//! ICE candidate exchange, one ordered data channel named `data`, outgoing
//! media tracks fed from the capture layer, and incoming media tracks.
//! Everything the backend observes is reported on the event channel
//! returned by [`RtcBackend::create_connection`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cohost_types::{IceCandidate, IceServer, MediaKind, MediaSample};
use tokio::sync::{broadcast, mpsc};

use crate::error::ProtocolError;

/// Capacity of the backend event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Label of the input/cursor data channel.
pub const DATA_CHANNEL_LABEL: &str = "data";

/// Connection state as reported by the ICE/DTLS stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for RtcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Failed => write!(f, "failed"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Per-connection negotiation settings.
#[derive(Debug, Clone, Default)]
pub struct RtcConfig {
    pub ice_lite: bool,
    /// Stream local candidates as they are gathered instead of waiting for
    /// gathering to finish before returning an offer.
    pub ice_trickle: bool,
    pub ice_servers: Vec<IceServer>,
    /// Public addresses advertised as host candidates.
    pub nat1to1_ips: Vec<String>,
    /// Restrict ICE to this UDP port range.
    pub udp_port_range: Option<(u16, u16)>,
}

/// An outgoing media track fed by the capture layer.
#[derive(Debug)]
pub struct LocalTrack {
    pub kind: MediaKind,
    pub id: String,
    pub stream_id: String,
    pub mime_type: String,
    pub samples: broadcast::Receiver<MediaSample>,
}

/// An incoming media track offered by the client.
#[derive(Debug)]
pub struct RemoteTrack {
    pub kind: MediaKind,
    pub id: String,
    /// RTP payloads. Dropping the receiver discards the track.
    pub packets: mpsc::Receiver<Bytes>,
}

/// Something the backend observed on a connection.
#[derive(Debug)]
pub enum RtcEvent {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    StateChanged(RtcState),
    DataChannelOpen,
    DataChannelClose,
    DataChannelMessage(Bytes),
    RemoteTrack(RemoteTrack),
}

/// One negotiated real-time connection.
#[async_trait]
pub trait RtcConnection: Send + Sync + 'static {
    /// Attach an outgoing media track. Must be called before the first offer.
    async fn add_local_track(&self, track: LocalTrack) -> Result<(), ProtocolError>;

    /// Create and apply a local offer.
    ///
    /// With `wait_for_gathering` the call returns only once ICE gathering is
    /// complete, so the returned SDP already contains every candidate.
    async fn create_offer(&self, wait_for_gathering: bool) -> Result<String, ProtocolError>;

    /// Apply the remote answer to our offer.
    async fn set_remote_answer(&self, sdp: &str) -> Result<(), ProtocolError>;

    /// Apply a remote offer and return the local answer.
    async fn set_remote_offer(
        &self,
        sdp: &str,
        wait_for_gathering: bool,
    ) -> Result<String, ProtocolError>;

    /// Feed a remote ICE candidate.
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), ProtocolError>;

    /// Stop or resume forwarding local media samples. Tracks stay
    /// negotiated while paused.
    fn set_paused(&self, paused: bool);

    /// Send a binary frame on the data channel.
    async fn send_data(&self, data: Bytes) -> Result<(), ProtocolError>;

    /// Close the connection and release its resources.
    async fn close(&self) -> Result<(), ProtocolError>;
}

/// Factory for real-time connections.
#[async_trait]
pub trait RtcBackend: Send + Sync + 'static {
    async fn create_connection(
        &self,
        config: &RtcConfig,
    ) -> Result<(Arc<dyn RtcConnection>, mpsc::Receiver<RtcEvent>), ProtocolError>;
}
