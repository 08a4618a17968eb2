//! In-memory real-time backend for testing.
//!
//! [`MockRtcBackend`] hands out connections that never touch the network.
//! The paired [`MockRtcHandle`] lets tests play the remote side: emit
//! backend events, inspect what the server sent, and inject failures.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cohost_types::{IceCandidate, MediaKind};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::error::ProtocolError;
use crate::rtc::{
    LocalTrack, RemoteTrack, RtcBackend, RtcConfig, RtcConnection, RtcEvent, RtcState,
    EVENT_CHANNEL_CAPACITY,
};

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BackendState {
    connections: Vec<MockConnectionHandle>,
    fail_create: bool,
    fail_offer: bool,
}

/// Mock real-time backend.
pub struct MockRtcBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockRtcBackend {
    /// Create a backend and its observer handle.
    pub fn new() -> (Self, MockRtcHandle) {
        let state = Arc::new(Mutex::new(BackendState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockRtcHandle { state },
        )
    }
}

#[async_trait]
impl RtcBackend for MockRtcBackend {
    async fn create_connection(
        &self,
        config: &RtcConfig,
    ) -> Result<(Arc<dyn RtcConnection>, mpsc::Receiver<RtcEvent>), ProtocolError> {
        let mut backend = self.state.lock();
        if backend.fail_create {
            return Err(ProtocolError::Connection("injected create failure".into()));
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let state = Arc::new(Mutex::new(ConnectionState {
            config: config.clone(),
            fail_offer: backend.fail_offer,
            ..ConnectionState::default()
        }));
        let handle = MockConnectionHandle {
            state: Arc::clone(&state),
            events: events_tx.clone(),
        };
        backend.connections.push(handle);

        let connection = MockConnection {
            state,
            events: events_tx,
        };
        Ok((Arc::new(connection), events_rx))
    }
}

/// Clonable observer handle for [`MockRtcBackend`].
#[derive(Clone)]
pub struct MockRtcHandle {
    state: Arc<Mutex<BackendState>>,
}

impl MockRtcHandle {
    /// Number of connections created so far.
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Handle for the `index`-th connection created.
    pub fn connection(&self, index: usize) -> Option<MockConnectionHandle> {
        self.state.lock().connections.get(index).cloned()
    }

    /// Handle for the most recently created connection.
    pub fn last_connection(&self) -> Option<MockConnectionHandle> {
        self.state.lock().connections.last().cloned()
    }

    /// Make every later `create_connection` fail.
    pub fn fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    /// Make offers on connections created from now on fail.
    pub fn fail_offer(&self, fail: bool) {
        self.state.lock().fail_offer = fail;
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Metadata of a local track attached by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedTrack {
    pub kind: MediaKind,
    pub id: String,
    pub mime_type: String,
}

#[derive(Default)]
struct ConnectionState {
    config: RtcConfig,
    fail_offer: bool,
    local_tracks: Vec<AttachedTrack>,
    samples_forwarded: usize,
    paused: bool,
    offers: usize,
    remote_answers: Vec<String>,
    remote_offers: Vec<String>,
    remote_candidates: Vec<IceCandidate>,
    data_open: bool,
    sent: Vec<Bytes>,
    closed: bool,
}

struct MockConnection {
    state: Arc<Mutex<ConnectionState>>,
    events: mpsc::Sender<RtcEvent>,
}

impl MockConnection {
    fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.state.lock().closed {
            return Err(ProtocolError::Connection("connection closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RtcConnection for MockConnection {
    async fn add_local_track(&self, track: LocalTrack) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        self.state.lock().local_tracks.push(AttachedTrack {
            kind: track.kind,
            id: track.id.clone(),
            mime_type: track.mime_type.clone(),
        });

        let state = Arc::clone(&self.state);
        let mut samples = track.samples;
        tokio::spawn(async move {
            loop {
                match samples.recv().await {
                    Ok(_) => {
                        let mut state = state.lock();
                        if state.closed {
                            break;
                        }
                        if !state.paused {
                            state.samples_forwarded += 1;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    async fn create_offer(&self, _wait_for_gathering: bool) -> Result<String, ProtocolError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.fail_offer {
            return Err(ProtocolError::Negotiation("injected offer failure".into()));
        }
        state.offers += 1;
        Ok(format!("v=0 mock-offer-{}", state.offers))
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        if sdp.is_empty() {
            return Err(ProtocolError::Negotiation("empty answer".into()));
        }
        self.state.lock().remote_answers.push(sdp.to_string());
        Ok(())
    }

    async fn set_remote_offer(
        &self,
        sdp: &str,
        _wait_for_gathering: bool,
    ) -> Result<String, ProtocolError> {
        self.ensure_open()?;
        if sdp.is_empty() {
            return Err(ProtocolError::Negotiation("empty offer".into()));
        }
        let mut state = self.state.lock();
        state.remote_offers.push(sdp.to_string());
        Ok(format!("v=0 mock-answer-{}", state.remote_offers.len()))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        self.state.lock().remote_candidates.push(candidate);
        Ok(())
    }

    fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    async fn send_data(&self, data: Bytes) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        if state.closed || !state.data_open {
            return Err(ProtocolError::ChannelClosed);
        }
        state.sent.push(data);
        Ok(())
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.data_open = false;
        }
        let _ = self
            .events
            .try_send(RtcEvent::StateChanged(RtcState::Closed));
        Ok(())
    }
}

/// Test-side view of one mock connection.
#[derive(Clone)]
pub struct MockConnectionHandle {
    state: Arc<Mutex<ConnectionState>>,
    events: mpsc::Sender<RtcEvent>,
}

impl MockConnectionHandle {
    /// Deliver a raw backend event to the server.
    pub async fn emit(&self, event: RtcEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Report a connection state change.
    pub async fn set_state(&self, state: RtcState) -> bool {
        self.emit(RtcEvent::StateChanged(state)).await
    }

    /// Open the data channel.
    pub async fn open_data_channel(&self) -> bool {
        self.state.lock().data_open = true;
        self.emit(RtcEvent::DataChannelOpen).await
    }

    /// Close the data channel.
    pub async fn close_data_channel(&self) -> bool {
        self.state.lock().data_open = false;
        self.emit(RtcEvent::DataChannelClose).await
    }

    /// Deliver a binary frame as if the client sent it on the data channel.
    pub async fn receive_data(&self, data: impl Into<Bytes>) -> bool {
        self.emit(RtcEvent::DataChannelMessage(data.into())).await
    }

    /// Offer an incoming media track. Returns the packet feed for it.
    pub async fn add_remote_track(&self, kind: MediaKind, id: &str) -> Option<mpsc::Sender<Bytes>> {
        let (tx, rx) = mpsc::channel(64);
        let track = RemoteTrack {
            kind,
            id: id.to_string(),
            packets: rx,
        };
        self.emit(RtcEvent::RemoteTrack(track)).await.then_some(tx)
    }

    /// Configuration the connection was created with.
    pub fn config(&self) -> RtcConfig {
        self.state.lock().config.clone()
    }

    /// Local tracks attached so far.
    pub fn local_tracks(&self) -> Vec<AttachedTrack> {
        self.state.lock().local_tracks.clone()
    }

    /// Whether media forwarding is paused.
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Media samples read from attached local tracks.
    pub fn samples_forwarded(&self) -> usize {
        self.state.lock().samples_forwarded
    }

    /// Number of offers created.
    pub fn offers_created(&self) -> usize {
        self.state.lock().offers
    }

    /// Remote answers applied, in order.
    pub fn remote_answers(&self) -> Vec<String> {
        self.state.lock().remote_answers.clone()
    }

    /// Remote offers applied, in order.
    pub fn remote_offers(&self) -> Vec<String> {
        self.state.lock().remote_offers.clone()
    }

    /// Remote candidates applied, in order.
    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().remote_candidates.clone()
    }

    /// Binary frames the server sent on the data channel.
    pub fn sent_data(&self) -> Vec<Bytes> {
        self.state.lock().sent.clone()
    }

    /// Forget recorded data-channel frames.
    pub fn clear_sent_data(&self) {
        self.state.lock().sent.clear();
    }

    /// Whether the server closed the connection.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
