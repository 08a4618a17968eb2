//! Signaling messages exchanged with clients over the WebSocket transport.
//!
//! Every message is a JSON object whose `event` field names the message
//! and whose remaining fields are the payload:
//! `{ "event": "signal/answer", "sdp": "..." }`.

use serde::{Deserialize, Serialize};

use crate::cursor::CursorPosition;
use crate::member::MemberProfile;
use crate::session::{SessionId, SessionState};
use crate::settings::Settings;
use crate::signal::{IceCandidate, IceServer};

/// Current holder of control, as seen by clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlHost {
    pub has_host: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<SessionId>,
}

impl ControlHost {
    pub fn new(host_id: Option<SessionId>) -> Self {
        Self {
            has_host: host_id.is_some(),
            host_id,
        }
    }
}

/// Target of an admin `control/give`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlTarget {
    pub target_id: SessionId,
}

/// Public view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub profile: MemberProfile,
    pub state: SessionState,
}

/// Recent pointer positions of one session that is not in control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCursors {
    pub id: SessionId,
    pub cursors: Vec<CursorPosition>,
}

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientMessage {
    /// Ask the server to (re)create the real-time peer.
    #[serde(rename = "signal/request")]
    SignalRequest,
    /// Client-initiated renegotiation.
    #[serde(rename = "signal/offer")]
    SignalOffer { sdp: String },
    #[serde(rename = "signal/answer")]
    SignalAnswer { sdp: String },
    #[serde(rename = "signal/candidate")]
    SignalCandidate(IceCandidate),

    #[serde(rename = "control/request")]
    ControlRequest,
    #[serde(rename = "control/release")]
    ControlRelease,
    #[serde(rename = "control/take")]
    ControlTake,
    #[serde(rename = "control/give")]
    ControlGive(ControlTarget),
    #[serde(rename = "control/reset")]
    ControlReset,
    #[serde(rename = "control/lock")]
    ControlLock,
    #[serde(rename = "control/unlock")]
    ControlUnlock,

    /// Admin replaces the room settings.
    #[serde(rename = "system/settings")]
    SystemSettings(Settings),
    #[serde(rename = "system/heartbeat")]
    Heartbeat,
}

impl ClientMessage {
    /// Wire name of the message.
    #[must_use]
    pub fn event(&self) -> &'static str {
        match self {
            Self::SignalRequest => "signal/request",
            Self::SignalOffer { .. } => "signal/offer",
            Self::SignalAnswer { .. } => "signal/answer",
            Self::SignalCandidate(_) => "signal/candidate",
            Self::ControlRequest => "control/request",
            Self::ControlRelease => "control/release",
            Self::ControlTake => "control/take",
            Self::ControlGive(_) => "control/give",
            Self::ControlReset => "control/reset",
            Self::ControlLock => "control/lock",
            Self::ControlUnlock => "control/unlock",
            Self::SystemSettings(_) => "system/settings",
            Self::Heartbeat => "system/heartbeat",
        }
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerMessage {
    /// Full room state, sent once when a transport attaches.
    #[serde(rename = "system/init")]
    SystemInit {
        session_id: SessionId,
        control_host: ControlHost,
        sessions: Vec<SessionSummary>,
        settings: Settings,
    },
    /// Admin-only room status.
    #[serde(rename = "system/admin")]
    SystemAdmin {
        broadcast_active: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        broadcast_url: Option<String>,
    },
    #[serde(rename = "system/settings")]
    SystemSettings(Settings),
    #[serde(rename = "system/disconnect")]
    SystemDisconnect { message: String },
    #[serde(rename = "system/heartbeat")]
    Heartbeat,

    /// Server offer for a freshly created peer.
    #[serde(rename = "signal/provide")]
    SignalProvide {
        id: SessionId,
        sdp: String,
        ice_lite: bool,
        ice_servers: Vec<IceServer>,
    },
    #[serde(rename = "signal/offer")]
    SignalOffer { sdp: String },
    #[serde(rename = "signal/answer")]
    SignalAnswer { sdp: String },
    #[serde(rename = "signal/candidate")]
    SignalCandidate(IceCandidate),
    #[serde(rename = "signal/close")]
    SignalClose,

    /// Host changed (broadcast) or current host (reply to a request).
    #[serde(rename = "control/host")]
    ControlHost(ControlHost),
    /// A control request was refused by policy.
    #[serde(rename = "control/locked")]
    ControlLocked {
        has_host: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_id: Option<SessionId>,
        reason: String,
    },
    /// Sent to the host: another session wants control.
    #[serde(rename = "control/requesting")]
    ControlRequesting { id: SessionId },

    #[serde(rename = "member/connected")]
    MemberConnected(SessionSummary),
    #[serde(rename = "member/disconnected")]
    MemberDisconnected(SessionSummary),

    #[serde(rename = "session/created")]
    SessionCreated(SessionSummary),
    #[serde(rename = "session/deleted")]
    SessionDeleted { id: SessionId },
    #[serde(rename = "session/profile")]
    SessionProfile {
        id: SessionId,
        profile: MemberProfile,
    },
    #[serde(rename = "session/state")]
    SessionStateChanged { id: SessionId, state: SessionState },
    #[serde(rename = "session/cursors")]
    SessionCursors { cursors: Vec<SessionCursors> },
}

impl ServerMessage {
    /// Wire name of the message.
    #[must_use]
    pub fn event(&self) -> &'static str {
        match self {
            Self::SystemInit { .. } => "system/init",
            Self::SystemAdmin { .. } => "system/admin",
            Self::SystemSettings(_) => "system/settings",
            Self::SystemDisconnect { .. } => "system/disconnect",
            Self::Heartbeat => "system/heartbeat",
            Self::SignalProvide { .. } => "signal/provide",
            Self::SignalOffer { .. } => "signal/offer",
            Self::SignalAnswer { .. } => "signal/answer",
            Self::SignalCandidate(_) => "signal/candidate",
            Self::SignalClose => "signal/close",
            Self::ControlHost(_) => "control/host",
            Self::ControlLocked { .. } => "control/locked",
            Self::ControlRequesting { .. } => "control/requesting",
            Self::MemberConnected(_) => "member/connected",
            Self::MemberDisconnected(_) => "member/disconnected",
            Self::SessionCreated(_) => "session/created",
            Self::SessionDeleted { .. } => "session/deleted",
            Self::SessionProfile { .. } => "session/profile",
            Self::SessionStateChanged { .. } => "session/state",
            Self::SessionCursors { .. } => "session/cursors",
        }
    }
}
