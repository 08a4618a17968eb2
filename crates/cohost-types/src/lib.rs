//! Shared types for cohost.
//!
//! This crate contains all types shared across the cohost workspace:
//! session identity, member profiles, session state, room settings,
//! cursor data, decoded input intents, and the JSON signaling messages
//! exchanged with clients.

pub mod cursor;
pub mod intent;
pub mod media;
pub mod member;
pub mod message;
pub mod session;
pub mod settings;
pub mod signal;

pub use cursor::{CursorImage, CursorPosition};
pub use intent::InputIntent;
pub use media::{MediaKind, MediaSample};
pub use member::MemberProfile;
pub use message::{
    ClientMessage, ControlHost, ControlTarget, SessionCursors, SessionSummary, ServerMessage,
};
pub use session::{unix_millis, SessionId, SessionState};
pub use settings::Settings;
pub use signal::{IceCandidate, IceServer};
