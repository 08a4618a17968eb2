//! Server core for cohost.
//!
//! Keeps the session registry, arbitrates control of the shared desktop,
//! relays signaling between clients and their real-time peers, distributes
//! the cursor, and serves clients over WebSocket.

pub mod config;
pub mod control;
pub mod cursor;
pub mod error;
pub mod hub;
pub mod input;
pub mod member;
pub mod peer;
pub mod registry;
pub mod session;
pub mod setup;
pub mod state;
pub mod ws;

pub use config::Config;
pub use control::ControlOutcome;
pub use error::ServerError;
pub use hub::{Backends, Hub};
pub use member::{Credentials, MemberProvider};
pub use registry::{Registry, RegistryEvent};
pub use session::{Session, Transport};
