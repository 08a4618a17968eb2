//! Room-wide runtime settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Settings shared by every session in the room.
///
/// Initialised from configuration and changed at runtime by admins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Only admins may request control.
    #[serde(default)]
    pub locked_controls: bool,
    /// Non-admins may request control only while an admin is connected.
    #[serde(default)]
    pub control_protection: bool,
    /// Any session allowed to host may send input without holding control.
    #[serde(default)]
    pub implicit_hosting: bool,
    /// Broadcast cursor positions of sessions that are not in control.
    #[serde(default)]
    pub inactive_cursors: bool,
    /// A new login replaces an existing connection instead of being refused.
    #[serde(default)]
    pub merciful_reconnect: bool,
    /// Non-admins may neither watch nor control; their media is paused.
    #[serde(default)]
    pub private_mode: bool,
    /// Only admins may log in.
    #[serde(default)]
    pub locked_logins: bool,

    #[serde(default)]
    pub plugins: BTreeMap<String, serde_json::Value>,
}
