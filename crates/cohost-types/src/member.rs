//! Member capability profile.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Capability set of a logged-in member.
///
/// Supplied by the member provider at authentication time and immutable
/// for the session until an administrator replaces it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberProfile {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub can_login: bool,
    #[serde(default)]
    pub can_connect: bool,
    #[serde(default)]
    pub can_watch: bool,
    #[serde(default)]
    pub can_host: bool,
    #[serde(default)]
    pub can_share_media: bool,
    #[serde(default)]
    pub can_access_clipboard: bool,
    #[serde(default)]
    pub sends_inactive_cursor: bool,
    #[serde(default)]
    pub can_see_inactive_cursors: bool,

    /// Opaque per-plugin settings.
    #[serde(default)]
    pub plugins: BTreeMap<String, serde_json::Value>,
}

impl MemberProfile {
    /// Full-permission administrator profile.
    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::user(name)
        }
    }

    /// Regular member: may watch, host, and share media.
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_admin: false,
            can_login: true,
            can_connect: true,
            can_watch: true,
            can_host: true,
            can_share_media: true,
            can_access_clipboard: true,
            sends_inactive_cursor: true,
            can_see_inactive_cursors: true,
            plugins: BTreeMap::new(),
        }
    }
}
