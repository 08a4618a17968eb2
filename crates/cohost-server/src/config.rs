//! Server configuration loaded from TOML.

use std::time::Duration;

use cohost_types::{IceServer, MemberProfile, Settings};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub webrtc: WebRtcConfig,
    #[serde(default)]
    pub member: MemberConfig,
    #[serde(default)]
    pub cursor: CursorConfig,
    #[serde(default)]
    pub desktop: DesktopConfig,
}

/// Listener and per-connection runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keep-alive period for every client transport.
    #[serde(default = "default_ping_period_ms")]
    pub ping_period_ms: u64,
    /// Consecutive unanswered pings before a transport is torn down.
    #[serde(default = "default_max_missed_pings")]
    pub max_missed_pings: u32,
    /// Outbound messages buffered per session before sends are dropped.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    #[serde(default = "default_inactive_cursors_period_ms")]
    pub inactive_cursors_period_ms: u64,
    /// How long a disconnected session is kept for a reconnect before it
    /// is deleted.
    #[serde(default = "default_reconnect_grace_ms")]
    pub reconnect_grace_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            ping_period_ms: default_ping_period_ms(),
            max_missed_pings: default_max_missed_pings(),
            outbound_queue: default_outbound_queue(),
            inactive_cursors_period_ms: default_inactive_cursors_period_ms(),
            reconnect_grace_ms: default_reconnect_grace_ms(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms.max(1))
    }

    pub fn inactive_cursors_period(&self) -> Duration {
        Duration::from_millis(self.inactive_cursors_period_ms.max(1))
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }
}

/// Initial room policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub locked_controls: bool,
    #[serde(default)]
    pub control_protection: bool,
    #[serde(default = "default_true")]
    pub implicit_hosting: bool,
    #[serde(default)]
    pub inactive_cursors: bool,
    #[serde(default)]
    pub merciful_reconnect: bool,
    #[serde(default)]
    pub private_mode: bool,
    #[serde(default)]
    pub locked_logins: bool,
    /// Codes below this are mouse buttons, the rest keyboard keys.
    #[serde(default = "default_button_threshold")]
    pub button_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            locked_controls: false,
            control_protection: false,
            implicit_hosting: true,
            inactive_cursors: false,
            merciful_reconnect: false,
            private_mode: false,
            locked_logins: false,
            button_threshold: default_button_threshold(),
        }
    }
}

impl SessionConfig {
    /// Settings the room starts with. Control protection starts locked.
    pub fn initial_settings(&self) -> Settings {
        Settings {
            locked_controls: self.locked_controls || self.control_protection,
            control_protection: self.control_protection,
            implicit_hosting: self.implicit_hosting,
            inactive_cursors: self.inactive_cursors,
            merciful_reconnect: self.merciful_reconnect,
            private_mode: self.private_mode,
            locked_logins: self.locked_logins,
            ..Settings::default()
        }
    }
}

/// Real-time connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcConfig {
    #[serde(default)]
    pub ice_lite: bool,
    #[serde(default = "default_true")]
    pub ice_trickle: bool,
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,
    /// Public addresses advertised as host candidates.
    #[serde(default)]
    pub nat1to1: Vec<String>,
    /// Ephemeral UDP port range, `"min-max"`.
    #[serde(default)]
    pub epr: Option<String>,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_lite: false,
            ice_trickle: true,
            ice_servers: default_ice_servers(),
            nat1to1: Vec::new(),
            epr: None,
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
        }
    }
}

impl WebRtcConfig {
    /// Parse `epr` into an inclusive port range.
    pub fn port_range(&self) -> Result<Option<(u16, u16)>, ServerError> {
        let Some(epr) = self.epr.as_deref() else {
            return Ok(None);
        };
        let (min, max) = epr
            .split_once('-')
            .ok_or_else(|| ServerError::Config(format!("invalid port range {epr:?}")))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<u16>()
                .map_err(|e| ServerError::Config(format!("invalid port in range {epr:?}: {e}")))
        };
        let (min, max) = (parse(min)?, parse(max)?);
        if min > max {
            return Err(ServerError::Config(format!(
                "port range {epr:?} is reversed"
            )));
        }
        Ok(Some((min, max)))
    }
}

/// Which member provider authenticates logins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Multiuser,
    Noauth,
    Static,
}

/// A user of the static provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub profile: MemberProfile,
}

/// Member provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    #[serde(default = "default_user_password")]
    pub user_password: String,
    #[serde(default)]
    pub users: Vec<StaticUser>,
}

impl Default for MemberConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            admin_password: default_admin_password(),
            user_password: default_user_password(),
            users: Vec::new(),
        }
    }
}

/// Cursor image cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    /// Serials above this are never cached.
    #[serde(default = "default_max_serial")]
    pub max_serial: u64,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            max_serial: default_max_serial(),
        }
    }
}

/// Built-in headless desktop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopConfig {
    #[serde(default = "default_screen_width")]
    pub screen_width: u16,
    #[serde(default = "default_screen_height")]
    pub screen_height: u16,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            screen_width: default_screen_width(),
            screen_height: default_screen_height(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_ping_period_ms() -> u64 {
    10_000
}

fn default_max_missed_pings() -> u32 {
    3
}

fn default_outbound_queue() -> usize {
    128
}

fn default_inactive_cursors_period_ms() -> u64 {
    750
}

fn default_reconnect_grace_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_button_threshold() -> u32 {
    8
}

fn default_ice_servers() -> Vec<IceServer> {
    vec![IceServer {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        ..IceServer::default()
    }]
}

fn default_video_codec() -> String {
    "video/VP8".to_string()
}

fn default_audio_codec() -> String {
    "audio/opus".to_string()
}

fn default_admin_password() -> String {
    "admin".to_string()
}

fn default_user_password() -> String {
    "neighbor".to_string()
}

fn default_max_serial() -> u64 {
    200
}

fn default_screen_width() -> u16 {
    1280
}

fn default_screen_height() -> u16 {
    720
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("port = 8080"));
        assert!(toml_str.contains("button_threshold = 8"));
    }

    #[test]
    fn parse_example_config() {
        let toml_str = r#"
[server]
port = 9000
ping_period_ms = 5000

[session]
control_protection = true
implicit_hosting = false
locked_logins = true

[webrtc]
ice_trickle = false
epr = "59000-59100"

[[webrtc.ice_servers]]
urls = ["turn:turn.example.com:3478"]
username = "neko"
credential = "secret"

[member]
provider = "static"

[[member.users]]
username = "alice"
password = "wonderland"

[member.users.profile]
name = "Alice"
is_admin = true
can_host = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.max_missed_pings, 3);
        assert!(!config.webrtc.ice_trickle);
        assert_eq!(config.webrtc.port_range().unwrap(), Some((59000, 59100)));
        assert_eq!(config.webrtc.ice_servers[0].username.as_deref(), Some("neko"));
        assert_eq!(config.member.provider, ProviderKind::Static);
        assert!(config.member.users[0].profile.is_admin);
        assert!(!config.member.users[0].profile.can_watch);

        let settings = config.session.initial_settings();
        assert!(settings.control_protection);
        assert!(settings.locked_controls);
        assert!(!settings.implicit_hosting);
        assert!(settings.locked_logins);
        assert!(!settings.private_mode);
        assert_eq!(config.server.reconnect_grace(), Duration::from_secs(5));
    }

    #[test]
    fn bad_port_range_is_a_config_error() {
        let webrtc = WebRtcConfig {
            epr: Some("9-1".into()),
            ..WebRtcConfig::default()
        };
        assert!(matches!(webrtc.port_range(), Err(ServerError::Config(_))));

        let webrtc = WebRtcConfig {
            epr: Some("abc".into()),
            ..WebRtcConfig::default()
        };
        assert!(webrtc.port_range().is_err());
    }
}
