//! Config loading and default backend wiring.

use std::path::PathBuf;
use std::sync::Arc;

use cohost_desktop::headless::ScreenSize;
use cohost_desktop::{DiscardSink, HeadlessCapture, HeadlessDesktop};
use cohost_protocol::RtcBackend;
use tracing::info;

use crate::config::Config;
use crate::error::ServerError;
use crate::hub::Backends;
use crate::member;

/// Load configuration from the given path, or the default location.
pub fn load_config(path: Option<&str>) -> Result<Config, ServerError> {
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => default_config_path(),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ServerError::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ServerError::Config(format!("failed to parse config: {e}")))?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else if path.is_some() {
        Err(ServerError::Config(format!(
            "config file {} does not exist",
            config_path.display()
        )))
    } else {
        info!("no config file found, using defaults");
        Ok(Config::default())
    }
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("cohost")
}

fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Backends for a server without a platform desktop: an in-process
/// desktop, capture channels nothing feeds, and a sink that drops
/// client media.
pub fn headless_backends(config: &Config, rtc: Arc<dyn RtcBackend>) -> Backends {
    Backends {
        desktop: Arc::new(HeadlessDesktop::new(ScreenSize {
            width: config.desktop.screen_width,
            height: config.desktop.screen_height,
        })),
        capture: Arc::new(HeadlessCapture::new(
            config.webrtc.video_codec.clone(),
            config.webrtc.audio_codec.clone(),
        )),
        sink: Arc::new(DiscardSink),
        rtc,
        members: member::from_config(&config.member),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_missing_path_is_an_error() {
        assert!(matches!(
            load_config(Some("/nonexistent/cohost/config.toml")),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn explicit_path_is_parsed() {
        let path = std::env::temp_dir().join(format!("cohost-test-{}.toml", std::process::id()));
        std::fs::write(&path, "[server]\nport = 9123\n").unwrap();
        let config = load_config(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.server.port, 9123);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let path =
            std::env::temp_dir().join(format!("cohost-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[server\nport = ").unwrap();
        let result = load_config(path.to_str());
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
