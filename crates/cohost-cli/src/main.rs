//! cohost CLI: runs the shared-desktop server.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use cohost_protocol::RtcBackend;
use cohost_server::{setup, ws, Config, Hub};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cohost",
    about = "Share one desktop with many viewers, one of them in control",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server.
    Serve {
        /// Path to configuration file.
        #[arg(short, long)]
        config: Option<String>,

        /// Override the listen port.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the effective configuration as TOML.
    Config {
        /// Path to configuration file.
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn init_tracing(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();
}

#[cfg(feature = "webrtc")]
fn rtc_backend() -> anyhow::Result<Arc<dyn RtcBackend>> {
    Ok(Arc::new(cohost_protocol::webrtc::WebRtcBackend::new()))
}

#[cfg(not(feature = "webrtc"))]
fn rtc_backend() -> anyhow::Result<Arc<dyn RtcBackend>> {
    anyhow::bail!("cohost was built without a real-time backend; enable the `webrtc` feature")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port } => {
            let mut config = setup::load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            init_tracing(&config);
            tracing::info!(
                bind = %config.server.bind,
                port = config.server.port,
                provider = ?config.member.provider,
                "starting cohost server"
            );

            let backends = setup::headless_backends(&config, rtc_backend()?);
            let hub = Hub::new(config, backends)?;
            ws::serve(hub, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
            tracing::info!("cohost server stopped");
        }
        Commands::Config { config } => {
            let config = setup::load_config(config.as_deref())?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
