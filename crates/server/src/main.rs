//! stitch coordinator binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use stitch_core::config::AppConfig;
use stitch_server::{AppState, create_router};
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// stitch - chunked upload coordinator
#[derive(Parser, Debug)]
#[command(name = "stitchd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "STITCH_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from an optional TOML file overlaid with `STITCH_`
/// environment variables.
fn load_config(config_path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    let has_config_file = Path::new(config_path).exists();

    if has_config_file {
        tracing::info!(config_path = %config_path, "Loading configuration from file");
        figment = figment.merge(Toml::file(config_path));
    } else {
        tracing::debug!("No config file found at {}", config_path);
    }

    // STITCH_CONFIG only names the file.
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("STITCH_") && key != "STITCH_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: stitchd --config /path/to/config.toml\n  \
             2. Environment variables: STITCH_SERVER__BIND=0.0.0.0:8080 \
             STITCH_TARGET__PATH=/srv/uploads stitchd\n\n\
             See config/server.example.toml for example configuration.\n\
             Set STITCH_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("STITCH_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("stitch v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    stitch_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let targets = stitch_storage::target_from_config(&config.target)
        .await
        .context("failed to initialize target store")?;
    targets
        .health_check()
        .await
        .context("target store health check failed")?;
    tracing::info!(backend = targets.backend_name(), "Target store initialized");

    let metadata = stitch_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let signer = match &config.object_store {
        Some(object_store) => {
            let signer = stitch_storage::signer_from_config(object_store)
                .await
                .context("failed to initialize object store signer")?;
            // Clients talk to the object store directly, so an unreachable
            // bucket here does not stop the coordinator from serving.
            if let Err(e) = signer.health_check().await {
                tracing::warn!(error = %e, "Object store health check failed");
            }
            tracing::info!(backend = signer.backend_name(), "Delegated writes enabled");
            Some(signer)
        }
        None => {
            tracing::warn!("No object store configured, /get-signed-url will return 503");
            None
        }
    };

    let state = AppState::new(config.clone(), metadata, targets, signer);
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
