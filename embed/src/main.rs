//! Auth probe: checks (or refreshes) the broker session once and prints the result.
//!
//! Usage: `procore-embed [status|refresh]`. Exits 0 when authenticated.

use procore_embed::AuthSessionManager;
use procore_embed::config::Config;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "procore_embed=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env();
    info!(
        "Loaded configuration: backend={}, timeout={:?}, retries={}",
        config.auth.backend_base_url, config.auth.request_timeout, config.auth.retry.max_attempts
    );

    let mode = std::env::args().nth(1).unwrap_or_else(|| "status".to_string());
    let manager = AuthSessionManager::from_config(config.auth)?;

    let authenticated = match mode.as_str() {
        "status" => manager.check_status().await,
        "refresh" => manager.refresh().await,
        other => anyhow::bail!("unknown mode `{other}`, expected `status` or `refresh`"),
    };

    let snapshot = manager.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if authenticated {
        info!("Session authenticated");
        Ok(())
    } else {
        if let Some(message) = snapshot.error_message() {
            warn!("{message}");
        }
        std::process::exit(1);
    }
}
