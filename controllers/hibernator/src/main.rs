//! Hibernator Controller
//!
//! Scales workloads selected by Hibernator resources down while a weekly
//! schedule is active and restores them once it ends. Alternative actions
//! delete the selected objects or scale them to configured targets.

mod action;
mod backoff;
mod config;
mod controller;
mod error;
mod expression;
mod history;
mod metrics;
mod reconciler;
mod schedule;
mod selector;
mod watcher;

#[cfg(test)]
mod test_utils;

use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ControllerConfig;
use crate::error::ControllerError;

/// Install ring as the process-wide rustls provider
///
/// Returns `false` when a provider was already installed; that one is kept.
fn install_crypto_provider() -> bool {
    match rustls::crypto::ring::default_provider().install_default() {
        Ok(()) => true,
        Err(_existing) => {
            warn!("A rustls crypto provider is already installed, keeping it");
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    install_crypto_provider();

    info!("Starting Hibernator Controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Minimum resync interval: {}s", config.min_resync_interval_seconds);
    info!("  Metrics address: {}", config.metrics_addr);
    info!(
        "  Error backoff: {}m to {}m",
        config.error_backoff_min_minutes, config.error_backoff_max_minutes
    );

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_crypto_provider_install_is_reported() {
        install_crypto_provider();
        assert!(!install_crypto_provider());
    }
}
