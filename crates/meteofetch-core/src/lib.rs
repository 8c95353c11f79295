pub mod config;
pub mod error;

pub use config::{
    AlertConfig, ArchiveConfig, Config, ProviderConfig, ResolutionConfig, RetrySettings,
    StoreConfig, ValidationResult,
};
pub use error::{AppError, ConfigError, FetchError, StoreError, ValidationError};

use anyhow::Result;

/// Initialize tracing/logging.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` (e.g. "info") applies.
pub fn init(default_filter: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::debug!("meteofetch logging initialized");
    Ok(())
}
