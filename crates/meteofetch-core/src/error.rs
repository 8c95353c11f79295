//! Centralized error types for meteofetch.
//!
//! This module provides the typed error hierarchy shared by every crate:
//! - `FetchError` for provider requests (all kinds are retryable)
//! - `ValidationError` for a single raw record that cannot be normalized
//! - `StoreError` for the local observation store
//! - `ConfigError` for loading and validating the configuration file
//!
//! Use `user_message()` to get an operator-facing summary.

use std::time::Duration;

use thiserror::Error;

/// Top-level application error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Returns a short, actionable message for the operator.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Fetch(e) => e.user_message(),
            AppError::Store(e) => e.user_message(),
            AppError::Config(e) => e.user_message(),
            AppError::Io(_) => "A file operation failed. Check permissions and disk space.",
            AppError::Other(_) => "An unexpected error occurred.",
        }
    }
}

/// Failures of a single provider request.
///
/// None of these is fatal to the process; the cycle controller retries them
/// with backoff and the next scheduled tick refetches the same window.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Transport failure or timeout.
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx status or a payload that could not be decoded.
    #[error("Provider error{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Provider { status: Option<u16>, message: String },

    /// Explicit rate-limit signal (HTTP 429).
    #[error("Rate limited by provider{}", .retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Provider {
            status,
            message: message.into(),
        }
    }

    /// Provider-specified wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "Unable to reach the weather provider. Check connectivity.",
            FetchError::Provider {
                status: Some(status),
                ..
            } if *status >= 500 => "The weather provider is experiencing issues.",
            FetchError::Provider { .. } => "The weather provider rejected the request.",
            FetchError::RateLimited { .. } => "The weather provider is rate limiting requests.",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::provider(None, format!("malformed payload: {}", e));
        }
        if let Some(status) = e.status() {
            return Self::provider(Some(status.as_u16()), e.to_string());
        }
        Self::Network(e.to_string())
    }
}

/// A raw record that cannot become an observation record.
///
/// Recovered per record: the record is skipped and counted, the batch goes on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("record has no timestamp")]
    MissingTimestamp,

    #[error("unparseable timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Local store failures. Fatal to the cycle, never to the continuous process.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// The blocking task running the store call was cancelled.
    #[error("Store task did not complete: {0}")]
    Interrupted(String),
}

impl StoreError {
    pub fn user_message(&self) -> &'static str {
        match self {
            StoreError::Sqlite(_) => "A local database operation failed.",
            StoreError::Io(_) => "Unable to access the local database file.",
            StoreError::Serialization(_) => "Failed to encode or decode stored metrics.",
            StoreError::Corruption(_) => {
                "Local data may be corrupted. Consider moving the database aside."
            }
            StoreError::Interrupted(_) => "A database operation was interrupted by shutdown.",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read configuration file {0}")]
    Unreadable(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Unreadable(_) => {
                "Configuration file cannot be read. Check its permissions."
            }
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
        }
    }
}
