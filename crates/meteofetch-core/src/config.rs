use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Longest accepted backfill horizon (ten years).
pub const MAX_BACKFILL_HOURS: u64 = 10 * 365 * 24;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote provider and the single coordinate this deployment tracks
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Local observation store
    #[serde(default)]
    pub store: StoreConfig,

    /// Hourly series
    #[serde(default = "ResolutionConfig::default_hourly")]
    pub hourly: ResolutionConfig,

    /// 15-minute series
    #[serde(default = "ResolutionConfig::default_subhourly")]
    pub subhourly: ResolutionConfig,

    /// Fetch retry policy within one cycle
    #[serde(default)]
    pub retry: RetrySettings,

    /// Threshold alerts raised on persisted records
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Raw payload archive
    #[serde(default)]
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Open-Meteo forecast endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Human-readable name of the coordinate, used in logs only
    #[serde(default = "default_location_name")]
    pub location_name: String,

    pub latitude: f64,
    pub longitude: f64,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Variables requested for the hourly series
    #[serde(default = "default_hourly_variables")]
    pub hourly_variables: Vec<String>,

    /// Variables requested for the 15-minute series
    #[serde(default = "default_minutely_15_variables")]
    pub minutely_15_variables: Vec<String>,
}

fn default_base_url() -> String {
    "https://api.open-meteo.com/v1/forecast".to_string()
}

fn default_location_name() -> String {
    "Grossglockner".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_hourly_variables() -> Vec<String> {
    [
        "temperature_2m",
        "rain",
        "snowfall",
        "wind_speed_10m",
        "weather_code",
        "wind_direction_10m",
        "uv_index",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_minutely_15_variables() -> Vec<String> {
    [
        "temperature_2m",
        "wind_speed_10m",
        "rain",
        "snowfall",
        "wind_direction_10m",
        "weather_code",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            location_name: default_location_name(),
            latitude: 47.0744,
            longitude: 12.6940,
            timeout_secs: default_timeout_secs(),
            hourly_variables: default_hourly_variables(),
            minutely_15_variables: default_minutely_15_variables(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_store_path_str")]
    pub path: String,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("data"))
        .join("meteofetch")
}

fn default_store_path_str() -> String {
    default_data_dir()
        .join("meteodata.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path_str(),
        }
    }
}

/// Cadence and bootstrap reach of one resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionConfig {
    /// Whether this series is fetched at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between two cycle starts
    pub poll_interval_secs: u64,

    /// How far back the first fetch reaches when the store has no data
    pub backfill_hours: u64,
}

fn default_enabled() -> bool {
    true
}

impl ResolutionConfig {
    pub fn default_hourly() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 3600,
            backfill_hours: 7 * 24,
        }
    }

    pub fn default_subhourly() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 900,
            backfill_hours: 24,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backfill_horizon(&self) -> Duration {
        Duration::from_secs(self.backfill_hours.saturating_mul(3600))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    /// Retries after the first attempt within one cycle
    pub max_retries: u32,
    /// Initial backoff (doubles each attempt)
    pub initial_delay_ms: u64,
    /// Upper bound for any single wait
    pub max_delay_ms: u64,
    /// Wait after a rate-limit response without Retry-After
    pub rate_limit_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            rate_limit_delay_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertConfig {
    pub enabled: bool,
    /// POST every newly raised alert as JSON to this URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Per-request timeout for the webhook in seconds
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    /// Wind speed above which an alert is raised (km/h, provider units)
    pub wind_speed_threshold: f64,
    /// Temperature at or below which an alert is raised (°C)
    pub temperature_low_threshold: f64,
}

fn default_webhook_timeout_secs() -> u64 {
    5
}

impl AlertConfig {
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout_secs(),
            wind_speed_threshold: 58.0,
            temperature_low_threshold: -10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Write every raw provider response to `dir`
    pub enabled: bool,
    #[serde(default = "default_archive_dir_str")]
    pub dir: String,
}

fn default_archive_dir_str() -> String {
    default_data_dir()
        .join("payloads")
        .to_string_lossy()
        .into_owned()
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_archive_dir_str(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            store: StoreConfig::default(),
            hourly: ResolutionConfig::default_hourly(),
            subhourly: ResolutionConfig::default_subhourly(),
            retry: RetrySettings::default(),
            alerts: AlertConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (or the default location), creating a
    /// default file if it doesn't exist
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            ConfigError::Unreadable(format!("{}: {}", config_path.display(), e))
        })?;

        let config: Config = toml::from_str(&contents).map_err(|e| {
            ConfigError::ParseError(format!("{}: {}", config_path.display(), e))
        })?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated(path: Option<&Path>) -> Result<(Self, ValidationResult)> {
        Self::load(path)?.into_validated()
    }

    /// Validate an already loaded (and possibly overridden) configuration,
    /// logging its warnings.
    pub fn into_validated(self) -> Result<(Self, ValidationResult)> {
        let validation = self.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((self, validation))
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.provider.base_url, "provider.base_url", &mut result);

        if !(-90.0..=90.0).contains(&self.provider.latitude) {
            result.add_error(
                "provider.latitude",
                format!("Latitude must be within [-90, 90], got {}", self.provider.latitude),
            );
        }
        if !(-180.0..=180.0).contains(&self.provider.longitude) {
            result.add_error(
                "provider.longitude",
                format!(
                    "Longitude must be within [-180, 180], got {}",
                    self.provider.longitude
                ),
            );
        }
        if self.provider.timeout_secs == 0 {
            result.add_error("provider.timeout_secs", "Request timeout must be greater than 0");
        }

        if self.store.path.trim().is_empty() {
            result.add_error("store.path", "Store path must not be empty");
        }

        if !self.hourly.enabled && !self.subhourly.enabled {
            result.add_error("hourly.enabled", "At least one resolution must be enabled");
        }

        Self::validate_resolution(
            &self.hourly,
            "hourly",
            &self.provider.hourly_variables,
            "provider.hourly_variables",
            &mut result,
        );
        Self::validate_resolution(
            &self.subhourly,
            "subhourly",
            &self.provider.minutely_15_variables,
            "provider.minutely_15_variables",
            &mut result,
        );

        if self.hourly.enabled
            && self.subhourly.enabled
            && self.hourly.backfill_hours < self.subhourly.backfill_hours
        {
            result.add_warning(
                "hourly.backfill_hours",
                "Hourly backfill horizon is shorter than the 15-minute one",
            );
        }

        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            result.add_warning(
                "retry.max_delay_ms",
                "Maximum retry delay is below the initial delay; every wait will be capped",
            );
        }
        if self.retry.max_retries > 10 {
            result.add_warning("retry.max_retries", "More than 10 retries per cycle");
        }

        if let Some(webhook) = &self.alerts.webhook_url {
            self.validate_url(webhook, "alerts.webhook_url", &mut result);
            if self.alerts.webhook_timeout_secs == 0 {
                result.add_error(
                    "alerts.webhook_timeout_secs",
                    "Webhook timeout must be greater than 0",
                );
            }
        }

        if self.archive.enabled && self.archive.dir.trim().is_empty() {
            result.add_error("archive.dir", "Archive directory must not be empty when enabled");
        }

        result
    }

    fn validate_resolution(
        resolution: &ResolutionConfig,
        field: &str,
        variables: &[String],
        variables_field: &str,
        result: &mut ValidationResult,
    ) {
        if !resolution.enabled {
            return;
        }
        if resolution.poll_interval_secs == 0 {
            result.add_error(
                format!("{}.poll_interval_secs", field),
                "Poll interval must be greater than 0",
            );
        }
        if resolution.backfill_hours == 0 {
            result.add_error(
                format!("{}.backfill_hours", field),
                "Backfill horizon must be greater than 0",
            );
        } else if resolution.backfill_hours > MAX_BACKFILL_HOURS {
            result.add_error(
                format!("{}.backfill_hours", field),
                format!("Backfill horizon must not exceed {} hours", MAX_BACKFILL_HOURS),
            );
        } else if resolution.backfill_hours > 92 * 24 {
            result.add_warning(
                format!("{}.backfill_hours", field),
                "Backfill horizon exceeds the provider's 92 days of past data",
            );
        }
        if variables.is_empty() {
            result.add_error(variables_field, "At least one variable must be requested");
        }
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Default path of the configuration file
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("meteofetch");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_default_cadence_is_coarser_for_hourly() {
        let config = Config::default();
        assert!(config.hourly.poll_interval() > config.subhourly.poll_interval());
        assert!(config.hourly.backfill_horizon() > config.subhourly.backfill_horizon());
        assert_eq!(config.subhourly.backfill_horizon(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_invalid_url() {
        let mut config = Config::default();
        config.provider.base_url = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "provider.base_url"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.provider.base_url = "ftp://api.open-meteo.com/v1/forecast".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_coordinates_out_of_range() {
        let mut config = Config::default();
        config.provider.latitude = 91.0;
        config.provider.longitude = -181.0;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "provider.latitude"));
        assert!(result.errors.iter().any(|e| e.field == "provider.longitude"));
    }

    #[test]
    fn test_zero_interval_is_error() {
        let mut config = Config::default();
        config.subhourly.poll_interval_secs = 0;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result
            .errors
            .iter()
            .any(|e| e.field == "subhourly.poll_interval_secs"));
    }

    #[test]
    fn test_disabled_resolution_skips_checks() {
        let mut config = Config::default();
        config.subhourly.enabled = false;
        config.subhourly.poll_interval_secs = 0;
        config.provider.minutely_15_variables.clear();
        assert!(config.validate().is_valid());
    }

    #[test]
    fn test_both_disabled_is_error() {
        let mut config = Config::default();
        config.hourly.enabled = false;
        config.subhourly.enabled = false;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.error_summary().contains("At least one resolution"));
    }

    #[test]
    fn test_short_hourly_horizon_is_warning() {
        let mut config = Config::default();
        config.hourly.backfill_hours = 6;
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "hourly.backfill_hours"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let toml = r#"
            [provider]
            latitude = 45.833
            longitude = 6.864

            [subhourly]
            poll_interval_secs = 600
            backfill_hours = 12
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.provider.latitude, 45.833);
        assert_eq!(config.provider.base_url, default_base_url());
        assert_eq!(config.hourly, ResolutionConfig::default_hourly());
        assert!(config.subhourly.enabled);
        assert_eq!(config.subhourly.poll_interval_secs, 600);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::load(Some(&path)).unwrap();
        assert!(path.exists());

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.store.path, created.store.path);
        assert_eq!(reloaded.hourly, created.hourly);
    }

    #[test]
    fn test_load_validated_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.hourly.backfill_hours = 0;
        config.save_to(&path).unwrap();

        let err = Config::load_validated(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("hourly.backfill_hours"));
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_override_is_validated() {
        let mut config = Config::default();
        config.alerts.webhook_url = Some("not a url".into());

        let err = config.into_validated().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Invalid(msg)) if msg.contains("alerts.webhook_url")
        ));
    }

    #[test]
    fn test_load_reports_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[hourly\npoll_interval_secs = ").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_huge_backfill_is_rejected_not_overflowed() {
        let mut config = Config::default();
        config.hourly.backfill_hours = u64::MAX / 1000;

        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "hourly.backfill_hours"));
        assert_eq!(
            config.hourly.backfill_horizon(),
            Duration::from_secs(u64::MAX)
        );

        config.hourly.backfill_hours = MAX_BACKFILL_HOURS;
        assert!(config.validate().is_valid());
    }

    #[test]
    fn test_webhook_url_is_validated() {
        let mut config = Config::default();
        config.alerts.webhook_url = Some("hooks.example.com/alerts".to_string());
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "alerts.webhook_url"));

        config.alerts.webhook_url = Some("https://hooks.example.com/alerts".to_string());
        assert!(config.validate().is_valid());
    }
}
