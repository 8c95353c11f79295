//! Raw provider rows to canonical observation records.
//!
//! Policy:
//! - a row without a timestamp, or with one that does not parse, is rejected
//! - off-grid timestamps snap to the nearest lower grid point
//! - every expected metric the row lacks becomes the absent-marker (`None`)

use chrono::{DateTime, NaiveDateTime, Utc};
use meteofetch_core::{ProviderConfig, ValidationError};

use crate::types::{Metrics, ObservationRecord, RawObservation, Resolution};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"];

/// Parse a provider timestamp. Offset-less forms are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ValidationError::InvalidTimestamp(raw.to_string()))
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    hourly_metrics: Vec<String>,
    subhourly_metrics: Vec<String>,
}

impl Normalizer {
    pub fn new(hourly_metrics: Vec<String>, subhourly_metrics: Vec<String>) -> Self {
        Self {
            hourly_metrics,
            subhourly_metrics,
        }
    }

    /// Expect exactly the variables requested from the provider.
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.hourly_variables.clone(),
            config.minutely_15_variables.clone(),
        )
    }

    pub fn expected_metrics(&self, resolution: Resolution) -> &[String] {
        match resolution {
            Resolution::Hourly => &self.hourly_metrics,
            Resolution::Subhourly => &self.subhourly_metrics,
        }
    }

    pub fn normalize(
        &self,
        resolution: Resolution,
        raw: &RawObservation,
        fetched_at: DateTime<Utc>,
    ) -> Result<ObservationRecord, ValidationError> {
        let raw_ts = raw
            .timestamp
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ValidationError::MissingTimestamp)?;

        let parsed = parse_timestamp(raw_ts)?;
        let timestamp = resolution.floor(parsed);
        if timestamp != parsed {
            tracing::debug!(
                "Snapped off-grid {} timestamp {} to {}",
                resolution,
                raw_ts,
                timestamp.to_rfc3339()
            );
        }

        let mut metrics: Metrics = raw
            .values
            .iter()
            .map(|(name, value)| (name.clone(), value.filter(|v| v.is_finite())))
            .collect();
        for name in self.expected_metrics(resolution) {
            metrics.entry(name.clone()).or_insert(None);
        }

        Ok(ObservationRecord {
            resolution,
            timestamp,
            metrics,
            fetched_at,
        })
    }
}
