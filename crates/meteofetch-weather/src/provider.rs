//! Open-Meteo forecast API client.
//!
//! One request per fetch window. The provider answers in columns (`time` plus
//! one array per variable); rows are rebuilt here and handed to the
//! normalizer untouched otherwise.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use meteofetch_core::{FetchError, ProviderConfig};
use reqwest::Client;
use serde_json::Value;
use tracing::instrument;

use crate::archive::PayloadArchive;
use crate::normalize::parse_timestamp;
use crate::types::{FetchWindow, RawObservation, Resolution};

const USER_AGENT: &str = concat!("meteofetch/", env!("CARGO_PKG_VERSION"));
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Source of raw observations for a time window.
pub trait FetchClient: Send + Sync {
    /// Raw records inside `window`, ascending by timestamp. An empty batch is
    /// a valid answer.
    fn fetch(
        &self,
        window: &FetchWindow,
    ) -> impl Future<Output = Result<Vec<RawObservation>, FetchError>> + Send;
}

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: Arc<Client>,
    base_url: String,
    latitude: f64,
    longitude: f64,
    hourly_variables: Vec<String>,
    minutely_15_variables: Vec<String>,
    archive: Option<PayloadArchive>,
}

impl OpenMeteoClient {
    pub fn new(
        config: &ProviderConfig,
        archive: Option<PayloadArchive>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: config.base_url.clone(),
            latitude: config.latitude,
            longitude: config.longitude,
            hourly_variables: config.hourly_variables.clone(),
            minutely_15_variables: config.minutely_15_variables.clone(),
            archive,
        })
    }

    fn variables(&self, resolution: Resolution) -> &[String] {
        match resolution {
            Resolution::Hourly => &self.hourly_variables,
            Resolution::Subhourly => &self.minutely_15_variables,
        }
    }
}

/// Query keys bounding the requested range. Both bounds are inclusive.
fn range_params(resolution: Resolution) -> (&'static str, &'static str) {
    match resolution {
        Resolution::Hourly => ("start_hour", "end_hour"),
        Resolution::Subhourly => ("start_minutely_15", "end_minutely_15"),
    }
}

impl FetchClient for OpenMeteoClient {
    #[instrument(skip(self, window), fields(window = %window), level = "debug")]
    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<RawObservation>, FetchError> {
        let resolution = window.resolution();
        let Some((first, last)) = window.grid_bounds() else {
            tracing::debug!("No {} grid point in {}, nothing to request", resolution, window);
            return Ok(Vec::new());
        };

        let (start_key, end_key) = range_params(resolution);
        let query = [
            ("latitude", self.latitude.to_string()),
            ("longitude", self.longitude.to_string()),
            ("timezone", "UTC".to_string()),
            (resolution.as_str(), self.variables(resolution).join(",")),
            (start_key, first.format(TIME_FORMAT).to_string()),
            (end_key, last.format(TIME_FORMAT).to_string()),
        ];

        tracing::debug!("Requesting {} from {}", window, self.base_url);
        let response = self.client.get(&self.base_url).query(&query).send().await?;
        let payload = handle_response(response).await?;

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.save(resolution, &payload, Utc::now()) {
                tracing::warn!("Failed to archive {} payload: {}", resolution, e);
            }
        }

        let records = rows_in_window(&payload, window)?;
        tracing::debug!("Provider returned {} {} rows", records.len(), resolution);
        Ok(records)
    }
}

async fn handle_response(response: reqwest::Response) -> Result<Value, FetchError> {
    let status = response.status();

    if status.is_success() {
        response
            .json()
            .await
            .map_err(|e| FetchError::provider(None, format!("malformed payload: {}", e)))
    } else if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_secs);
        Err(FetchError::RateLimited { retry_after })
    } else {
        let text = response.text().await.unwrap_or_default();
        // Open-Meteo reports errors as {"error": true, "reason": "..."}
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("reason").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(text);
        Err(FetchError::provider(Some(status.as_u16()), message))
    }
}

/// Transpose the resolution's column section into rows, keep the ones inside
/// the window and order them by time.
///
/// Rows whose timestamp does not parse are kept so the normalizer can reject
/// and count them.
fn rows_in_window(
    payload: &Value,
    window: &FetchWindow,
) -> Result<Vec<RawObservation>, FetchError> {
    let section_name = window.resolution().as_str();
    let section = payload
        .get(section_name)
        .and_then(Value::as_object)
        .ok_or_else(|| {
            FetchError::provider(None, format!("response has no `{}` section", section_name))
        })?;
    let times = section
        .get("time")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            FetchError::provider(None, format!("`{}` section has no time column", section_name))
        })?;

    let columns: Vec<(&String, &Vec<Value>)> = section
        .iter()
        .filter(|(name, _)| name.as_str() != "time")
        .filter_map(|(name, column)| column.as_array().map(|values| (name, values)))
        .collect();

    let mut rows: Vec<(Option<DateTime<Utc>>, RawObservation)> = times
        .iter()
        .enumerate()
        .map(|(i, time)| {
            let timestamp = time.as_str().map(str::to_string);
            let values = columns
                .iter()
                .map(|(name, column)| ((*name).clone(), column.get(i).and_then(Value::as_f64)))
                .collect();
            let parsed = timestamp.as_deref().and_then(|s| parse_timestamp(s).ok());
            (parsed, RawObservation { timestamp, values })
        })
        .filter(|(parsed, _)| parsed.map_or(true, |ts| window.contains(ts)))
        .collect();

    rows.sort_by_key(|(parsed, _)| *parsed);
    Ok(rows.into_iter().map(|(_, row)| row).collect())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn window(resolution: Resolution, from_h: u32, to_h: u32) -> FetchWindow {
        FetchWindow::new(
            resolution,
            Utc.with_ymd_and_hms(2024, 3, 10, from_h, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, to_h, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_rows_are_transposed() {
        let payload = json!({
            "hourly": {
                "time": ["2024-03-10T09:00", "2024-03-10T10:00"],
                "temperature_2m": [1.5, 2.0],
                "rain": [0.0, null]
            }
        });

        let rows = rows_in_window(&payload, &window(Resolution::Hourly, 9, 11)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp.as_deref(), Some("2024-03-10T09:00"));
        assert_eq!(rows[0].values.get("temperature_2m"), Some(&Some(1.5)));
        assert_eq!(rows[1].values.get("rain"), Some(&None));
    }

    #[test]
    fn test_short_columns_yield_absent_values() {
        let payload = json!({
            "hourly": {
                "time": ["2024-03-10T09:00", "2024-03-10T10:00"],
                "uv_index": [3.0]
            }
        });

        let rows = rows_in_window(&payload, &window(Resolution::Hourly, 9, 11)).unwrap();
        assert_eq!(rows[1].values.get("uv_index"), Some(&None));
    }

    #[test]
    fn test_rows_outside_window_are_dropped_and_sorted() {
        let payload = json!({
            "hourly": {
                "time": [
                    "2024-03-10T11:00",
                    "2024-03-10T10:00",
                    "2024-03-10T08:00",
                    "2024-03-10T09:00"
                ],
                "rain": [4.0, 3.0, 1.0, 2.0]
            }
        });

        let rows = rows_in_window(&payload, &window(Resolution::Hourly, 9, 11)).unwrap();
        let times: Vec<_> = rows.iter().map(|r| r.timestamp.clone().unwrap()).collect();
        assert_eq!(times, vec!["2024-03-10T09:00", "2024-03-10T10:00"]);
    }

    #[test]
    fn test_unparseable_timestamps_pass_through() {
        let payload = json!({
            "minutely_15": {
                "time": ["2024-03-10T09:00", "garbage", null],
                "rain": [0.0, 0.1, 0.2]
            }
        });

        let rows = rows_in_window(&payload, &window(Resolution::Subhourly, 9, 10)).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().any(|r| r.timestamp.is_none()));
        assert!(rows.iter().any(|r| r.timestamp.as_deref() == Some("garbage")));
    }

    #[test]
    fn test_missing_section_is_provider_error() {
        let payload = json!({"hourly": {"time": []}});
        let err = rows_in_window(&payload, &window(Resolution::Subhourly, 9, 10)).unwrap_err();
        assert!(matches!(err, FetchError::Provider { status: None, .. }));

        let payload = json!({"hourly": {"rain": [1.0]}});
        let err = rows_in_window(&payload, &window(Resolution::Hourly, 9, 10)).unwrap_err();
        assert!(err.to_string().contains("time column"));
    }

    #[test]
    fn test_range_params_follow_resolution() {
        assert_eq!(range_params(Resolution::Hourly), ("start_hour", "end_hour"));
        assert_eq!(
            range_params(Resolution::Subhourly),
            ("start_minutely_15", "end_minutely_15")
        );
    }
}
