//! Threshold alerts evaluated on every persisted observation.

use chrono::{DateTime, Utc};
use meteofetch_core::AlertConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{ObservationRecord, Resolution, WeatherCondition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    WindSpeed,
    Temperature,
    Precipitation,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WindSpeed => "wind_speed",
            Self::Temperature => "temperature",
            Self::Precipitation => "precipitation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wind_speed" => Some(Self::WindSpeed),
            "temperature" => Some(Self::Temperature),
            "precipitation" => Some(Self::Precipitation),
            _ => None,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the alerting reading was already observed or is still a forecast
/// at the time it was fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOrigin {
    Historical,
    Predicted,
}

impl AlertOrigin {
    /// `Predicted` when `timestamp` lies after `fetched_at`.
    pub fn classify(timestamp: DateTime<Utc>, fetched_at: DateTime<Utc>) -> Self {
        if timestamp > fetched_at {
            Self::Predicted
        } else {
            Self::Historical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Historical => "historical",
            Self::Predicted => "predicted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "historical" => Some(Self::Historical),
            "predicted" => Some(Self::Predicted),
            _ => None,
        }
    }
}

impl fmt::Display for AlertOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity is `(resolution, timestamp, kind)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub resolution: Resolution,
    pub timestamp: DateTime<Utc>,
    pub kind: AlertKind,
    pub value: f64,
    pub message: String,
    pub origin: AlertOrigin,
}

#[derive(Debug, Clone)]
pub struct AlertRules {
    enabled: bool,
    wind_speed_threshold: f64,
    temperature_low_threshold: f64,
}

impl AlertRules {
    pub fn from_config(config: &AlertConfig) -> Self {
        Self {
            enabled: config.enabled,
            wind_speed_threshold: config.wind_speed_threshold,
            temperature_low_threshold: config.temperature_low_threshold,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::from_config(&AlertConfig::default())
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn evaluate(&self, record: &ObservationRecord) -> Vec<Alert> {
        if !self.enabled {
            return Vec::new();
        }

        let origin = AlertOrigin::classify(record.timestamp, record.fetched_at);
        let alert = |kind, value: f64, message: String| Alert {
            resolution: record.resolution,
            timestamp: record.timestamp,
            kind,
            value,
            message,
            origin,
        };
        let mut alerts = Vec::new();

        if let Some(wind) = record.metric("wind_speed_10m") {
            if wind > self.wind_speed_threshold {
                alerts.push(alert(
                    AlertKind::WindSpeed,
                    wind,
                    format!("Strong wind: {:.1} km/h", wind),
                ));
            }
        }

        if let Some(temp) = record.metric("temperature_2m") {
            if temp <= self.temperature_low_threshold {
                alerts.push(alert(
                    AlertKind::Temperature,
                    temp,
                    format!("Low temperature: {:.1} °C", temp),
                ));
            }
        }

        let rain = record.metric("rain").filter(|v| *v > 0.0);
        let snow = record.metric("snowfall").filter(|v| *v > 0.0);
        let condition = record
            .metric("weather_code")
            .map(|code| WeatherCondition::from_wmo_code(code as i32));
        let by_code = condition.is_some_and(|c| c.is_precipitation());

        if rain.is_some() || snow.is_some() || by_code {
            let value = rain.or(snow).unwrap_or(0.0);
            let message = match (rain, snow, condition) {
                (Some(r), _, _) => format!("Rain: {:.1} mm", r),
                (None, Some(s), _) => format!("Snowfall: {:.1} cm", s),
                (None, None, Some(c)) => format!("Precipitation reported: {}", c.description()),
                (None, None, None) => "Precipitation reported".to_string(),
            };
            alerts.push(alert(AlertKind::Precipitation, value, message));
        }

        alerts
    }
}
