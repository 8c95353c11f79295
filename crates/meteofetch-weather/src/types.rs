use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metric name to reading. `None` means the provider had no reading, which
/// is not the same as a reading of zero.
pub type Metrics = BTreeMap<String, Option<f64>>;

/// Time granularity of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Hourly,
    Subhourly,
}

impl Resolution {
    pub const ALL: [Resolution; 2] = [Resolution::Hourly, Resolution::Subhourly];

    /// Grid spacing in seconds
    pub fn step_secs(&self) -> i64 {
        match self {
            Self::Hourly => 3600,
            Self::Subhourly => 900,
        }
    }

    pub fn step(&self) -> Duration {
        Duration::seconds(self.step_secs())
    }

    /// Provider section name, also used as the store key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Subhourly => "minutely_15",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hourly" => Some(Self::Hourly),
            "minutely_15" => Some(Self::Subhourly),
            _ => None,
        }
    }

    /// Snap to the nearest grid point at or before `ts`.
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let floored = secs - secs.rem_euclid(self.step_secs());
        DateTime::from_timestamp(floored, 0).unwrap_or(ts)
    }

    /// Nearest grid point at or after `ts`.
    pub fn ceil(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let floored = self.floor(ts);
        if floored == ts {
            ts
        } else {
            floored + self.step()
        }
    }

    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        self.floor(ts) == ts
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open interval `[start, end)` of timestamps to request.
///
/// Never empty: `start < end` holds for every constructed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FetchWindow {
    resolution: Resolution,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl FetchWindow {
    /// Returns `None` when the interval would be empty.
    pub fn new(resolution: Resolution, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self {
            resolution,
            start,
            end,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// First and last grid points inside the window, if it holds any.
    pub fn grid_bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.resolution.ceil(self.start);
        let last = self.resolution.floor(self.end - Duration::seconds(1));
        (first <= last && first < self.end).then_some((first, last))
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}, {})",
            self.resolution,
            self.start.to_rfc3339(),
            self.end.to_rfc3339()
        )
    }
}

/// One row of a provider response before validation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawObservation {
    pub timestamp: Option<String>,
    pub values: Metrics,
}

/// Canonical observation. Identity is `(resolution, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub resolution: Resolution,
    /// UTC, on the resolution's grid
    pub timestamp: DateTime<Utc>,
    pub metrics: Metrics,
    /// When this row was last written
    pub fetched_at: DateTime<Utc>,
}

impl ObservationRecord {
    /// Reading for `name`, `None` when absent or never requested.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied().flatten()
    }
}

/// Weather condition categories mapped from WMO codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
}

impl WeatherCondition {
    /// Convert WMO weather code to WeatherCondition
    /// See: https://open-meteo.com/en/docs#weathervariables
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0 => Self::Clear,
            1..=2 => Self::PartlyCloudy,
            3 => Self::Cloudy,
            45 | 48 => Self::Fog,
            51 | 53 | 55 => Self::Drizzle,
            56 | 57 => Self::Sleet, // Freezing drizzle
            61 | 63 | 80 => Self::Rain,
            65 | 81 | 82 => Self::HeavyRain,
            66 | 67 => Self::Sleet, // Freezing rain
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 | 96 | 99 => Self::Thunderstorm,
            _ => Self::Clear, // Unknown codes default to clear
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::PartlyCloudy => "Partly Cloudy",
            Self::Cloudy => "Cloudy",
            Self::Fog => "Fog",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::HeavyRain => "Heavy Rain",
            Self::Snow => "Snow",
            Self::Sleet => "Sleet",
            Self::Thunderstorm => "Thunderstorm",
        }
    }

    /// Liquid precipitation (drizzle, rain, showers, thunderstorms).
    /// Snow is reported through the `snowfall` metric instead.
    pub fn is_precipitation(&self) -> bool {
        matches!(
            self,
            Self::Drizzle | Self::Rain | Self::HeavyRain | Self::Thunderstorm
        )
    }
}
