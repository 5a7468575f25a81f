/// Core data types for the air quality reporting service.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O and no network access, only types and the small
/// accessors that keep them convenient to work with.
///
/// Conventions used throughout the crate:
///   - Timestamps are hour-aligned `NaiveDateTime`s in the location's local
///     time zone (China Standard Time for every registered location).
///   - Concentrations are µg/m³ for every pollutant except CO, which is
///     reported in mg/m³.
///   - A missing observation is `None`. Zero is never used as "missing".

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Pollutants
// ---------------------------------------------------------------------------

/// The six criteria pollutants that make up the national AQI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Pollutant {
    Pm25,
    Pm10,
    So2,
    No2,
    O3,
    Co,
}

impl Pollutant {
    /// Canonical order. Ties in primary-pollutant attribution are reported
    /// in this order.
    pub const ALL: [Pollutant; 6] = [
        Pollutant::Pm25,
        Pollutant::Pm10,
        Pollutant::So2,
        Pollutant::No2,
        Pollutant::O3,
        Pollutant::Co,
    ];

    /// Display code, e.g. `"PM2.5"`.
    pub fn code(&self) -> &'static str {
        match self {
            Pollutant::Pm25 => "PM2.5",
            Pollutant::Pm10 => "PM10",
            Pollutant::So2 => "SO2",
            Pollutant::No2 => "NO2",
            Pollutant::O3 => "O3",
            Pollutant::Co => "CO",
        }
    }

    /// Parses the spellings used by upstream feeds (`PM2.5`, `PM25`, `PM2_5`)
    /// case-insensitively.
    pub fn from_code(code: &str) -> Option<Pollutant> {
        match code.trim().to_ascii_uppercase().as_str() {
            "PM2.5" | "PM25" | "PM2_5" => Some(Pollutant::Pm25),
            "PM10" => Some(Pollutant::Pm10),
            "SO2" => Some(Pollutant::So2),
            "NO2" => Some(Pollutant::No2),
            "O3" => Some(Pollutant::O3),
            "CO" => Some(Pollutant::Co),
            _ => None,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Pollutant::Co => "mg/m3",
            _ => "µg/m3",
        }
    }
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

/// A monitoring location. Station codes and city codes live in disjoint
/// namespaces; the enum keeps `Station("320100")` and `City("320100")`
/// from ever comparing equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "lowercase")]
pub enum LocationId {
    Station(String),
    City(String),
}

impl LocationId {
    pub fn station(code: &str) -> Self {
        LocationId::Station(code.to_string())
    }

    pub fn city(code: &str) -> Self {
        LocationId::City(code.to_string())
    }

    pub fn code(&self) -> &str {
        match self {
            LocationId::Station(code) | LocationId::City(code) => code,
        }
    }

    pub fn is_station(&self) -> bool {
        matches!(self, LocationId::Station(_))
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationId::Station(code) => write!(f, "station:{}", code),
            LocationId::City(code) => write!(f, "city:{}", code),
        }
    }
}

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// One pollutant observation for one location at one hour, as produced by a
/// source adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub location: LocationId,
    pub timestamp: NaiveDateTime,
    pub pollutant: Pollutant,
    /// Positive concentration, or `None` when the upstream value was absent,
    /// non-numeric or non-positive.
    pub value: Option<f64>,
}

impl Reading {
    pub fn new(
        location: LocationId,
        timestamp: NaiveDateTime,
        pollutant: Pollutant,
        value: Option<f64>,
    ) -> Self {
        Self { location, timestamp, pollutant, value }
    }
}

/// Concentrations of all six pollutants at one point (an hour, or a daily
/// mean). Each field is independently optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PollutantValues {
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub so2: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub co: Option<f64>,
}

impl PollutantValues {
    pub fn get(&self, pollutant: Pollutant) -> Option<f64> {
        match pollutant {
            Pollutant::Pm25 => self.pm25,
            Pollutant::Pm10 => self.pm10,
            Pollutant::So2 => self.so2,
            Pollutant::No2 => self.no2,
            Pollutant::O3 => self.o3,
            Pollutant::Co => self.co,
        }
    }

    pub fn set(&mut self, pollutant: Pollutant, value: Option<f64>) {
        let slot = match pollutant {
            Pollutant::Pm25 => &mut self.pm25,
            Pollutant::Pm10 => &mut self.pm10,
            Pollutant::So2 => &mut self.so2,
            Pollutant::No2 => &mut self.no2,
            Pollutant::O3 => &mut self.o3,
            Pollutant::Co => &mut self.co,
        };
        *slot = value;
    }

    /// Iterates `(pollutant, value)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Pollutant, Option<f64>)> + '_ {
        Pollutant::ALL.iter().map(move |&p| (p, self.get(p)))
    }

    /// `true` when every pollutant is missing.
    pub fn is_empty(&self) -> bool {
        self.iter().all(|(_, v)| v.is_none())
    }
}

// ---------------------------------------------------------------------------
// Time series types
// ---------------------------------------------------------------------------

/// One row of an aligned time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyRecord {
    pub timestamp: NaiveDateTime,
    pub values: PollutantValues,
    /// Trailing 8-hour O3 mean, filled in by `analysis::rolling`.
    pub o3_8h: Option<f64>,
}

impl HourlyRecord {
    pub fn empty(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            values: PollutantValues::default(),
            o3_8h: None,
        }
    }
}

/// Hourly series for one location over `[start, end)`, one record per hour
/// with no gaps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    pub location: LocationId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub records: Vec<HourlyRecord>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record for an exact hour, if it falls inside the window.
    pub fn at(&self, timestamp: NaiveDateTime) -> Option<&HourlyRecord> {
        self.records.iter().find(|r| r.timestamp == timestamp)
    }

    /// Latest hour at which `pollutant` was observed.
    pub fn latest_observed(&self, pollutant: Pollutant) -> Option<NaiveDateTime> {
        self.records
            .iter()
            .rev()
            .find(|r| r.values.get(pollutant).is_some())
            .map(|r| r.timestamp)
    }

    /// Number of hours with at least one observed pollutant.
    pub fn observed_hours(&self) -> usize {
        self.records.iter().filter(|r| !r.values.is_empty()).count()
    }
}

/// One day's summary for one location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAggregate {
    pub location: LocationId,
    pub date: NaiveDate,
    /// Arithmetic mean of each pollutant over the day's observed hours.
    pub means: PollutantValues,
    /// Maximum daily 8-hour average ozone.
    pub mda8: Option<f64>,
}

impl DailyAggregate {
    pub fn missing(location: LocationId, date: NaiveDate) -> Self {
        Self {
            location,
            date,
            means: PollutantValues::default(),
            mda8: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AQI types
// ---------------------------------------------------------------------------

/// Averaging window an AQI is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AveragingWindow {
    /// Realtime (1-hour) AQI.
    Hourly,
    /// Daily (24-hour) AQI; ozone uses MDA8.
    Daily,
}

/// AQI category, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AqiCategory {
    Excellent,
    Good,
    LightlyPolluted,
    ModeratelyPolluted,
    HeavilyPolluted,
    SeverelyPolluted,
}

impl AqiCategory {
    /// Category for an overall index:
    /// [0,50] excellent, (50,100] good, (100,150] lightly polluted,
    /// (150,200] moderately polluted, (200,300] heavily polluted,
    /// above 300 severely polluted.
    pub fn from_index(index: u32) -> Self {
        match index {
            0..=50 => AqiCategory::Excellent,
            51..=100 => AqiCategory::Good,
            101..=150 => AqiCategory::LightlyPolluted,
            151..=200 => AqiCategory::ModeratelyPolluted,
            201..=300 => AqiCategory::HeavilyPolluted,
            _ => AqiCategory::SeverelyPolluted,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AqiCategory::Excellent => "Excellent",
            AqiCategory::Good => "Good",
            AqiCategory::LightlyPolluted => "Lightly polluted",
            AqiCategory::ModeratelyPolluted => "Moderately polluted",
            AqiCategory::HeavilyPolluted => "Heavily polluted",
            AqiCategory::SeverelyPolluted => "Severely polluted",
        }
    }

    /// Label used on published reports.
    pub fn chinese_label(&self) -> &'static str {
        match self {
            AqiCategory::Excellent => "优",
            AqiCategory::Good => "良",
            AqiCategory::LightlyPolluted => "轻度污染",
            AqiCategory::ModeratelyPolluted => "中度污染",
            AqiCategory::HeavilyPolluted => "重度污染",
            AqiCategory::SeverelyPolluted => "严重污染",
        }
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Individual air quality index for one pollutant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SubIndex {
    pub pollutant: Pollutant,
    pub concentration: f64,
    pub index: u32,
}

/// Result of an AQI computation for one location and time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AqiResult {
    pub index: u32,
    pub category: AqiCategory,
    /// Pollutants whose sub-index equals the overall index, in canonical
    /// order. Empty when the index is 50 or below.
    pub primary_pollutants: Vec<Pollutant>,
    /// Concentration of the first primary pollutant.
    pub primary_concentration: Option<f64>,
    /// Sub-indices of every pollutant that had a concentration.
    pub sub_indices: Vec<SubIndex>,
}

impl AqiResult {
    pub fn primary_pollutant(&self) -> Option<Pollutant> {
        self.primary_pollutants.first().copied()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised by source adapters while fetching or decoding upstream data.
///
/// A successful fetch that returns nothing is *not* an error; adapters return
/// `Ok(vec![])` for that case so reconciliation can tell the two apart.
#[derive(Debug, PartialEq)]
pub enum SourceError {
    /// Non-2xx HTTP response from the upstream API.
    Http(u16),
    /// The request could not be sent or the body could not be read.
    Request(String),
    /// The response body could not be deserialized.
    Parse(String),
    /// The adapter has no mapping for the requested location.
    UnknownLocation(String),
    /// Archive database failure.
    Database(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Http(code) => write!(f, "HTTP error: {}", code),
            SourceError::Request(msg) => write!(f, "Request failed: {}", msg),
            SourceError::Parse(msg) => write!(f, "Parse error: {}", msg),
            SourceError::UnknownLocation(loc) => write!(f, "Unknown location: {}", loc),
            SourceError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => SourceError::Http(status.as_u16()),
            None => SourceError::Request(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(err.to_string())
    }
}

impl From<postgres::Error> for SourceError {
    fn from(err: postgres::Error) -> Self {
        SourceError::Database(err.to_string())
    }
}

/// Programmer or operator errors: bad configuration, unknown keys.
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    UnknownBreakpointKey(String),
    InvalidBreakpoints(String),
    UnknownSource(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Config I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::UnknownBreakpointKey(key) => write!(f, "Unknown breakpoint key: {}", key),
            ConfigError::InvalidBreakpoints(msg) => write!(f, "Invalid breakpoint table: {}", msg),
            ConfigError::UnknownSource(name) => write!(f, "Unknown data source: {}", name),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors raised by renderers and push channels.
#[derive(Debug, PartialEq)]
pub enum OutputError {
    Io(String),
    Serialize(String),
    Http(String),
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputError::Io(msg) => write!(f, "Output I/O error: {}", msg),
            OutputError::Serialize(msg) => write!(f, "Serialization error: {}", msg),
            OutputError::Http(msg) => write!(f, "Push HTTP error: {}", msg),
        }
    }
}

impl std::error::Error for OutputError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pollutant_from_code_accepts_upstream_spellings() {
        assert_eq!(Pollutant::from_code("PM2.5"), Some(Pollutant::Pm25));
        assert_eq!(Pollutant::from_code("PM2_5"), Some(Pollutant::Pm25));
        assert_eq!(Pollutant::from_code("pm25"), Some(Pollutant::Pm25));
        assert_eq!(Pollutant::from_code(" o3 "), Some(Pollutant::O3));
        assert_eq!(Pollutant::from_code("AQI"), None);
    }

    #[test]
    fn test_station_and_city_ids_never_compare_equal() {
        assert_ne!(LocationId::station("320100"), LocationId::city("320100"));
        assert_eq!(LocationId::city("320100").code(), "320100");
    }

    #[test]
    fn test_pollutant_values_get_set_roundtrip_every_slot() {
        let mut values = PollutantValues::default();
        assert!(values.is_empty());
        for (i, p) in Pollutant::ALL.iter().enumerate() {
            values.set(*p, Some(i as f64 + 1.0));
        }
        for (i, p) in Pollutant::ALL.iter().enumerate() {
            assert_eq!(values.get(*p), Some(i as f64 + 1.0), "slot for {}", p);
        }
        assert!(!values.is_empty());
    }

    #[test]
    fn test_category_boundaries_are_inclusive_on_the_upper_end() {
        assert_eq!(AqiCategory::from_index(0), AqiCategory::Excellent);
        assert_eq!(AqiCategory::from_index(50), AqiCategory::Excellent);
        assert_eq!(AqiCategory::from_index(51), AqiCategory::Good);
        assert_eq!(AqiCategory::from_index(150), AqiCategory::LightlyPolluted);
        assert_eq!(AqiCategory::from_index(200), AqiCategory::ModeratelyPolluted);
        assert_eq!(AqiCategory::from_index(250), AqiCategory::HeavilyPolluted);
        assert_eq!(AqiCategory::from_index(300), AqiCategory::HeavilyPolluted);
        assert_eq!(AqiCategory::from_index(301), AqiCategory::SeverelyPolluted);
    }

    #[test]
    fn test_source_error_display() {
        assert_eq!(SourceError::Http(503).to_string(), "HTTP error: 503");
        assert_eq!(
            SourceError::UnknownLocation("station:X".into()).to_string(),
            "Unknown location: station:X"
        );
    }
}
