/// Upstream data sources.
///
/// Every upstream is wrapped in a `SourceAdapter` that turns its payloads
/// into plain `Reading`s in local time. Adapters own their I/O (HTTP, the
/// archive database) and nothing else: alignment, aggregation and indices
/// are computed once, downstream, for every source alike.
///
/// A fetch either succeeds with a possibly empty list or fails with a
/// `SourceError`. The two are never conflated: reconciliation falls back to
/// station rollups only on failure.
///
/// Submodules:
/// - `cnemc`:   national monitoring center publish service (JSON endpoint).
/// - `moji`:    commercial air quality API trend endpoints.
/// - `archive`: PostgreSQL storage and historical replay.

pub mod archive;
pub mod cnemc;
pub mod moji;

use crate::logging::DataSource;
use crate::model::{ConfigError, LocationId, Pollutant, Reading, SourceError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

pub trait SourceAdapter {
    /// Log tag for this adapter.
    fn source(&self) -> DataSource;

    /// Readings for `location` with timestamps in `[start, end)`, local time.
    ///
    /// Values are positive concentrations in canonical units or `None`.
    /// A value that fails to parse becomes `None`; it never aborts the rest
    /// of the payload.
    fn get_readings(
        &mut self,
        location: &LocationId,
        pollutants: &[Pollutant],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Reading>, SourceError>;
}

/// Which adapter a run reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Cnemc,
    Moji,
    Archive,
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cnemc" => Ok(SourceKind::Cnemc),
            "moji" => Ok(SourceKind::Moji),
            "archive" => Ok(SourceKind::Archive),
            other => Err(ConfigError::UnknownSource(other.to_string())),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Cnemc => write!(f, "cnemc"),
            SourceKind::Moji => write!(f, "moji"),
            SourceKind::Archive => write!(f, "archive"),
        }
    }
}

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// Unit an upstream reports concentrations in.
///
/// Canonical units are µg/m³ for every pollutant except CO, which is mg/m³.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConcentrationUnit {
    /// µg/m³ (mg/m³ for CO); already canonical.
    #[default]
    #[serde(rename = "ug/m3")]
    Canonical,
    /// mg/m³ for every pollutant, as exported by the provincial portal.
    #[serde(rename = "mg/m3")]
    Milligrams,
}

/// Upper bound for a converted µg/m³ value from a milligram source. The
/// portal exports three-decimal mg values, so anything at or above 1 mg/m³
/// is a formatting fault rather than an observation.
pub const MILLIGRAM_SOURCE_CEILING: f64 = 1000.0;

/// Converts an already-positive raw value into canonical units, dropping
/// implausible values.
pub fn to_canonical(pollutant: Pollutant, value: f64, unit: ConcentrationUnit) -> Option<f64> {
    match (unit, pollutant) {
        (ConcentrationUnit::Canonical, _) | (ConcentrationUnit::Milligrams, Pollutant::Co) => Some(value),
        (ConcentrationUnit::Milligrams, _) => {
            let converted = value * 1000.0;
            if converted < MILLIGRAM_SOURCE_CEILING {
                Some(converted)
            } else {
                None
            }
        }
    }
}

/// Keeps readings inside `[start, end)` for one of `pollutants`.
pub(crate) fn retain_requested(
    readings: &mut Vec<Reading>,
    pollutants: &[Pollutant],
    start: NaiveDateTime,
    end: NaiveDateTime,
) {
    readings.retain(|r| r.timestamp >= start && r.timestamp < end && pollutants.contains(&r.pollutant));
}
