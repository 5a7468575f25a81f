/// Time series assembly for the air quality reporting service.
///
/// This module turns raw per-location readings into aligned hourly series
/// and daily aggregates. It performs no I/O; every function works on an
/// immutable input snapshot and can run independently per location.
///
/// Submodules:
/// - `alignment`: re-indexes raw readings onto a complete hourly calendar.
/// - `quality`:   value normalization and the PM2.5/PM10 consistency rule.
/// - `rolling`:   8-hour ozone means, daily means and MDA8.

pub mod alignment;
pub mod quality;
pub mod rolling;

use crate::model::{LocationId, Reading, TimeSeries};
use chrono::NaiveDateTime;

pub use rolling::AggregationRules;

/// Builds the full hourly series for one location: aligned onto
/// `[start, end)`, PM-consistency corrected, with `o3_8h` filled in.
pub fn build_series(
    location: &LocationId,
    readings: &[Reading],
    start: NaiveDateTime,
    end: NaiveDateTime,
    rules: &AggregationRules,
) -> TimeSeries {
    let mut series = alignment::align_readings(location, readings, start, end);
    quality::enforce_series_pm_consistency(&series.location, &mut series.records);
    rolling::apply_o3_8h(&mut series.records, rules);
    series
}
