/// Municipal feed freshness.
///
/// A municipal feed sometimes lags its stations by an hour or more. The
/// lagging feed is still used, since its history is valid, but the report
/// should say so.
///
/// # Clock injection
/// Freshness is judged against the report hour passed in, never against
/// the wall clock.

use crate::model::TimeSeries;
use chrono::NaiveDateTime;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Freshness {
    /// The report hour itself has data.
    Current,
    /// The latest observed hour is before the report hour.
    Stale { latest: NaiveDateTime, hours_behind: i64 },
    /// Nothing observed in the whole window.
    Empty,
}

impl Freshness {
    pub fn is_current(&self) -> bool {
        matches!(self, Freshness::Current)
    }
}

/// Latest hour with at least one observed pollutant.
pub fn latest_observed_hour(series: &TimeSeries) -> Option<NaiveDateTime> {
    series
        .records
        .iter()
        .rev()
        .find(|r| !r.values.is_empty())
        .map(|r| r.timestamp)
}

/// Freshness of `series` for `report_hour`.
pub fn feed_freshness(series: &TimeSeries, report_hour: NaiveDateTime) -> Freshness {
    match latest_observed_hour(series) {
        None => Freshness::Empty,
        Some(latest) if latest >= report_hour => Freshness::Current,
        Some(latest) => Freshness::Stale {
            latest,
            hours_behind: (report_hour - latest).num_hours(),
        },
    }
}
