//! Rolling and daily statistics over an aligned hourly series.
//!
//! # 8-hour ozone
//! `o3_8h[t]` is the mean of O3 over the trailing window ending at `t`
//! (default 8 hours). It is reported only when the window holds at least
//! `o3_min_samples` observed hours (default 6) and only for local hours at
//! or after `o3_first_valid_hour` (default 08:00). Hours before that are
//! forced to missing even when the window is full.
//!
//! # Daily statistics
//! A reporting day runs from `day_start_hour` (default 01:00) to the same
//! hour on the following day, so hourly values stamped at the end of their
//! averaging period (01:00 … 24:00) fall into the day they describe.
//! The daily mean of a pollutant needs `daily_min_samples` observed hours;
//! MDA8 is the maximum `o3_8h` of the day, ignoring missing hours.

use crate::model::{
    ConfigError, DailyAggregate, HourlyRecord, Pollutant, PollutantValues, TimeSeries,
};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Windowing and sample-floor rules for rolling and daily statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationRules {
    pub o3_window_hours: usize,
    pub o3_min_samples: usize,
    pub o3_first_valid_hour: u32,
    pub day_start_hour: u32,
    pub daily_min_samples: usize,
}

impl Default for AggregationRules {
    fn default() -> Self {
        Self {
            o3_window_hours: 8,
            o3_min_samples: 6,
            o3_first_valid_hour: 8,
            day_start_hour: 1,
            daily_min_samples: 1,
        }
    }
}

impl AggregationRules {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.o3_window_hours == 0 {
            return Err(ConfigError::Invalid("o3_window_hours must be at least 1".into()));
        }
        if self.o3_min_samples == 0 || self.o3_min_samples > self.o3_window_hours {
            return Err(ConfigError::Invalid(format!(
                "o3_min_samples must be between 1 and o3_window_hours ({})",
                self.o3_window_hours
            )));
        }
        if self.o3_first_valid_hour > 23 || self.day_start_hour > 23 {
            return Err(ConfigError::Invalid(
                "o3_first_valid_hour and day_start_hour must be below 24".into(),
            ));
        }
        if self.daily_min_samples == 0 {
            return Err(ConfigError::Invalid("daily_min_samples must be at least 1".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Means
// ---------------------------------------------------------------------------

/// Mean of the present values, or `None` when fewer than `min_samples`
/// are present.
pub fn mean_of<I>(values: I, min_samples: usize) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 || count < min_samples {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Maximum of the present values.
pub fn max_of<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    values.into_iter().flatten().fold(None, |acc: Option<f64>, v| match acc {
        Some(m) if m >= v => Some(m),
        _ => Some(v),
    })
}

// ---------------------------------------------------------------------------
// 8-hour ozone
// ---------------------------------------------------------------------------

/// Trailing O3 means for each record. `records` must be a contiguous
/// hourly sequence, as produced by `alignment::align_readings`.
pub fn rolling_o3_8h(records: &[HourlyRecord], rules: &AggregationRules) -> Vec<Option<f64>> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            if record.timestamp.hour() < rules.o3_first_valid_hour {
                return None;
            }
            let first = (i + 1).saturating_sub(rules.o3_window_hours);
            mean_of(
                records[first..=i].iter().map(|r| r.values.o3),
                rules.o3_min_samples,
            )
        })
        .collect()
}

/// Fills `o3_8h` on every record.
pub fn apply_o3_8h(records: &mut [HourlyRecord], rules: &AggregationRules) {
    let averages = rolling_o3_8h(records, rules);
    for (record, average) in records.iter_mut().zip(averages) {
        record.o3_8h = average;
    }
}

// ---------------------------------------------------------------------------
// Daily statistics
// ---------------------------------------------------------------------------

/// `[start, end)` of the reporting day `date`.
pub fn day_bounds(date: NaiveDate, rules: &AggregationRules) -> (NaiveDateTime, NaiveDateTime) {
    let start = date.and_time(NaiveTime::MIN) + Duration::hours(rules.day_start_hour as i64);
    (start, start + Duration::days(1))
}

/// The reporting day an hourly timestamp belongs to.
pub fn day_of(timestamp: NaiveDateTime, rules: &AggregationRules) -> NaiveDate {
    (timestamp - Duration::hours(rules.day_start_hour as i64)).date()
}

/// Daily aggregate of `series` for `date`.
///
/// Hours of the day outside the series window simply contribute nothing;
/// a day with no observed hours yields all-missing means and MDA8. Each
/// mean is taken over its own observed hours, so the PM rule is not
/// applied to the means of a single feed.
pub fn daily_aggregate(series: &TimeSeries, date: NaiveDate, rules: &AggregationRules) -> DailyAggregate {
    let (start, end) = day_bounds(date, rules);
    let day: Vec<&HourlyRecord> = series
        .records
        .iter()
        .filter(|r| r.timestamp >= start && r.timestamp < end)
        .collect();

    let mut means = PollutantValues::default();
    for pollutant in Pollutant::ALL {
        means.set(
            pollutant,
            mean_of(day.iter().map(|r| r.values.get(pollutant)), rules.daily_min_samples),
        );
    }

    DailyAggregate {
        location: series.location.clone(),
        date,
        means,
        mda8: max_of(day.iter().map(|r| r.o3_8h)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
