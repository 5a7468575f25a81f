//! Hourly calendar alignment.
//!
//! Raw readings arrive sparse, unordered, occasionally duplicated and
//! sometimes for off-hour timestamps. Alignment left-joins them onto a
//! complete hourly grid over `[start, end)`: every hour gets a record, even
//! when nothing was observed for it.

use crate::logging::{self, DataSource};
use crate::model::{HourlyRecord, LocationId, Reading, TimeSeries};
use crate::analysis::quality::normalize_concentration;
use chrono::{Duration, NaiveDateTime, Timelike};
use std::collections::HashMap;

/// Truncates a timestamp to the start of its hour.
pub fn floor_to_hour(timestamp: NaiveDateTime) -> NaiveDateTime {
    timestamp
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(timestamp)
}

/// Every hour in `[start, end)`, with `start` floored to the hour.
/// Empty when `end` is not after `start`.
pub fn hourly_calendar(start: NaiveDateTime, end: NaiveDateTime) -> Vec<NaiveDateTime> {
    let mut hours = Vec::new();
    let mut t = floor_to_hour(start);
    while t < end {
        hours.push(t);
        t += Duration::hours(1);
    }
    hours
}

/// Aligns `readings` for `location` onto the hourly calendar.
///
/// Readings for other locations and readings that are not on the hour are
/// ignored. When the same hour and pollutant appear more than once, a
/// present value wins over a missing one and the later present value wins
/// over an earlier one.
pub fn align_readings(
    location: &LocationId,
    readings: &[Reading],
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> TimeSeries {
    let calendar = hourly_calendar(start, end);
    let mut records: Vec<HourlyRecord> = calendar.iter().map(|&t| HourlyRecord::empty(t)).collect();
    let slots: HashMap<NaiveDateTime, usize> =
        calendar.iter().enumerate().map(|(i, &t)| (t, i)).collect();

    let mut foreign = 0usize;
    let mut off_hour = 0usize;

    for reading in readings {
        if &reading.location != location {
            foreign += 1;
            continue;
        }
        if floor_to_hour(reading.timestamp) != reading.timestamp {
            off_hour += 1;
            continue;
        }
        let Some(&slot) = slots.get(&reading.timestamp) else {
            continue;
        };
        if let Some(value) = reading.value.and_then(normalize_concentration) {
            records[slot].values.set(reading.pollutant, Some(value));
        }
    }

    if foreign > 0 || off_hour > 0 {
        logging::debug(
            DataSource::Core,
            Some(&location.to_string()),
            &format!(
                "alignment ignored {} readings for other locations and {} off-hour readings",
                foreign, off_hour
            ),
        );
    }

    TimeSeries {
        location: location.clone(),
        start: floor_to_hour(start),
        end,
        records,
    }
}
