/// Daily standard-limit checks.
///
/// Daily means are compared with the national Grade II 24-hour limits.
/// Comparisons use values rounded to integers, the same values that appear
/// on the published report, so a report never shows "75" next to an
/// exceedance warning.

use crate::model::{DailyAggregate, LocationId};
use crate::report::ReportTable;
use serde::Serialize;
use std::fmt;

/// Alert levels, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ExceedanceLevel {
    /// Inside the warning band just below the limit.
    NearLimit,
    /// Above the limit.
    Exceeded,
}

/// Daily statistic a limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LimitMetric {
    Pm25Daily,
    Pm10Daily,
    No2Daily,
    Mda8,
}

impl LimitMetric {
    pub fn value(&self, aggregate: &DailyAggregate) -> Option<f64> {
        match self {
            LimitMetric::Pm25Daily => aggregate.means.pm25,
            LimitMetric::Pm10Daily => aggregate.means.pm10,
            LimitMetric::No2Daily => aggregate.means.no2,
            LimitMetric::Mda8 => aggregate.mda8,
        }
    }
}

impl fmt::Display for LimitMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitMetric::Pm25Daily => write!(f, "PM2.5 24h mean"),
            LimitMetric::Pm10Daily => write!(f, "PM10 24h mean"),
            LimitMetric::No2Daily => write!(f, "NO2 24h mean"),
            LimitMetric::Mda8 => write!(f, "O3 MDA8"),
        }
    }
}

/// A limit and, optionally, the lower edge of its warning band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyLimit {
    pub metric: LimitMetric,
    pub limit: f64,
    /// Values strictly above this and at or below `limit` are near-limit.
    pub warning_floor: Option<f64>,
}

/// National Grade II 24-hour limits, µg/m³.
pub const GRADE_II_LIMITS: [DailyLimit; 4] = [
    DailyLimit { metric: LimitMetric::Pm25Daily, limit: 75.0, warning_floor: Some(70.0) },
    DailyLimit { metric: LimitMetric::Pm10Daily, limit: 150.0, warning_floor: None },
    DailyLimit { metric: LimitMetric::No2Daily, limit: 80.0, warning_floor: None },
    DailyLimit { metric: LimitMetric::Mda8, limit: 160.0, warning_floor: Some(150.0) },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceedanceAlert {
    pub location: LocationId,
    pub metric: LimitMetric,
    pub level: ExceedanceLevel,
    /// Rounded value that triggered the alert.
    pub value: f64,
    pub limit: f64,
}

impl fmt::Display for ExceedanceAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.level {
            ExceedanceLevel::Exceeded => "exceeds",
            ExceedanceLevel::NearLimit => "is approaching",
        };
        write!(
            f,
            "{}: {} {} {} the limit of {}",
            self.location, self.metric, self.value, verb, self.limit
        )
    }
}

/// Classifies one value against one limit.
pub fn classify(value: f64, limit: &DailyLimit) -> Option<ExceedanceLevel> {
    let value = value.round_ties_even();
    if value > limit.limit {
        Some(ExceedanceLevel::Exceeded)
    } else if limit.warning_floor.is_some_and(|floor| value > floor) {
        Some(ExceedanceLevel::NearLimit)
    } else {
        None
    }
}

/// Every limit `aggregate` exceeds or approaches. Missing values raise
/// nothing.
pub fn check_daily_limits(aggregate: &DailyAggregate) -> Vec<ExceedanceAlert> {
    GRADE_II_LIMITS
        .iter()
        .filter_map(|limit| {
            let value = limit.metric.value(aggregate)?;
            let level = classify(value, limit)?;
            Some(ExceedanceAlert {
                location: aggregate.location.clone(),
                metric: limit.metric,
                level,
                value: value.round_ties_even(),
                limit: limit.limit,
            })
        })
        .collect()
}

/// Alerts for every row of a report, in row order.
pub fn check_report(table: &ReportTable) -> Vec<ExceedanceAlert> {
    table
        .rows
        .iter()
        .flat_map(|row| check_daily_limits(&row.daily))
        .collect()
}
