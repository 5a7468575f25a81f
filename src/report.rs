/// Report assembly.
///
/// Joins each location's realtime hour with its daily aggregate and both
/// AQI results into one summary row, ranks the stations against each other
/// and applies the completeness gate. The resulting `ReportTable` is the
/// only thing renderers and push channels see.

use crate::aqi::IndexCalculator;
use crate::model::{
    AqiResult, AveragingWindow, DailyAggregate, LocationId, PollutantValues, TimeSeries,
};
use crate::reconcile::CityValueSource;
use crate::stations;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Metrics stations are ranked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RankMetric {
    Pm25Realtime,
    Pm10Realtime,
    No2Realtime,
    O3Realtime,
    Pm25Daily,
    Pm10Daily,
    No2Daily,
    Mda8,
}

impl RankMetric {
    pub const ALL: [RankMetric; 8] = [
        RankMetric::Pm25Realtime,
        RankMetric::Pm10Realtime,
        RankMetric::No2Realtime,
        RankMetric::O3Realtime,
        RankMetric::Pm25Daily,
        RankMetric::Pm10Daily,
        RankMetric::No2Daily,
        RankMetric::Mda8,
    ];

    pub fn value(&self, row: &LocationSummary) -> Option<f64> {
        match self {
            RankMetric::Pm25Realtime => row.realtime.pm25,
            RankMetric::Pm10Realtime => row.realtime.pm10,
            RankMetric::No2Realtime => row.realtime.no2,
            RankMetric::O3Realtime => row.realtime.o3,
            RankMetric::Pm25Daily => row.daily.means.pm25,
            RankMetric::Pm10Daily => row.daily.means.pm10,
            RankMetric::No2Daily => row.daily.means.no2,
            RankMetric::Mda8 => row.daily.mda8,
        }
    }
}

impl fmt::Display for RankMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RankMetric::Pm25Realtime => "PM2.5 realtime",
            RankMetric::Pm10Realtime => "PM10 realtime",
            RankMetric::No2Realtime => "NO2 realtime",
            RankMetric::O3Realtime => "O3 realtime",
            RankMetric::Pm25Daily => "PM2.5 daily",
            RankMetric::Pm10Daily => "PM10 daily",
            RankMetric::No2Daily => "NO2 daily",
            RankMetric::Mda8 => "MDA8",
        };
        write!(f, "{}", name)
    }
}

/// Ascending "min" ranking on values rounded to integers: ties share the
/// lowest rank and the next rank skips. Missing values are unranked.
pub fn rank_min(values: &[Option<f64>]) -> Vec<Option<u32>> {
    let rounded: Vec<Option<f64>> = values.iter().map(|v| v.map(f64::round_ties_even)).collect();
    rounded
        .iter()
        .map(|v| {
            v.map(|value| {
                let below = rounded.iter().flatten().filter(|&&other| other < value).count();
                below as u32 + 1
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Report rows
// ---------------------------------------------------------------------------

/// Everything the assembler needs for one location.
#[derive(Debug, Clone, Copy)]
pub struct LocationInput<'a> {
    pub series: &'a TimeSeries,
    pub daily: &'a DailyAggregate,
    /// Provenance of a city's values; `None` for stations.
    pub city_source: Option<CityValueSource>,
}

/// One row of the report table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSummary {
    pub location: LocationId,
    pub name: String,
    /// Values at the report hour.
    pub realtime: PollutantValues,
    pub realtime_o3_8h: Option<f64>,
    pub daily: DailyAggregate,
    pub realtime_aqi: Option<AqiResult>,
    pub daily_aqi: Option<AqiResult>,
    /// Station ranks; always empty for cities.
    pub ranks: BTreeMap<RankMetric, u32>,
    pub city_source: Option<CityValueSource>,
}

impl LocationSummary {
    pub fn rank(&self, metric: RankMetric) -> Option<u32> {
        self.ranks.get(&metric).copied()
    }
}

/// The finished report for one hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportTable {
    pub report_hour: NaiveDateTime,
    pub date: NaiveDate,
    pub rows: Vec<LocationSummary>,
    /// Stations with a PM2.5 value at the report hour.
    pub reporting_stations: usize,
    pub min_reporting_stations: usize,
    /// `false` when too few stations reported for the report to be sent.
    pub complete: bool,
}

impl ReportTable {
    pub fn row(&self, location: &LocationId) -> Option<&LocationSummary> {
        self.rows.iter().find(|r| &r.location == location)
    }

    pub fn station_rows(&self) -> impl Iterator<Item = &LocationSummary> {
        self.rows.iter().filter(|r| r.location.is_station())
    }

    pub fn city_rows(&self) -> impl Iterator<Item = &LocationSummary> {
        self.rows.iter().filter(|r| !r.location.is_station())
    }
}

fn summarize(
    input: &LocationInput<'_>,
    report_hour: NaiveDateTime,
    calculator: &IndexCalculator<'_>,
) -> LocationSummary {
    let (realtime, realtime_o3_8h) = input
        .series
        .at(report_hour)
        .map(|r| (r.values, r.o3_8h))
        .unwrap_or_default();

    LocationSummary {
        location: input.series.location.clone(),
        name: stations::display_name(&input.series.location),
        realtime,
        realtime_o3_8h,
        daily: input.daily.clone(),
        realtime_aqi: calculator.compute(&realtime, AveragingWindow::Hourly),
        daily_aqi: calculator.compute_daily(input.daily),
        ranks: BTreeMap::new(),
        city_source: input.city_source,
    }
}

/// Assembles the report table for `report_hour`.
///
/// Rows keep the order of `inputs`. Only station rows are ranked and only
/// station rows count towards the completeness gate.
pub fn assemble(
    report_hour: NaiveDateTime,
    date: NaiveDate,
    inputs: &[LocationInput<'_>],
    calculator: &IndexCalculator<'_>,
    min_reporting_stations: usize,
) -> ReportTable {
    let mut rows: Vec<LocationSummary> = inputs
        .iter()
        .map(|input| summarize(input, report_hour, calculator))
        .collect();

    let station_slots: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.location.is_station())
        .map(|(i, _)| i)
        .collect();

    for metric in RankMetric::ALL {
        let values: Vec<Option<f64>> = station_slots.iter().map(|&i| metric.value(&rows[i])).collect();
        for (&slot, rank) in station_slots.iter().zip(rank_min(&values)) {
            if let Some(rank) = rank {
                rows[slot].ranks.insert(metric, rank);
            }
        }
    }

    let reporting_stations = station_slots
        .iter()
        .filter(|&&i| rows[i].realtime.pm25.is_some())
        .count();

    ReportTable {
        report_hour,
        date,
        rows,
        reporting_stations,
        min_reporting_stations,
        complete: reporting_stations >= min_reporting_stations,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aqi::BreakpointTable;
    use crate::model::{AqiCategory, HourlyRecord, Pollutant};
    use chrono::Duration;

    fn report_hour() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(15, 0, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn series_with(location: LocationId, pm25: Option<f64>) -> TimeSeries {
        let mut record = HourlyRecord::empty(report_hour());
        record.values.pm25 = pm25;
        TimeSeries {
            location,
            start: report_hour(),
            end: report_hour() + Duration::hours(1),
            records: vec![record],
        }
    }

    #[test]
    fn test_rank_min_shares_lowest_rank_and_skips() {
        let ranks = rank_min(&[Some(30.0), Some(10.0), Some(30.0), None, Some(40.0)]);
        assert_eq!(ranks, vec![Some(2), Some(1), Some(2), None, Some(4)]);
    }

    #[test]
    fn test_rank_min_compares_rounded_values() {
        // 30.4 and 29.6 both round to 30; 30.5 rounds half-to-even to 30.
        let ranks = rank_min(&[Some(30.4), Some(29.6), Some(30.5), Some(31.5)]);
        assert_eq!(ranks, vec![Some(1), Some(1), Some(1), Some(4)]);
    }

    #[test]
    fn test_assemble_ranks_stations_only_and_gates_completeness() {
        let a = series_with(LocationId::station("1151A"), Some(50.0));
        let b = series_with(LocationId::station("1152A"), Some(20.0));
        let c = series_with(LocationId::station("1153A"), None);
        let city = series_with(LocationId::city("320100"), Some(5.0));
        let dailies: Vec<DailyAggregate> = [&a, &b, &c, &city]
            .iter()
            .map(|s| DailyAggregate::missing(s.location.clone(), date()))
            .collect();

        let inputs = vec![
            LocationInput { series: &a, daily: &dailies[0], city_source: None },
            LocationInput { series: &b, daily: &dailies[1], city_source: None },
            LocationInput { series: &c, daily: &dailies[2], city_source: None },
            LocationInput { series: &city, daily: &dailies[3], city_source: Some(CityValueSource::MunicipalFeed) },
        ];
        let calculator = IndexCalculator::new(BreakpointTable::shared());

        let table = assemble(report_hour(), date(), &inputs, &calculator, 2);
        assert_eq!(table.reporting_stations, 2);
        assert!(table.complete);
        assert_eq!(table.row(&LocationId::station("1151A")).unwrap().rank(RankMetric::Pm25Realtime), Some(2));
        assert_eq!(table.row(&LocationId::station("1152A")).unwrap().rank(RankMetric::Pm25Realtime), Some(1));
        assert_eq!(table.row(&LocationId::station("1153A")).unwrap().rank(RankMetric::Pm25Realtime), None);
        assert!(table.row(&LocationId::city("320100")).unwrap().ranks.is_empty(), "cities are never ranked");
        assert_eq!(table.city_rows().count(), 1);

        let strict = assemble(report_hour(), date(), &inputs, &calculator, 3);
        assert!(!strict.complete, "2 of 3 required stations is incomplete");
    }

    #[test]
    fn test_summary_carries_realtime_and_daily_aqi() {
        let mut series = series_with(LocationId::station("1151A"), Some(80.0));
        series.records[0].values.o3 = Some(250.0);
        let mut daily = DailyAggregate::missing(series.location.clone(), date());
        daily.means.pm25 = Some(60.0);
        daily.mda8 = Some(100.0);

        let inputs = [LocationInput { series: &series, daily: &daily, city_source: None }];
        let calculator = IndexCalculator::new(BreakpointTable::shared());
        let table = assemble(report_hour(), date(), &inputs, &calculator, 1);
        let row = &table.rows[0];

        let realtime = row.realtime_aqi.as_ref().unwrap();
        // PM2.5 80 → 107, O3 1h 250 → 125.
        assert_eq!(realtime.index, 125);
        assert_eq!(realtime.primary_pollutant(), Some(Pollutant::O3));

        let daily_aqi = row.daily_aqi.as_ref().unwrap();
        // PM2.5 60 → 82, MDA8 100 → 50.
        assert_eq!(daily_aqi.index, 82);
        assert_eq!(daily_aqi.category, AqiCategory::Good);
        assert_eq!(row.name, "迈皋桥");
    }

    #[test]
    fn test_location_missing_report_hour_has_empty_realtime() {
        let mut series = series_with(LocationId::station("1151A"), Some(80.0));
        series.records[0].timestamp = report_hour() - Duration::hours(1);
        let daily = DailyAggregate::missing(series.location.clone(), date());
        let inputs = [LocationInput { series: &series, daily: &daily, city_source: None }];
        let calculator = IndexCalculator::new(BreakpointTable::shared());
        let table = assemble(report_hour(), date(), &inputs, &calculator, 1);
        assert!(table.rows[0].realtime.is_empty());
        assert!(table.rows[0].realtime_aqi.is_none());
        assert!(!table.complete);
    }
}
