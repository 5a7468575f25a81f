/// Cross-source reconciliation for municipal aggregates.
///
/// A city is described by two independent sources: its own municipal feed
/// and the rollup of its constituent stations. They are merged per field:
///
///   - Hourly values and daily pollutant means come from the municipal feed
///     whenever that feed was fetched successfully, even if it came back
///     sparse or empty.
///   - When the municipal fetch *failed*, those values fall back to the
///     mean of the constituent stations, and the merged result records that
///     provenance.
///   - MDA8 always comes from the mean of the constituent stations' MDA8,
///     regardless of what the municipal feed reports. A city with no
///     registered constituents keeps its own MDA8.
///
/// The PM2.5/PM10 consistency rule is re-applied to every merged row.

use crate::analysis::alignment::hourly_calendar;
use crate::analysis::quality;
use crate::analysis::rolling::{self, mean_of, AggregationRules};
use crate::logging::{self, DataSource};
use crate::model::{DailyAggregate, HourlyRecord, LocationId, Pollutant, TimeSeries};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Where a city's hourly values and daily means came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CityValueSource {
    MunicipalFeed,
    StationRollup,
}

impl fmt::Display for CityValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CityValueSource::MunicipalFeed => write!(f, "municipal feed"),
            CityValueSource::StationRollup => write!(f, "station rollup"),
        }
    }
}

/// A city's hourly series together with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct CitySeries {
    pub series: TimeSeries,
    pub source: CityValueSource,
}

// ---------------------------------------------------------------------------
// Hourly merge
// ---------------------------------------------------------------------------

/// Hour-by-hour mean of the constituent station series over `[start, end)`,
/// labelled as `city`. Hours where no station observed a pollutant stay
/// missing. `o3_8h` is recomputed from the averaged O3.
pub fn station_rollup(
    city: &LocationId,
    stations: &[&TimeSeries],
    start: NaiveDateTime,
    end: NaiveDateTime,
    rules: &AggregationRules,
) -> TimeSeries {
    let mut records: Vec<HourlyRecord> = hourly_calendar(start, end)
        .into_iter()
        .map(|timestamp| {
            let mut record = HourlyRecord::empty(timestamp);
            let rows: Vec<&HourlyRecord> = stations.iter().filter_map(|s| s.at(timestamp)).collect();
            for pollutant in Pollutant::ALL {
                record
                    .values
                    .set(pollutant, mean_of(rows.iter().map(|r| r.values.get(pollutant)), 1));
            }
            record
        })
        .collect();

    quality::enforce_series_pm_consistency(city, &mut records);
    rolling::apply_o3_8h(&mut records, rules);

    TimeSeries {
        location: city.clone(),
        start: records.first().map(|r| r.timestamp).unwrap_or(start),
        end,
        records,
    }
}

/// Chooses the hourly series for a city.
///
/// `municipal` is `None` when the municipal fetch failed; a successful but
/// empty fetch arrives as an all-missing series and is used as is.
pub fn reconcile_city_series(
    city: &LocationId,
    municipal: Option<TimeSeries>,
    stations: &[&TimeSeries],
    start: NaiveDateTime,
    end: NaiveDateTime,
    rules: &AggregationRules,
) -> CitySeries {
    match municipal {
        Some(mut series) => {
            quality::enforce_series_pm_consistency(city, &mut series.records);
            CitySeries {
                series,
                source: CityValueSource::MunicipalFeed,
            }
        }
        None => {
            logging::warn(
                DataSource::Core,
                Some(&city.to_string()),
                &format!(
                    "municipal feed unavailable, falling back to the mean of {} stations",
                    stations.len()
                ),
            );
            CitySeries {
                series: station_rollup(city, stations, start, end, rules),
                source: CityValueSource::StationRollup,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Daily merge
// ---------------------------------------------------------------------------

/// Merges a city's own daily aggregate with its constituents' aggregates.
///
/// Pollutant means are taken from `city_daily`; MDA8 is the mean of the
/// station MDA8 values that are present. With no constituents at all the
/// city's own MDA8 is kept.
pub fn reconcile_city_daily(city_daily: &DailyAggregate, station_dailies: &[&DailyAggregate]) -> DailyAggregate {
    let mut merged = city_daily.clone();

    if !station_dailies.is_empty() {
        merged.mda8 = mean_of(station_dailies.iter().map(|d| d.mda8), 1);
        if merged.mda8.is_none() {
            logging::debug(
                DataSource::Core,
                Some(&city_daily.location.to_string()),
                "no constituent station has an MDA8 for the day",
            );
        }
    }

    if quality::enforce_pm_consistency(&mut merged.means) {
        logging::log_data_quality(
            &city_daily.location.to_string(),
            &format!("{} merged daily PM2.5 exceeds PM10, PM10 discarded", city_daily.date),
        );
    }
    merged
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn hour(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn nanjing() -> LocationId {
        LocationId::city("320100")
    }

    fn empty_series(location: LocationId, start: NaiveDateTime, hours: i64) -> TimeSeries {
        let end = start + Duration::hours(hours);
        TimeSeries {
            location,
            start,
            end,
            records: hourly_calendar(start, end).into_iter().map(HourlyRecord::empty).collect(),
        }
    }

    #[test]
    fn test_mda8_comes_from_stations_and_pm25_from_municipal_feed() {
        let mut city = DailyAggregate::missing(nanjing(), date());
        city.means.pm25 = Some(40.0);
        city.mda8 = Some(120.0);

        let mut a = DailyAggregate::missing(LocationId::station("1151A"), date());
        a.means.pm25 = Some(90.0);
        a.mda8 = Some(160.0);
        let mut b = DailyAggregate::missing(LocationId::station("1152A"), date());
        b.means.pm25 = Some(10.0);
        b.mda8 = Some(180.0);

        let merged = reconcile_city_daily(&city, &[&a, &b]);
        assert_eq!(merged.means.pm25, Some(40.0), "PM2.5 must come from the municipal feed");
        assert_eq!(merged.mda8, Some(170.0), "MDA8 must be the station mean");
        assert_eq!(merged.location, nanjing());
    }

    #[test]
    fn test_station_mda8_mean_skips_missing_stations() {
        let city = DailyAggregate::missing(nanjing(), date());
        let mut a = DailyAggregate::missing(LocationId::station("1151A"), date());
        a.mda8 = Some(150.0);
        let b = DailyAggregate::missing(LocationId::station("1152A"), date());
        let merged = reconcile_city_daily(&city, &[&a, &b]);
        assert_eq!(merged.mda8, Some(150.0));
    }

    #[test]
    fn test_city_without_constituents_keeps_own_mda8() {
        let mut city = DailyAggregate::missing(LocationId::city("320200"), date());
        city.mda8 = Some(133.0);
        let merged = reconcile_city_daily(&city, &[]);
        assert_eq!(merged.mda8, Some(133.0));
    }

    #[test]
    fn test_pm_rule_is_reapplied_after_daily_merge() {
        let mut city = DailyAggregate::missing(nanjing(), date());
        city.means.pm25 = Some(70.0);
        city.means.pm10 = Some(65.0);
        let merged = reconcile_city_daily(&city, &[]);
        assert_eq!(merged.means.pm25, Some(70.0));
        assert_eq!(merged.means.pm10, None);
    }

    #[test]
    fn test_successful_empty_municipal_fetch_is_not_replaced() {
        let mut station = empty_series(LocationId::station("1151A"), hour(1), 4);
        station.records[0].values.pm25 = Some(30.0);
        let municipal = empty_series(nanjing(), hour(1), 4);

        let merged = reconcile_city_series(
            &nanjing(),
            Some(municipal),
            &[&station],
            hour(1),
            hour(5),
            &AggregationRules::default(),
        );
        assert_eq!(merged.source, CityValueSource::MunicipalFeed);
        assert_eq!(merged.series.observed_hours(), 0);
    }

    #[test]
    fn test_failed_municipal_fetch_falls_back_to_station_mean() {
        let mut a = empty_series(LocationId::station("1151A"), hour(1), 4);
        let mut b = empty_series(LocationId::station("1152A"), hour(1), 4);
        a.records[2].values.pm25 = Some(30.0);
        b.records[2].values.pm25 = Some(50.0);
        b.records[3].values.no2 = Some(44.0);

        let merged = reconcile_city_series(&nanjing(), None, &[&a, &b], hour(1), hour(5), &AggregationRules::default());
        assert_eq!(merged.source, CityValueSource::StationRollup);
        assert_eq!(merged.series.location, nanjing());
        assert_eq!(merged.series.len(), 4);
        assert_eq!(merged.series.at(hour(3)).unwrap().values.pm25, Some(40.0));
        assert_eq!(merged.series.at(hour(4)).unwrap().values.no2, Some(44.0));
        assert_eq!(merged.series.at(hour(1)).unwrap().values.pm25, None);
    }

    #[test]
    fn test_rollup_can_introduce_pm_violation_which_is_corrected() {
        // Each station is consistent on its own, the means are not.
        let mut a = empty_series(LocationId::station("1151A"), hour(10), 1);
        let mut b = empty_series(LocationId::station("1152A"), hour(10), 1);
        a.records[0].values.pm25 = Some(100.0);
        a.records[0].values.pm10 = Some(110.0);
        b.records[0].values.pm25 = Some(20.0);
        let rollup = station_rollup(&nanjing(), &[&a, &b], hour(10), hour(11), &AggregationRules::default());
        // PM2.5 mean 60, PM10 mean 110: consistent.
        assert_eq!(rollup.records[0].values.pm10, Some(110.0));

        let mut c = empty_series(LocationId::station("1153A"), hour(10), 1);
        c.records[0].values.pm10 = Some(30.0);
        let rollup = station_rollup(&nanjing(), &[&a, &b, &c], hour(10), hour(11), &AggregationRules::default());
        // PM2.5 mean 60, PM10 mean 70: consistent.
        assert_eq!(rollup.records[0].values.pm10, Some(70.0));

        let mut d = empty_series(LocationId::station("1154A"), hour(10), 1);
        d.records[0].values.pm25 = Some(90.0);
        d.records[0].values.pm10 = Some(95.0);
        let mut e = empty_series(LocationId::station("1155A"), hour(10), 1);
        e.records[0].values.pm10 = Some(20.0);
        let rollup = station_rollup(&nanjing(), &[&d, &e], hour(10), hour(11), &AggregationRules::default());
        // PM2.5 mean 90 > PM10 mean 57.5.
        assert_eq!(rollup.records[0].values.pm25, Some(90.0));
        assert_eq!(rollup.records[0].values.pm10, None);
    }
}
