/// The hourly report pipeline.
///
/// One parameterized pipeline serves every source: adapters only differ in
/// how they produce raw readings. For each location the run fetches the
/// report window, aligns it, applies the PM rule and the 8-hour ozone means,
/// then builds the day's aggregate. Cities are reconciled against their
/// constituent stations before the table is assembled.
///
/// Locations are processed independently. A failed fetch is logged and
/// recorded in the coverage report; it never aborts the run.

use crate::alert::exceedance::{self, ExceedanceAlert};
use crate::alert::staleness::{self, Freshness};
use crate::analysis::rolling::{self, AggregationRules};
use crate::analysis;
use crate::aqi::{BreakpointTable, IndexCalculator};
use crate::config::ServiceConfig;
use crate::coverage::{self, CoverageReport, LocationCoverage};
use crate::ingest::archive::ArchiveStore;
use crate::ingest::SourceAdapter;
use crate::logging::{self, DataSource};
use crate::model::{DailyAggregate, LocationId, Pollutant, Reading, SourceError, TimeSeries};
use crate::reconcile::{self, CityValueSource};
use crate::report::{self, LocationInput, ReportTable};
use crate::schedule;
use crate::stations;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Per-location building blocks
// ---------------------------------------------------------------------------

/// Fetches every pollutant for `location` over `[start, end)`. Failures are
/// logged before being returned.
pub fn fetch_readings(
    adapter: &mut dyn SourceAdapter,
    location: &LocationId,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<Reading>, SourceError> {
    match adapter.get_readings(location, &Pollutant::ALL, start, end) {
        Ok(readings) => {
            logging::debug(
                adapter.source(),
                Some(&location.to_string()),
                &format!("{} readings for {} .. {}", readings.len(), start, end),
            );
            Ok(readings)
        }
        Err(e) => {
            logging::log_source_failure(adapter.source(), &location.to_string(), "get_readings", &e);
            Err(e)
        }
    }
}

/// Complete hourly series for one location over `[start, end)`, `o3_8h`
/// included.
pub fn build_location_series(
    adapter: &mut dyn SourceAdapter,
    location: &LocationId,
    start: NaiveDateTime,
    end: NaiveDateTime,
    rules: &AggregationRules,
) -> Result<TimeSeries, SourceError> {
    let readings = fetch_readings(adapter, location, start, end)?;
    Ok(analysis::build_series(location, &readings, start, end, rules))
}

/// Daily aggregate of one feed for the reporting day `date`.
///
/// Cities get their own feed's aggregate here; the reconciled city value is
/// only produced by `run_report`, which also has the station data.
pub fn build_daily_aggregate(
    adapter: &mut dyn SourceAdapter,
    location: &LocationId,
    date: NaiveDate,
    rules: &AggregationRules,
) -> Result<DailyAggregate, SourceError> {
    let (start, end) = rolling::day_bounds(date, rules);
    let series = build_location_series(adapter, location, start, end, rules)?;
    Ok(rolling::daily_aggregate(&series, date, rules))
}

// ---------------------------------------------------------------------------
// Full run
// ---------------------------------------------------------------------------

/// Freshness of one city's municipal feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedFreshness {
    pub location: LocationId,
    pub freshness: Freshness,
}

/// Everything one run produces.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRun {
    pub table: ReportTable,
    pub coverage: CoverageReport,
    pub alerts: Vec<ExceedanceAlert>,
    pub municipal_freshness: Vec<FeedFreshness>,
}

/// Warning for a municipal feed that has nothing at the report hour.
pub fn freshness_warning(freshness: Freshness) -> Option<String> {
    match freshness {
        Freshness::Current => None,
        Freshness::Stale { latest, hours_behind } => Some(format!(
            "municipal feed is {} h behind (latest {})",
            hours_behind, latest
        )),
        Freshness::Empty => Some("municipal feed returned no observations for the report window".to_string()),
    }
}

struct Fetched {
    series: TimeSeries,
    failed: bool,
}

fn fetch_location(
    adapter: &mut dyn SourceAdapter,
    location: &LocationId,
    start: NaiveDateTime,
    end: NaiveDateTime,
    rules: &AggregationRules,
    archive: Option<&mut ArchiveStore>,
    coverage: &mut Vec<LocationCoverage>,
) -> Fetched {
    match fetch_readings(adapter, location, start, end) {
        Ok(readings) => {
            if let Some(store) = archive {
                let source = adapter.source().to_string();
                if let Err(e) = store.store_readings(&readings, &source) {
                    logging::log_source_failure(DataSource::Archive, &location.to_string(), "store_readings", &e);
                }
            }
            let series = analysis::build_series(location, &readings, start, end, rules);
            coverage.push(coverage::series_coverage(&series));
            Fetched { series, failed: false }
        }
        Err(e) => {
            let series = analysis::build_series(location, &[], start, end, rules);
            coverage.push(coverage::failed_coverage(location, series.len(), &e));
            Fetched { series, failed: true }
        }
    }
}

/// Runs the whole report for `report_hour` against `adapter`.
///
/// When `archive` is given, every successfully fetched reading is stored in
/// it as well. `generated_at` only stamps the coverage report.
pub fn run_report(
    adapter: &mut dyn SourceAdapter,
    report_hour: NaiveDateTime,
    config: &ServiceConfig,
    generated_at: NaiveDateTime,
    mut archive: Option<&mut ArchiveStore>,
) -> ReportRun {
    let rules = &config.aggregation;
    let (start, end) = schedule::report_window(report_hour, rules);
    let date = rolling::day_of(report_hour, rules);
    let source = adapter.source();

    logging::info(
        source,
        None,
        &format!("building report for {} (window {} .. {})", report_hour, start, end),
    );

    let mut coverage = Vec::new();
    let mut failed = 0;

    // Stations
    let mut station_series = Vec::new();
    for location in stations::station_ids() {
        let fetched = fetch_location(adapter, &location, start, end, rules, archive.as_deref_mut(), &mut coverage);
        failed += fetched.failed as usize;
        station_series.push(fetched.series);
    }
    let station_dailies: Vec<DailyAggregate> = station_series
        .iter()
        .map(|s| rolling::daily_aggregate(s, date, rules))
        .collect();

    // Cities
    let mut city_series = Vec::new();
    let mut city_dailies = Vec::new();
    let mut municipal_freshness = Vec::new();
    for city in stations::city_ids() {
        let fetched = fetch_location(adapter, &city, start, end, rules, archive.as_deref_mut(), &mut coverage);
        failed += fetched.failed as usize;
        let municipal = if fetched.failed { None } else { Some(fetched.series) };

        let constituents = stations::constituent_ids(city.code());
        let members: Vec<usize> = station_series
            .iter()
            .enumerate()
            .filter(|(_, s)| constituents.contains(&s.location))
            .map(|(i, _)| i)
            .collect();
        let member_series: Vec<&TimeSeries> = members.iter().map(|&i| &station_series[i]).collect();
        let member_dailies: Vec<&DailyAggregate> = members.iter().map(|&i| &station_dailies[i]).collect();

        let merged = reconcile::reconcile_city_series(&city, municipal, &member_series, start, end, rules);
        if merged.source == CityValueSource::MunicipalFeed {
            let freshness = staleness::feed_freshness(&merged.series, report_hour);
            if let Some(message) = freshness_warning(freshness) {
                logging::warn(source, Some(&city.to_string()), &message);
            }
            municipal_freshness.push(FeedFreshness {
                location: city.clone(),
                freshness,
            });
        }

        let own_daily = rolling::daily_aggregate(&merged.series, date, rules);
        city_dailies.push(reconcile::reconcile_city_daily(&own_daily, &member_dailies));
        city_series.push(merged);
    }

    // Assembly
    let mut inputs: Vec<LocationInput<'_>> = station_series
        .iter()
        .zip(&station_dailies)
        .map(|(series, daily)| LocationInput {
            series,
            daily,
            city_source: None,
        })
        .collect();
    inputs.extend(city_series.iter().zip(&city_dailies).map(|(city, daily)| LocationInput {
        series: &city.series,
        daily,
        city_source: Some(city.source),
    }));

    let calculator = IndexCalculator::new(BreakpointTable::shared());
    let table = report::assemble(
        report_hour,
        date,
        &inputs,
        &calculator,
        config.service.min_reporting_stations,
    );
    if !table.complete {
        logging::warn(
            DataSource::Core,
            None,
            &format!(
                "only {} of {} required stations reported PM2.5 at {}",
                table.reporting_stations, table.min_reporting_stations, report_hour
            ),
        );
    }

    let alerts = exceedance::check_report(&table);
    for alert in &alerts {
        logging::info(DataSource::Core, Some(&alert.location.to_string()), &alert.to_string());
    }

    let total = coverage.len();
    logging::log_fetch_summary(source, total, total - failed, failed);

    ReportRun {
        table,
        coverage: CoverageReport::new(generated_at, report_hour, coverage),
        alerts,
        municipal_freshness,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    /// Adapter that serves one constant PM2.5 value for every location.
    struct Constant(f64);

    impl SourceAdapter for Constant {
        fn source(&self) -> DataSource {
            DataSource::Archive
        }

        fn get_readings(
            &mut self,
            location: &LocationId,
            _pollutants: &[Pollutant],
            start: NaiveDateTime,
            end: NaiveDateTime,
        ) -> Result<Vec<Reading>, SourceError> {
            let mut out = Vec::new();
            let mut t = start;
            while t < end {
                out.push(Reading::new(location.clone(), t, Pollutant::Pm25, Some(self.0)));
                t += Duration::hours(1);
            }
            Ok(out)
        }
    }

    fn hour(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn test_build_location_series_is_calendar_complete() {
        let rules = AggregationRules::default();
        let series = build_location_series(&mut Constant(20.0), &LocationId::station("1151A"), hour(1), hour(11), &rules)
            .expect("constant adapter never fails");
        assert_eq!(series.len(), 10);
        assert!(series.records.iter().all(|r| r.values.pm25 == Some(20.0)));
    }

    #[test]
    fn test_build_daily_aggregate_uses_reporting_day() {
        let rules = AggregationRules::default();
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let daily = build_daily_aggregate(&mut Constant(35.0), &LocationId::station("1151A"), date, &rules)
            .expect("constant adapter never fails");
        assert_eq!(daily.date, date);
        assert_eq!(daily.means.pm25, Some(35.0));
        assert_eq!(daily.mda8, None, "no ozone was served");
    }

    #[test]
    fn test_every_non_current_feed_gets_a_warning() {
        assert_eq!(freshness_warning(Freshness::Current), None);
        let stale = freshness_warning(Freshness::Stale {
            latest: hour(13),
            hours_behind: 2,
        })
        .expect("stale feed warns");
        assert!(stale.contains("2 h behind"), "got {}", stale);
        assert!(
            freshness_warning(Freshness::Empty).is_some(),
            "an empty but successful feed is not current either"
        );
    }

    #[test]
    fn test_run_report_covers_every_registered_location() {
        let config = ServiceConfig::default();
        let run = run_report(&mut Constant(30.0), hour(15), &config, hour(16), None);
        let expected = stations::all_locations().len();
        assert_eq!(run.table.rows.len(), expected);
        assert_eq!(run.coverage.summary.total, expected);
        assert_eq!(run.coverage.summary.failed, 0);
        assert!(run.table.complete);
        assert!(run.alerts.is_empty());
        assert!(
            run.municipal_freshness.iter().all(|f| f.freshness.is_current()),
            "every municipal feed reported the report hour"
        );
    }
}
