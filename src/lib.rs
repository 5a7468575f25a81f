/// Air quality time series and AQI reporting service.
///
/// Fetches hourly pollutant readings for monitoring stations and cities,
/// aligns them onto a complete hourly calendar, derives 8-hour ozone means,
/// daily aggregates and national AQI values, and assembles an hourly report
/// that can be rendered and pushed.

pub mod alert;
pub mod analysis;
pub mod aqi;
pub mod config;
pub mod coverage;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod schedule;
pub mod stations;
