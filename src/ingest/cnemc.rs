/// National monitoring center publish-service client.
///
/// The publish service is a WCF RIA domain service. Alongside its binary
/// endpoint it exposes a JSON endpoint with the same query operations:
///
///   - `GetAQIDataPublishHistories`: hourly history for one station,
///     filtered on `StationCode`.
///   - `GetCityAQIPublishHistories`: hourly history for one city,
///     filtered on `CityCode`.
///
/// Both answer `{"<Operation>Result": {"TotalCount": n, "RootResults": [...]}}`
/// with one record per hour. `RootResults` may be `null` when nothing was
/// published for the window, which is an empty result, not an error.
///
/// Time filters are .NET ticks of the *local* wall-clock time, which the
/// service compares against its local `TimePoint` column.

use crate::analysis::quality::concentration_from_json;
use crate::config::CnemcConfig;
use crate::ingest::{retain_requested, to_canonical, ConcentrationUnit, SourceAdapter};
use crate::logging::{self, DataSource};
use crate::model::{LocationId, Pollutant, Reading, SourceError};
use crate::stations;
use chrono::{DateTime, Duration, NaiveDateTime};
use std::time::Duration as StdDuration;

pub const DEFAULT_BASE_URL: &str = "https://air.cnemc.cn:18007/ClientBin/\
     Env-CnemcPublish-RiaServices-EnvCnemcPublishDomainService.svc/json";

const STATION_HISTORY_OPERATION: &str = "GetAQIDataPublishHistories";
const CITY_HISTORY_OPERATION: &str = "GetCityAQIPublishHistories";

/// Ticks between 0001-01-01 and the Unix epoch.
const DOTNET_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

// ---------------------------------------------------------------------------
// Query construction
// ---------------------------------------------------------------------------

/// .NET ticks for a local wall-clock time.
pub fn to_dotnet_ticks(local: NaiveDateTime) -> i64 {
    local.and_utc().timestamp() * TICKS_PER_SECOND + DOTNET_EPOCH_TICKS
}

/// Payload field name for a pollutant.
pub fn field_name(pollutant: Pollutant) -> &'static str {
    match pollutant {
        Pollutant::Pm25 => "PM2_5",
        Pollutant::Pm10 => "PM10",
        Pollutant::So2 => "SO2",
        Pollutant::No2 => "NO2",
        Pollutant::O3 => "O3",
        Pollutant::Co => "CO",
    }
}

/// Operation name and `$where` expression for a location's history.
///
/// Station codes are quoted strings in the service's filter language while
/// city codes are integers. Locations missing from the registry are
/// rejected before any request is made.
pub fn history_query(
    location: &LocationId,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<(&'static str, String), SourceError> {
    let window = format!(
        "((it.TimePoint>=DateTime({},\"Local\"))&&(it.TimePoint<DateTime({},\"Local\")))",
        to_dotnet_ticks(start),
        to_dotnet_ticks(end)
    );
    match location {
        LocationId::Station(code) if stations::find_station(code).is_some() => Ok((
            STATION_HISTORY_OPERATION,
            format!("(it.StationCode==\"{}\")&&{}", code, window),
        )),
        LocationId::City(code) if stations::find_city(code).is_some() => Ok((
            CITY_HISTORY_OPERATION,
            format!("(it.CityCode=={})&&{}", code, window),
        )),
        _ => Err(SourceError::UnknownLocation(location.to_string())),
    }
}

/// Full request URL for a location's history.
pub fn build_history_url(
    base_url: &str,
    location: &LocationId,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<reqwest::Url, SourceError> {
    let (operation, filter) = history_query(location, start, end)?;
    let endpoint = format!("{}/{}", base_url.trim_end_matches('/'), operation);
    reqwest::Url::parse_with_params(&endpoint, &[("$where", filter.as_str()), ("$orderby", "it.TimePoint")])
        .map_err(|e| SourceError::Request(format!("invalid URL {}: {}", endpoint, e)))
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Parses a `TimePoint`.
///
/// Accepts WCF JSON dates (`/Date(1717225200000+0800)/`, milliseconds since
/// the epoch plus the publisher's UTC offset) and plain ISO-8601 local times.
pub fn parse_time_point(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Some(inner) = raw.strip_prefix("/Date(").and_then(|s| s.strip_suffix(")/")) {
        let split = inner.rfind(['+', '-']).filter(|&i| i > 0);
        let (millis, offset) = match split {
            Some(i) => (&inner[..i], Some(&inner[i..])),
            None => (inner, None),
        };
        let utc = DateTime::from_timestamp_millis(millis.parse::<i64>().ok()?)?.naive_utc();
        return match offset {
            Some(offset) => {
                let sign = if offset.starts_with('-') { -1 } else { 1 };
                let digits = offset.get(1..)?;
                if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let hours: i64 = digits.get(..2)?.parse().ok()?;
                let minutes: i64 = digits.get(2..)?.parse().ok()?;
                Some(utc + Duration::minutes(sign * (hours * 60 + minutes)))
            }
            None => Some(utc),
        };
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Converts one history response body into readings for `location`.
///
/// Every record yields one reading per pollutant, with unparseable or
/// non-positive values as `None`. Records whose `TimePoint` cannot be
/// parsed are skipped and counted in the log.
pub fn parse_history_response(
    body: &str,
    operation: &str,
    location: &LocationId,
    unit: ConcentrationUnit,
) -> Result<Vec<Reading>, SourceError> {
    let json: serde_json::Value = serde_json::from_str(body)?;
    let result_key = format!("{}Result", operation);
    let result = json
        .get(&result_key)
        .ok_or_else(|| SourceError::Parse(format!("missing `{}`", result_key)))?;

    let records = match result.get("RootResults") {
        None | Some(serde_json::Value::Null) => return Ok(Vec::new()),
        Some(serde_json::Value::Array(records)) => records,
        Some(other) => {
            return Err(SourceError::Parse(format!(
                "`RootResults` is not an array: {}",
                other
            )))
        }
    };

    let mut readings = Vec::with_capacity(records.len() * Pollutant::ALL.len());
    let mut skipped = 0usize;

    for record in records {
        let Some(timestamp) = record
            .get("TimePoint")
            .and_then(|t| t.as_str())
            .and_then(parse_time_point)
        else {
            skipped += 1;
            continue;
        };

        for pollutant in Pollutant::ALL {
            let value = record
                .get(field_name(pollutant))
                .and_then(concentration_from_json)
                .and_then(|v| to_canonical(pollutant, v, unit));
            readings.push(Reading::new(location.clone(), timestamp, pollutant, value));
        }
    }

    if skipped > 0 {
        logging::warn(
            DataSource::Cnemc,
            Some(&location.to_string()),
            &format!("skipped {} records with unparseable TimePoint", skipped),
        );
    }

    Ok(readings)
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct CnemcSource {
    client: reqwest::blocking::Client,
    base_url: String,
    unit: ConcentrationUnit,
}

impl CnemcSource {
    pub fn new(config: &CnemcConfig) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            unit: config.unit,
        })
    }

    fn fetch_body(&self, url: reqwest::Url) -> Result<String, SourceError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()?;
        if !response.status().is_success() {
            return Err(SourceError::Http(response.status().as_u16()));
        }
        Ok(response.text()?)
    }
}

impl SourceAdapter for CnemcSource {
    fn source(&self) -> DataSource {
        DataSource::Cnemc
    }

    fn get_readings(
        &mut self,
        location: &LocationId,
        pollutants: &[Pollutant],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Reading>, SourceError> {
        let (operation, _) = history_query(location, start, end)?;
        let url = build_history_url(&self.base_url, location, start, end)?;
        logging::debug(DataSource::Cnemc, Some(&location.to_string()), &format!("GET {}", url));

        let body = self.fetch_body(url)?;
        let mut readings = parse_history_response(&body, operation, location, self.unit)?;
        retain_requested(&mut readings, pollutants, start, end);
        Ok(readings)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn hour(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    const STATION_BODY: &str = r#"{
        "GetAQIDataPublishHistoriesResult": {
            "TotalCount": 3,
            "RootResults": [
                {"StationCode": "1151A", "TimePoint": "/Date(1717225200000+0800)/",
                 "PM2_5": "35", "PM10": "60", "SO2": "6", "NO2": "28", "O3": "110", "CO": "0.6"},
                {"StationCode": "1151A", "TimePoint": "2024-06-01T16:00:00",
                 "PM2_5": "—", "PM10": 0, "SO2": 5, "NO2": 30, "O3": 120, "CO": 0.7},
                {"StationCode": "1151A", "TimePoint": "garbage",
                 "PM2_5": "40", "PM10": "70", "SO2": "6", "NO2": "28", "O3": "110", "CO": "0.6"}
            ]
        }
    }"#;

    #[test]
    fn test_dotnet_ticks_match_known_value() {
        // 2024-06-01 00:00:00 treated as a wall-clock time.
        let t = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(to_dotnet_ticks(t), 638_527_968_000_000_000);
    }

    #[test]
    fn test_wcf_date_is_shifted_to_publisher_local_time() {
        // 1717225200000 ms is 2024-06-01T07:00:00Z, +0800 gives 15:00 local.
        assert_eq!(parse_time_point("/Date(1717225200000+0800)/"), Some(hour(15)));
        assert_eq!(parse_time_point("/Date(1717225200000)/"), Some(hour(7)));
        assert_eq!(parse_time_point("2024-06-01 15:00:00"), Some(hour(15)));
        assert_eq!(parse_time_point("/Date(abc)/"), None);
        assert_eq!(parse_time_point(""), None);
    }

    #[test]
    fn test_malformed_wcf_offset_is_rejected_without_panicking() {
        assert_eq!(parse_time_point("/Date(1717225200000+1é1)/"), None, "non-ASCII offset");
        assert_eq!(parse_time_point("/Date(1717225200000+08a0)/"), None);
        assert_eq!(parse_time_point("/Date(1717225200000+080)/"), None, "three digits");
        assert_eq!(parse_time_point("/Date(1717225200000-)/"), None);
    }

    #[test]
    fn test_station_history_parses_values_and_keeps_going_after_bad_records() {
        let station = LocationId::station("1151A");
        let readings = parse_history_response(
            STATION_BODY,
            STATION_HISTORY_OPERATION,
            &station,
            ConcentrationUnit::Canonical,
        )
        .expect("valid body should parse");

        // Two good records, six pollutants each; the garbage TimePoint is skipped.
        assert_eq!(readings.len(), 12);
        let at = |t: NaiveDateTime, p: Pollutant| {
            readings
                .iter()
                .find(|r| r.timestamp == t && r.pollutant == p)
                .and_then(|r| r.value)
        };
        assert_eq!(at(hour(15), Pollutant::Pm25), Some(35.0));
        assert_eq!(at(hour(15), Pollutant::Co), Some(0.6));
        assert_eq!(at(hour(16), Pollutant::Pm25), None, "dash is missing");
        assert_eq!(at(hour(16), Pollutant::Pm10), None, "zero is missing, never 0.0");
        assert_eq!(at(hour(16), Pollutant::O3), Some(120.0));
    }

    #[test]
    fn test_null_root_results_is_an_empty_success() {
        let body = r#"{"GetCityAQIPublishHistoriesResult": {"TotalCount": 0, "RootResults": null}}"#;
        let readings = parse_history_response(
            body,
            CITY_HISTORY_OPERATION,
            &LocationId::city("320100"),
            ConcentrationUnit::Canonical,
        )
        .expect("null RootResults is not an error");
        assert!(readings.is_empty());
    }

    #[test]
    fn test_wrong_operation_key_is_a_parse_error() {
        let result = parse_history_response(
            STATION_BODY,
            CITY_HISTORY_OPERATION,
            &LocationId::city("320100"),
            ConcentrationUnit::Canonical,
        );
        assert!(matches!(result, Err(SourceError::Parse(_))), "got {:?}", result);
    }

    #[test]
    fn test_invalid_json_is_a_parse_error() {
        let result = parse_history_response(
            "<html>",
            STATION_HISTORY_OPERATION,
            &LocationId::station("1151A"),
            ConcentrationUnit::Canonical,
        );
        assert!(matches!(result, Err(SourceError::Parse(_))));
    }

    #[test]
    fn test_history_query_distinguishes_stations_and_cities() {
        let (op, filter) = history_query(&LocationId::station("1151A"), hour(1), hour(16)).unwrap();
        assert_eq!(op, STATION_HISTORY_OPERATION);
        assert!(filter.starts_with("(it.StationCode==\"1151A\")"), "{}", filter);

        let (op, filter) = history_query(&LocationId::city("320100"), hour(1), hour(16)).unwrap();
        assert_eq!(op, CITY_HISTORY_OPERATION);
        assert!(filter.starts_with("(it.CityCode==320100)"), "{}", filter);
    }

    #[test]
    fn test_unregistered_location_is_rejected_before_fetching() {
        let result = history_query(&LocationId::station("9999A"), hour(1), hour(16));
        assert_eq!(
            result,
            Err(SourceError::UnknownLocation("station:9999A".into()))
        );
    }

    #[test]
    fn test_history_url_encodes_filter() {
        let url = build_history_url(DEFAULT_BASE_URL, &LocationId::station("1151A"), hour(1), hour(16)).unwrap();
        let text = url.as_str();
        assert!(text.contains("/json/GetAQIDataPublishHistories?"), "{}", text);
        assert!(!text.contains('"'), "quotes must be percent-encoded: {}", text);
        assert!(url.query_pairs().any(|(k, v)| k == "$orderby" && v == "it.TimePoint"));
    }

    #[test]
    #[ignore] // Makes a real request to the publish service
    fn test_live_station_history_returns_readings() {
        let mut source = CnemcSource::new(&CnemcConfig::default()).expect("client should build");
        let end = chrono::Local::now().naive_local();
        let start = end - Duration::hours(6);
        let readings = source
            .get_readings(&LocationId::station("1151A"), &Pollutant::ALL, start, end)
            .expect("publish service should answer");
        println!("fetched {} readings", readings.len());
    }
}
