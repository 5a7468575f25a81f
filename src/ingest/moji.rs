/// Commercial air quality API client.
///
/// The API is a set of JSON-over-POST endpoints used by a mobile app. Every
/// request carries a `common` block identifying the device and a `params`
/// block for the operation. A device must register once per session to
/// obtain a `uid`.
///
/// Trend endpoints return one pollutant at a time:
///   - `/json/epa/newTrend`: hourly trend for one station.
///   - `/json/epa/trend`:    hourly trend for one city (last 72 hours).
///
/// Both answer `{"trendList": {"list": [{"time": <epoch ms>, "value": n}]}}`.
/// Times are UTC epoch milliseconds and are shifted by the configured UTC
/// offset to local wall-clock time.

use crate::analysis::quality::concentration_from_json;
use crate::config::MojiConfig;
use crate::ingest::{retain_requested, SourceAdapter};
use crate::logging::{self, DataSource};
use crate::model::{LocationId, Pollutant, Reading, SourceError};
use crate::stations;
use chrono::{DateTime, Duration, NaiveDateTime};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration as StdDuration;

pub const DEFAULT_API_HOST: &str = "http://epapi.moji.com";

const REGISTER_PATH: &str = "/json/device/register";
const STATION_TREND_PATH: &str = "/json/epa/newTrend";
const CITY_TREND_PATH: &str = "/json/epa/trend";
const CITY_TREND_HOURS: u32 = 72;

/// Species id the trend endpoints expect for a pollutant.
pub fn species_id(pollutant: Pollutant) -> u32 {
    match pollutant {
        Pollutant::Pm25 => 2,
        Pollutant::Pm10 => 3,
        Pollutant::So2 => 4,
        Pollutant::No2 => 5,
        Pollutant::O3 => 6,
        Pollutant::Co => 7,
    }
}

// ============================================================================
// Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TrendResponse {
    #[serde(rename = "trendList")]
    pub trend_list: Option<TrendList>,
}

#[derive(Debug, Deserialize)]
pub struct TrendList {
    #[serde(default)]
    pub list: Vec<TrendPoint>,
}

#[derive(Debug, Deserialize)]
pub struct TrendPoint {
    /// Epoch milliseconds, as a number or a numeric string.
    pub time: serde_json::Value,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    data: Option<RegisterData>,
}

#[derive(Debug, Deserialize)]
struct RegisterData {
    #[serde(rename = "userId")]
    user_id: i64,
}

// ============================================================================
// Parsing
// ============================================================================

/// Local wall-clock time for UTC epoch milliseconds.
pub fn epoch_millis_to_local(millis: i64, utc_offset_hours: i32) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis)
        .map(|utc| utc.naive_utc() + Duration::hours(utc_offset_hours as i64))
}

fn millis_from_json(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Readings for one pollutant from a trend response body.
///
/// A missing `trendList` is an empty result. Points with an unreadable
/// `time` are skipped.
pub fn parse_trend_response(
    body: &str,
    location: &LocationId,
    pollutant: Pollutant,
    utc_offset_hours: i32,
) -> Result<Vec<Reading>, SourceError> {
    let response: TrendResponse = serde_json::from_str(body)?;
    let points = response.trend_list.map(|t| t.list).unwrap_or_default();

    Ok(points
        .iter()
        .filter_map(|point| {
            let timestamp = millis_from_json(&point.time)
                .and_then(|ms| epoch_millis_to_local(ms, utc_offset_hours))?;
            Some(Reading::new(
                location.clone(),
                timestamp,
                pollutant,
                concentration_from_json(&point.value),
            ))
        })
        .collect())
}

/// `uid` from a device registration response.
pub fn parse_register_response(body: &str) -> Result<i64, SourceError> {
    let response: RegisterResponse = serde_json::from_str(body)?;
    response
        .data
        .map(|d| d.user_id)
        .ok_or_else(|| SourceError::Parse("registration response has no data.userId".into()))
}

// ============================================================================
// Adapter
// ============================================================================

pub struct MojiSource {
    client: reqwest::blocking::Client,
    api_host: String,
    utc_offset_hours: i32,
    uid: Option<i64>,
}

impl MojiSource {
    pub fn new(config: &MojiConfig, utc_offset_hours: i32) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_host: config.api_host.trim_end_matches('/').to_string(),
            utc_offset_hours,
            uid: None,
        })
    }

    fn common(&self, city_id: &str) -> serde_json::Value {
        json!({
            "cityid": city_id,
            "platform": "iPhone",
            "language": "CN",
            "uid": self.uid.unwrap_or(0),
        })
    }

    fn post(&self, path: &str, city_id: &str, params: serde_json::Value) -> Result<String, SourceError> {
        let body = json!({ "common": self.common(city_id), "params": params });
        let response = self
            .client
            .post(format!("{}{}", self.api_host, path))
            .json(&body)
            .send()?;
        if !response.status().is_success() {
            return Err(SourceError::Http(response.status().as_u16()));
        }
        Ok(response.text()?)
    }

    /// Registers the device on first use.
    fn ensure_registered(&mut self, city_id: &str) -> Result<(), SourceError> {
        if self.uid.is_some() {
            return Ok(());
        }
        let body = self.post(REGISTER_PATH, city_id, json!({}))?;
        let uid = parse_register_response(&body)?;
        logging::debug(DataSource::Moji, None, &format!("registered device, uid={}", uid));
        self.uid = Some(uid);
        Ok(())
    }

    fn fetch_trend(&self, location: &LocationId, pollutant: Pollutant) -> Result<Vec<Reading>, SourceError> {
        let body = match location {
            LocationId::Station(code) => {
                let station = stations::find_station(code)
                    .ok_or_else(|| SourceError::UnknownLocation(location.to_string()))?;
                self.post(
                    STATION_TREND_PATH,
                    station.city_code,
                    json!({
                        "aqiType": species_id(pollutant),
                        "cityId": station.city_code,
                        "stationId": station.moji_id,
                    }),
                )?
            }
            LocationId::City(code) => {
                let city = stations::find_city(code)
                    .ok_or_else(|| SourceError::UnknownLocation(location.to_string()))?;
                self.post(
                    CITY_TREND_PATH,
                    city.code,
                    json!({
                        "aqiType": species_id(pollutant),
                        "cityId": city.code,
                        "timeRange": CITY_TREND_HOURS,
                    }),
                )?
            }
        };
        parse_trend_response(&body, location, pollutant, self.utc_offset_hours)
    }
}

impl SourceAdapter for MojiSource {
    fn source(&self) -> DataSource {
        DataSource::Moji
    }

    /// One request per pollutant. A failing pollutant is logged and
    /// skipped; the fetch only fails when every pollutant failed.
    fn get_readings(
        &mut self,
        location: &LocationId,
        pollutants: &[Pollutant],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Reading>, SourceError> {
        let city_id = match location {
            LocationId::Station(code) => stations::find_station(code).map(|s| s.city_code),
            LocationId::City(code) => stations::find_city(code).map(|c| c.code),
        }
        .ok_or_else(|| SourceError::UnknownLocation(location.to_string()))?;
        self.ensure_registered(city_id)?;

        let mut readings = Vec::new();
        let mut first_error = None;
        let mut succeeded = 0usize;

        for &pollutant in pollutants {
            match self.fetch_trend(location, pollutant) {
                Ok(mut batch) => {
                    succeeded += 1;
                    readings.append(&mut batch);
                }
                Err(e) => {
                    logging::log_source_failure(
                        DataSource::Moji,
                        &location.to_string(),
                        &format!("{} trend", pollutant),
                        &e,
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if succeeded == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        retain_requested(&mut readings, pollutants, start, end);
        Ok(readings)
    }
}

// ============================================================================
// Tests
// ============================================================================
