//! Value normalization and cross-field sanity rules.
//!
//! Zero is not a valid observed concentration: upstream feeds use it (and
//! negative numbers, dashes, empty strings) for "no data". All of those
//! become `None` here, never `0.0`.
//!
//! PM2.5 is a subset of PM10, so an hour where PM2.5 exceeds PM10 is a
//! sensor fault. The PM10 value is the one discarded.

use crate::logging;
use crate::model::{HourlyRecord, LocationId, PollutantValues};

/// Keeps finite, strictly positive values.
pub fn normalize_concentration(value: f64) -> Option<f64> {
    if value.is_finite() && value > 0.0 {
        Some(value)
    } else {
        None
    }
}

/// Parses an upstream text value. Dashes, blanks and anything non-numeric
/// become `None`.
pub fn parse_concentration(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().and_then(normalize_concentration)
}

/// Parses a JSON value that may arrive as a number or a string.
pub fn concentration_from_json(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().and_then(normalize_concentration),
        serde_json::Value::String(s) => parse_concentration(s),
        _ => None,
    }
}

/// Nulls PM10 when it is smaller than PM2.5. Returns `true` if it did.
pub fn enforce_pm_consistency(values: &mut PollutantValues) -> bool {
    match (values.pm25, values.pm10) {
        (Some(pm25), Some(pm10)) if pm25 > pm10 => {
            values.pm10 = None;
            true
        }
        _ => false,
    }
}

/// Applies `enforce_pm_consistency` to every hour and logs each correction.
/// Returns the number of hours corrected.
pub fn enforce_series_pm_consistency(location: &LocationId, records: &mut [HourlyRecord]) -> usize {
    let mut corrected = 0;
    for record in records.iter_mut() {
        let (pm25, pm10) = (record.values.pm25, record.values.pm10);
        if enforce_pm_consistency(&mut record.values) {
            corrected += 1;
            logging::log_data_quality(
                &location.to_string(),
                &format!(
                    "{} PM2.5 {:?} > PM10 {:?}, PM10 discarded",
                    record.timestamp.format("%Y-%m-%d %H:00"),
                    pm25,
                    pm10
                ),
            );
        }
    }
    corrected
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_zero_and_negative_are_missing_not_zero() {
        assert_eq!(normalize_concentration(0.0), None);
        assert_eq!(normalize_concentration(-3.0), None);
        assert_eq!(normalize_concentration(f64::NAN), None);
        assert_eq!(normalize_concentration(12.5), Some(12.5));
    }

    #[test]
    fn test_parse_concentration_handles_upstream_placeholders() {
        assert_eq!(parse_concentration("35"), Some(35.0));
        assert_eq!(parse_concentration(" 0.6 "), Some(0.6));
        assert_eq!(parse_concentration("—"), None);
        assert_eq!(parse_concentration("-"), None);
        assert_eq!(parse_concentration(""), None);
        assert_eq!(parse_concentration("0"), None);
    }

    #[test]
    fn test_json_values_accept_numbers_and_strings() {
        assert_eq!(concentration_from_json(&serde_json::json!(41)), Some(41.0));
        assert_eq!(concentration_from_json(&serde_json::json!("41")), Some(41.0));
        assert_eq!(concentration_from_json(&serde_json::json!(null)), None);
        assert_eq!(concentration_from_json(&serde_json::json!("—")), None);
    }

    #[test]
    fn test_pm10_below_pm25_is_discarded() {
        let mut values = PollutantValues {
            pm25: Some(80.0),
            pm10: Some(60.0),
            ..Default::default()
        };
        assert!(enforce_pm_consistency(&mut values));
        assert_eq!(values.pm25, Some(80.0), "PM2.5 must be kept");
        assert_eq!(values.pm10, None);
    }

    #[test]
    fn test_consistent_or_partial_pairs_are_untouched() {
        let mut equal = PollutantValues {
            pm25: Some(60.0),
            pm10: Some(60.0),
            ..Default::default()
        };
        assert!(!enforce_pm_consistency(&mut equal));
        assert_eq!(equal.pm10, Some(60.0));

        let mut only_pm25 = PollutantValues {
            pm25: Some(60.0),
            ..Default::default()
        };
        assert!(!enforce_pm_consistency(&mut only_pm25));
    }

    #[test]
    fn test_series_correction_counts_hours() {
        let t0 = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(10, 0, 0).unwrap();
        let mut records = vec![HourlyRecord::empty(t0), HourlyRecord::empty(t0)];
        records[0].values.pm25 = Some(80.0);
        records[0].values.pm10 = Some(60.0);
        records[1].values.pm25 = Some(20.0);
        records[1].values.pm10 = Some(60.0);
        let corrected = enforce_series_pm_consistency(&LocationId::station("1151A"), &mut records);
        assert_eq!(corrected, 1);
        assert_eq!(records[0].values.pm10, None);
        assert_eq!(records[1].values.pm10, Some(60.0));
    }
}
