//! Concentration breakpoint tables for the national air quality index.
//!
//! Each table maps a pollutant + averaging window to a piecewise-linear
//! sequence of `(concentration, index)` points. Index breakpoints are shared
//! by all tables: 0, 50, 100, 150, 200, 300, 400, 500.
//!
//! Interpolation never extrapolates. Concentrations at or below the first
//! breakpoint map to the first index, and concentrations above the last
//! distinct concentration map to the last index. Some tables end in a flat
//! run (SO2 1-hour and O3 8-hour stop at 800); a concentration sitting exactly
//! on that value maps to the lowest index that reaches it. This differs on
//! purpose from interpolation routines that resolve repeated x values to the
//! last point, which would report 500 for SO2 1-hour at 800.
//!
//! The table is built once and only ever read, so a single instance is safe
//! to share across any number of concurrent calculations.

use crate::model::{AveragingWindow, ConfigError, Pollutant};
use std::str::FromStr;
use std::sync::OnceLock;

/// Index values at each breakpoint, shared by every table.
pub const INDEX_BREAKPOINTS: [f64; 8] = [0.0, 50.0, 100.0, 150.0, 200.0, 300.0, 400.0, 500.0];

/// Absorbs floating point noise before ceiling so that an exact breakpoint
/// (e.g. PM2.5 = 75 → 100) does not round up to the next integer.
const CEIL_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Pollutant + averaging window identifying one breakpoint table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointKey {
    Pm25Day,
    Pm10Day,
    So2Hour,
    So2Day,
    No2Hour,
    No2Day,
    CoHour,
    CoDay,
    O3Hour,
    O3EightHour,
}

impl BreakpointKey {
    pub const ALL: [BreakpointKey; 10] = [
        BreakpointKey::Pm25Day,
        BreakpointKey::Pm10Day,
        BreakpointKey::So2Hour,
        BreakpointKey::So2Day,
        BreakpointKey::No2Hour,
        BreakpointKey::No2Day,
        BreakpointKey::CoHour,
        BreakpointKey::CoDay,
        BreakpointKey::O3Hour,
        BreakpointKey::O3EightHour,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BreakpointKey::Pm25Day => "PM2.5_24H",
            BreakpointKey::Pm10Day => "PM10_24H",
            BreakpointKey::So2Hour => "SO2_1H",
            BreakpointKey::So2Day => "SO2_24H",
            BreakpointKey::No2Hour => "NO2_1H",
            BreakpointKey::No2Day => "NO2_24H",
            BreakpointKey::CoHour => "CO_1H",
            BreakpointKey::CoDay => "CO_24H",
            BreakpointKey::O3Hour => "O3_1H",
            BreakpointKey::O3EightHour => "O3_8H",
        }
    }

    /// Table used for `pollutant` under `window`.
    ///
    /// Particulates have no 1-hour table and always use their 24-hour one.
    /// For the daily AQI, ozone uses its 8-hour table (fed with MDA8) while
    /// every other pollutant uses its 24-hour table.
    pub fn for_pollutant(pollutant: Pollutant, window: AveragingWindow) -> Self {
        match (pollutant, window) {
            (Pollutant::Pm25, _) => BreakpointKey::Pm25Day,
            (Pollutant::Pm10, _) => BreakpointKey::Pm10Day,
            (Pollutant::So2, AveragingWindow::Hourly) => BreakpointKey::So2Hour,
            (Pollutant::So2, AveragingWindow::Daily) => BreakpointKey::So2Day,
            (Pollutant::No2, AveragingWindow::Hourly) => BreakpointKey::No2Hour,
            (Pollutant::No2, AveragingWindow::Daily) => BreakpointKey::No2Day,
            (Pollutant::Co, AveragingWindow::Hourly) => BreakpointKey::CoHour,
            (Pollutant::Co, AveragingWindow::Daily) => BreakpointKey::CoDay,
            (Pollutant::O3, AveragingWindow::Hourly) => BreakpointKey::O3Hour,
            (Pollutant::O3, AveragingWindow::Daily) => BreakpointKey::O3EightHour,
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

impl FromStr for BreakpointKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace("PM25", "PM2.5");
        BreakpointKey::ALL
            .iter()
            .copied()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownBreakpointKey(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// One `(concentration, index)` point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub concentration: f64,
    pub index: f64,
}

/// Concentration columns of the national standard (HJ 633), aligned with
/// `INDEX_BREAKPOINTS`.
const NATIONAL_CONCENTRATIONS: [(BreakpointKey, [f64; 8]); 10] = [
    (BreakpointKey::Pm25Day, [0.0, 35.0, 75.0, 115.0, 150.0, 250.0, 350.0, 500.0]),
    (BreakpointKey::Pm10Day, [0.0, 50.0, 150.0, 250.0, 350.0, 420.0, 500.0, 600.0]),
    (BreakpointKey::So2Hour, [0.0, 150.0, 500.0, 650.0, 800.0, 800.0, 800.0, 800.0]),
    (BreakpointKey::So2Day, [0.0, 50.0, 150.0, 475.0, 800.0, 1600.0, 2100.0, 2620.0]),
    (BreakpointKey::No2Hour, [0.0, 100.0, 200.0, 700.0, 1200.0, 2340.0, 3090.0, 3840.0]),
    (BreakpointKey::No2Day, [0.0, 40.0, 80.0, 180.0, 280.0, 565.0, 750.0, 940.0]),
    (BreakpointKey::CoHour, [0.0, 5.0, 10.0, 35.0, 60.0, 90.0, 120.0, 150.0]),
    (BreakpointKey::CoDay, [0.0, 2.0, 4.0, 14.0, 24.0, 36.0, 48.0, 60.0]),
    (BreakpointKey::O3Hour, [0.0, 160.0, 200.0, 300.0, 400.0, 800.0, 1000.0, 1200.0]),
    (BreakpointKey::O3EightHour, [0.0, 100.0, 160.0, 215.0, 265.0, 800.0, 800.0, 800.0]),
];

/// Immutable set of breakpoint tables, one per `BreakpointKey`.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointTable {
    tables: [Vec<Breakpoint>; 10],
}

impl BreakpointTable {
    /// Builds the national standard tables.
    pub fn national() -> Self {
        let entries = NATIONAL_CONCENTRATIONS.iter().map(|(key, concentrations)| {
            let points = concentrations
                .iter()
                .zip(INDEX_BREAKPOINTS.iter())
                .map(|(&concentration, &index)| Breakpoint { concentration, index })
                .collect();
            (*key, points)
        });
        match Self::from_entries(entries) {
            Ok(table) => table,
            Err(e) => panic!("national breakpoint constants are invalid: {}", e),
        }
    }

    /// Process-wide national table, built on first use.
    pub fn shared() -> &'static BreakpointTable {
        static SHARED: OnceLock<BreakpointTable> = OnceLock::new();
        SHARED.get_or_init(BreakpointTable::national)
    }

    /// Builds a table set from explicit entries.
    ///
    /// Every key must be present exactly once, with at least two points,
    /// non-decreasing concentrations and strictly increasing indices.
    pub fn from_entries<I>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (BreakpointKey, Vec<Breakpoint>)>,
    {
        let mut tables: [Option<Vec<Breakpoint>>; 10] = Default::default();

        for (key, points) in entries {
            if points.len() < 2 {
                return Err(ConfigError::InvalidBreakpoints(format!(
                    "{} needs at least two breakpoints",
                    key.name()
                )));
            }
            for pair in points.windows(2) {
                if pair[1].concentration < pair[0].concentration {
                    return Err(ConfigError::InvalidBreakpoints(format!(
                        "{} concentrations must not decrease",
                        key.name()
                    )));
                }
                if pair[1].index <= pair[0].index {
                    return Err(ConfigError::InvalidBreakpoints(format!(
                        "{} indices must strictly increase",
                        key.name()
                    )));
                }
            }
            let slot = &mut tables[key.slot()];
            if slot.is_some() {
                return Err(ConfigError::InvalidBreakpoints(format!(
                    "{} defined twice",
                    key.name()
                )));
            }
            *slot = Some(points);
        }

        let mut complete: [Vec<Breakpoint>; 10] = Default::default();
        for key in BreakpointKey::ALL {
            match tables[key.slot()].take() {
                Some(points) => complete[key.slot()] = points,
                None => {
                    return Err(ConfigError::InvalidBreakpoints(format!(
                        "{} missing",
                        key.name()
                    )));
                }
            }
        }

        Ok(Self { tables: complete })
    }

    pub fn breakpoints(&self, key: BreakpointKey) -> &[Breakpoint] {
        &self.tables[key.slot()]
    }

    /// Individual index for `concentration`, rounded up to the next integer.
    pub fn index_for(&self, key: BreakpointKey, concentration: f64) -> u32 {
        ceil_nonnegative(self.interpolate_index(key, concentration))
    }

    /// Inverse lookup: the concentration at which `index` is reached,
    /// rounded up to the next integer.
    pub fn concentration_for(&self, key: BreakpointKey, index: f64) -> f64 {
        let points = self.breakpoints(key);
        let first = points[0];
        let last = points[points.len() - 1];

        if index <= first.index {
            return first.concentration;
        }
        if index >= last.index {
            return last.concentration;
        }

        for pair in points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if index <= hi.index {
                let fraction = (index - lo.index) / (hi.index - lo.index);
                let raw = lo.concentration + fraction * (hi.concentration - lo.concentration);
                return ceil_nonnegative(raw) as f64;
            }
        }
        last.concentration
    }

    fn interpolate_index(&self, key: BreakpointKey, concentration: f64) -> f64 {
        let points = self.breakpoints(key);
        let first = points[0];

        if concentration <= first.concentration {
            return first.index;
        }

        for pair in points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if concentration <= hi.concentration {
                let span = hi.concentration - lo.concentration;
                if span <= 0.0 {
                    return hi.index;
                }
                return lo.index + (concentration - lo.concentration) * (hi.index - lo.index) / span;
            }
        }

        points[points.len() - 1].index
    }
}

fn ceil_nonnegative(raw: f64) -> u32 {
    (raw - CEIL_TOLERANCE).ceil().max(0.0) as u32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> &'static BreakpointTable {
        BreakpointTable::shared()
    }

    #[test]
    fn test_exact_breakpoints_map_to_their_index() {
        assert_eq!(table().index_for(BreakpointKey::Pm25Day, 35.0), 50);
        assert_eq!(table().index_for(BreakpointKey::Pm25Day, 75.0), 100);
        assert_eq!(table().index_for(BreakpointKey::Pm25Day, 150.0), 200);
        assert_eq!(table().index_for(BreakpointKey::Pm10Day, 150.0), 100);
        assert_eq!(table().index_for(BreakpointKey::O3EightHour, 160.0), 100);
    }

    #[test]
    fn test_index_rounds_up_between_breakpoints() {
        // 50 + (36 - 35) * 50 / 40 = 51.25
        assert_eq!(table().index_for(BreakpointKey::Pm25Day, 36.0), 52);
        // 0.5 * 50 / 35 = 0.71, still rounds up to 1
        assert_eq!(table().index_for(BreakpointKey::Pm25Day, 0.5), 1);
    }

    #[test]
    fn test_index_is_non_decreasing_for_every_table() {
        for key in BreakpointKey::ALL {
            let mut previous = 0;
            let mut c = 0.0;
            while c <= 4000.0 {
                let index = table().index_for(key, c);
                assert!(
                    index >= previous,
                    "{}: index dropped from {} to {} at {}",
                    key.name(),
                    previous,
                    index,
                    c
                );
                previous = index;
                c += 0.25;
            }
        }
    }

    #[test]
    fn test_concentrations_above_table_clamp_to_last_index() {
        assert_eq!(table().index_for(BreakpointKey::Pm25Day, 500.0), 500);
        assert_eq!(table().index_for(BreakpointKey::Pm25Day, 9_999.0), 500);
        assert_eq!(table().index_for(BreakpointKey::CoDay, 61.0), 500);
    }

    #[test]
    fn test_non_positive_concentrations_clamp_to_zero() {
        assert_eq!(table().index_for(BreakpointKey::No2Day, 0.0), 0);
        assert_eq!(table().index_for(BreakpointKey::No2Day, -5.0), 0);
    }

    #[test]
    fn test_flat_tail_maps_exact_value_to_lowest_index() {
        assert_eq!(table().index_for(BreakpointKey::So2Hour, 800.0), 200, "not 500 at the tail value");
        assert_eq!(table().index_for(BreakpointKey::So2Hour, 800.5), 500);
        assert_eq!(table().index_for(BreakpointKey::O3EightHour, 800.0), 300);
    }

    #[test]
    fn test_concentration_for_inverts_breakpoints() {
        assert_eq!(table().concentration_for(BreakpointKey::Pm25Day, 100.0), 75.0);
        assert_eq!(table().concentration_for(BreakpointKey::Pm25Day, 0.0), 0.0);
        assert_eq!(table().concentration_for(BreakpointKey::Pm25Day, 750.0), 500.0);
        // 35 + (60 - 50) / 50 * 40 = 43
        assert_eq!(table().concentration_for(BreakpointKey::Pm25Day, 60.0), 43.0);
    }

    #[test]
    fn test_roundtrip_stays_within_one_interval() {
        for key in BreakpointKey::ALL {
            let points = table().breakpoints(key);
            let top = points[points.len() - 1].concentration;
            let mut c = 1.0;
            while c < top {
                let back = table().concentration_for(key, table().index_for(key, c) as f64);
                let hi = points
                    .iter()
                    .find(|p| p.concentration >= c)
                    .map(|p| p.concentration)
                    .unwrap_or(top);
                let lo = points
                    .iter()
                    .rev()
                    .find(|p| p.concentration <= c)
                    .map(|p| p.concentration)
                    .unwrap_or(0.0);
                let width = (hi - lo).max(1.0);
                assert!(
                    (back - c).abs() <= width,
                    "{}: {} came back as {} (interval width {})",
                    key.name(),
                    c,
                    back,
                    width
                );
                c += 7.0;
            }
        }
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!("PM2.5_24H".parse::<BreakpointKey>(), Ok(BreakpointKey::Pm25Day));
        assert_eq!("pm25_24h".parse::<BreakpointKey>(), Ok(BreakpointKey::Pm25Day));
        assert_eq!("o3_8h".parse::<BreakpointKey>(), Ok(BreakpointKey::O3EightHour));
        assert_eq!(
            "PM1_24H".parse::<BreakpointKey>(),
            Err(ConfigError::UnknownBreakpointKey("PM1_24H".to_string()))
        );
    }

    #[test]
    fn test_daily_window_uses_eight_hour_ozone() {
        assert_eq!(
            BreakpointKey::for_pollutant(Pollutant::O3, AveragingWindow::Daily),
            BreakpointKey::O3EightHour
        );
        assert_eq!(
            BreakpointKey::for_pollutant(Pollutant::O3, AveragingWindow::Hourly),
            BreakpointKey::O3Hour
        );
        assert_eq!(
            BreakpointKey::for_pollutant(Pollutant::Pm25, AveragingWindow::Hourly),
            BreakpointKey::Pm25Day
        );
    }

    #[test]
    fn test_from_entries_rejects_incomplete_tables() {
        let one = vec![(
            BreakpointKey::Pm25Day,
            vec![
                Breakpoint { concentration: 0.0, index: 0.0 },
                Breakpoint { concentration: 35.0, index: 50.0 },
            ],
        )];
        let err = BreakpointTable::from_entries(one).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBreakpoints(_)));
    }

    #[test]
    fn test_from_entries_rejects_decreasing_concentrations() {
        let mut entries: Vec<_> = BreakpointKey::ALL
            .iter()
            .map(|&k| (k, table().breakpoints(k).to_vec()))
            .collect();
        entries[0].1[2].concentration = 1.0;
        let err = BreakpointTable::from_entries(entries).unwrap_err();
        assert!(err.to_string().contains("must not decrease"), "got: {}", err);
    }
}
