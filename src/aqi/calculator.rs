//! Overall AQI, category and primary pollutant attribution.
//!
//! Missing concentrations are skipped: a pollutant without a value simply
//! takes no part in the max or the attribution. NaN and infinite values
//! count as missing. Only when all six are missing is there no result at
//! all.

use crate::aqi::breakpoints::{BreakpointKey, BreakpointTable};
use crate::model::{
    AqiCategory, AqiResult, AveragingWindow, DailyAggregate, Pollutant, PollutantValues, SubIndex,
};

/// Primary pollutants are only reported above this index.
pub const PRIMARY_POLLUTANT_THRESHOLD: u32 = 50;

/// Computes AQI results against a shared, read-only breakpoint table.
#[derive(Debug, Clone, Copy)]
pub struct IndexCalculator<'a> {
    table: &'a BreakpointTable,
}

impl<'a> IndexCalculator<'a> {
    pub fn new(table: &'a BreakpointTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &'a BreakpointTable {
        self.table
    }

    /// Individual index of one pollutant under `window`.
    pub fn sub_index(&self, pollutant: Pollutant, window: AveragingWindow, concentration: f64) -> u32 {
        self.table
            .index_for(BreakpointKey::for_pollutant(pollutant, window), concentration)
    }

    /// AQI for a set of concentrations.
    ///
    /// For `AveragingWindow::Daily` the `o3` slot must already hold MDA8;
    /// see `compute_daily` for the usual entry point.
    ///
    /// Returns `None` when every concentration is missing.
    pub fn compute(&self, values: &PollutantValues, window: AveragingWindow) -> Option<AqiResult> {
        let sub_indices: Vec<SubIndex> = values
            .iter()
            .filter_map(|(pollutant, value)| {
                value.filter(|v| v.is_finite()).map(|concentration| SubIndex {
                    pollutant,
                    concentration,
                    index: self.sub_index(pollutant, window, concentration),
                })
            })
            .collect();

        let index = sub_indices.iter().map(|s| s.index).max()?;

        let primaries: Vec<&SubIndex> = if index > PRIMARY_POLLUTANT_THRESHOLD {
            sub_indices.iter().filter(|s| s.index == index).collect()
        } else {
            Vec::new()
        };

        Some(AqiResult {
            index,
            category: AqiCategory::from_index(index),
            primary_pollutants: primaries.iter().map(|s| s.pollutant).collect(),
            primary_concentration: primaries.first().map(|s| s.concentration),
            sub_indices,
        })
    }

    /// Daily AQI from a daily aggregate: 24-hour means for everything except
    /// ozone, which contributes its MDA8.
    pub fn compute_daily(&self, aggregate: &DailyAggregate) -> Option<AqiResult> {
        let mut inputs = aggregate.means;
        inputs.o3 = aggregate.mda8;
        self.compute(&inputs, AveragingWindow::Daily)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
