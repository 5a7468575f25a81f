//! Data coverage report
//!
//! Summarizes, per location, how much of the fetched window actually holds
//! data and whether the fetch failed outright. Written next to each report
//! so gaps in the upstream feeds can be spotted after the fact.

use crate::model::{LocationId, Pollutant, SourceError, TimeSeries};
use crate::stations;
use chrono::NaiveDateTime;
use serde::Serialize;

// ============================================================================
// Coverage Results
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    pub generated_at: NaiveDateTime,
    pub report_hour: NaiveDateTime,
    pub locations: Vec<LocationCoverage>,
    pub summary: CoverageSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub total: usize,
    pub complete: usize,
    pub partial: usize,
    pub failed: usize,
    /// Hours with at least one observation, summed over all locations.
    pub hours_present: usize,
    pub hours_expected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationCoverage {
    pub location: LocationId,
    pub name: String,
    pub status: CoverageStatus,
    pub hours_expected: usize,
    pub hours_present: usize,
    pub hours_missing: usize,
    /// Pollutants with no observation anywhere in the window.
    pub pollutants_missing: Vec<Pollutant>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoverageStatus {
    /// Every hour has at least one observation.
    Complete,
    /// Some hours are missing, or the fetch returned nothing.
    Partial,
    /// The fetch itself failed.
    Failed,
}

// ============================================================================
// Per-location coverage
// ============================================================================

/// Coverage of a successfully fetched series.
pub fn series_coverage(series: &TimeSeries) -> LocationCoverage {
    let hours_expected = series.len();
    let hours_present = series.observed_hours();
    let pollutants_missing = Pollutant::ALL
        .into_iter()
        .filter(|p| series.latest_observed(*p).is_none())
        .collect();

    let status = if hours_expected > 0 && hours_present == hours_expected {
        CoverageStatus::Complete
    } else {
        CoverageStatus::Partial
    };

    LocationCoverage {
        location: series.location.clone(),
        name: stations::display_name(&series.location),
        status,
        hours_expected,
        hours_present,
        hours_missing: hours_expected - hours_present,
        pollutants_missing,
        error_message: None,
    }
}

/// Coverage of a location whose fetch failed.
pub fn failed_coverage(location: &LocationId, hours_expected: usize, error: &SourceError) -> LocationCoverage {
    LocationCoverage {
        location: location.clone(),
        name: stations::display_name(location),
        status: CoverageStatus::Failed,
        hours_expected,
        hours_present: 0,
        hours_missing: hours_expected,
        pollutants_missing: Pollutant::ALL.to_vec(),
        error_message: Some(error.to_string()),
    }
}

// ============================================================================
// Report
// ============================================================================

impl CoverageReport {
    pub fn new(generated_at: NaiveDateTime, report_hour: NaiveDateTime, locations: Vec<LocationCoverage>) -> Self {
        let mut summary = CoverageSummary {
            total: locations.len(),
            ..CoverageSummary::default()
        };
        for loc in &locations {
            match loc.status {
                CoverageStatus::Complete => summary.complete += 1,
                CoverageStatus::Partial => summary.partial += 1,
                CoverageStatus::Failed => summary.failed += 1,
            }
            summary.hours_present += loc.hours_present;
            summary.hours_expected += loc.hours_expected;
        }

        Self {
            generated_at,
            report_hour,
            locations,
            summary,
        }
    }

    /// Share of expected hours that hold data, in percent.
    pub fn coverage_percent(&self) -> f64 {
        if self.summary.hours_expected == 0 {
            0.0
        } else {
            self.summary.hours_present as f64 / self.summary.hours_expected as f64 * 100.0
        }
    }

    pub fn failed_locations(&self) -> impl Iterator<Item = &LocationCoverage> {
        self.locations.iter().filter(|l| l.status == CoverageStatus::Failed)
    }
}

pub fn print_summary(report: &CoverageReport) {
    println!("\n==============================================================");
    println!("DATA COVERAGE {}", report.report_hour.format("%Y-%m-%d %H:00"));
    println!("==============================================================");
    println!(
        "Locations: {} complete, {} partial, {} failed (of {})",
        report.summary.complete, report.summary.partial, report.summary.failed, report.summary.total
    );
    for loc in report.locations.iter().filter(|l| l.status != CoverageStatus::Complete) {
        match &loc.error_message {
            Some(err) => println!("  x {} ({}): {}", loc.name, loc.location, err),
            None => println!(
                "  ~ {} ({}): {}/{} hours",
                loc.name, loc.location, loc.hours_present, loc.hours_expected
            ),
        }
    }
    println!(
        "Overall coverage: {:.1}% ({}/{} hours)",
        report.coverage_percent(),
        report.summary.hours_present,
        report.summary.hours_expected
    );
    println!("==============================================================");
}
