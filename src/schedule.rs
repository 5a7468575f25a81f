/// Hourly run scheduling.
///
/// The service runs from cron a few times an hour. Each run works out which
/// hour it is reporting on, compares that hour's tag with the last pushed
/// tag stored on disk, and only proceeds when the hour has not been pushed
/// yet.
///
/// # Clock injection
/// Nothing here reads the clock except `local_now`. Every other function
/// takes `now` explicitly so scheduling is deterministic in tests.

use crate::analysis::rolling::{day_bounds, day_of, AggregationRules};
use crate::analysis::alignment::floor_to_hour;
use chrono::{Duration, NaiveDateTime, Timelike, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Upstreams publish an hour's values about half an hour after it ends.
pub const PUBLISH_DELAY_MINUTES: u32 = 30;

/// Current wall-clock time at `utc_offset_hours`.
pub fn local_now(utc_offset_hours: i32) -> NaiveDateTime {
    Utc::now().naive_utc() + Duration::hours(utc_offset_hours as i64)
}

/// Hour a run at `now` reports on: the current hour once its values are
/// published, the previous hour before that.
pub fn report_hour_at(now: NaiveDateTime) -> NaiveDateTime {
    let hour = floor_to_hour(now);
    if now.minute() < PUBLISH_DELAY_MINUTES {
        hour - Duration::hours(1)
    } else {
        hour
    }
}

/// Marker tag for a report hour, e.g. `2024-06-01T15`.
pub fn marker_tag(report_hour: NaiveDateTime) -> String {
    report_hour.format("%Y-%m-%dT%H").to_string()
}

/// Fetch window for a report hour: from the start of its reporting day up
/// to and including the report hour.
pub fn report_window(report_hour: NaiveDateTime, rules: &AggregationRules) -> (NaiveDateTime, NaiveDateTime) {
    let (start, _) = day_bounds(day_of(report_hour, rules), rules);
    (start, report_hour + Duration::hours(1))
}

/// Whether a run should fetch and push.
///
/// Test runs and forced runs always proceed; otherwise the hour must differ
/// from the last pushed one.
pub fn should_push(last_tag: Option<&str>, current_tag: &str, force: bool, test: bool) -> bool {
    test || force || last_tag != Some(current_tag)
}

// ---------------------------------------------------------------------------
// Marker file
// ---------------------------------------------------------------------------

/// The last-pushed marker on disk.
#[derive(Debug, Clone)]
pub struct PushMarker {
    path: PathBuf,
}

impl PushMarker {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored tag, or `None` if nothing has been pushed yet.
    pub fn read(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let tag = content.trim();
                Ok(if tag.is_empty() { None } else { Some(tag.to_string()) })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn write(&self, tag: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, tag)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
