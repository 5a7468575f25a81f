/// PostgreSQL reading archive and historical replay.
///
/// Every fetched reading can be stored in `aq_raw.hourly_readings`
/// (see `sql/001_aq_raw.sql`). The same table backs `ArchiveSource`, which
/// replays stored data as if it were live: a request for `[start, end)` is
/// answered with the readings from `days_offset` days earlier, shifted
/// forward onto the requested window. This keeps the whole pipeline
/// runnable when the upstreams are unreachable.

use crate::ingest::SourceAdapter;
use crate::logging::{self, DataSource};
use crate::model::{LocationId, Pollutant, Reading, SourceError};
use chrono::{Duration, NaiveDateTime};
use postgres::{Client, NoTls};

pub const ARCHIVE_SCHEMA: &str = "aq_raw";

const UPSERT_READING: &str = "INSERT INTO aq_raw.hourly_readings
         (location_kind, location_code, reading_time, pollutant, value, source)
     VALUES ($1, $2, $3, $4, $5, $6)
     ON CONFLICT (location_kind, location_code, reading_time, pollutant) DO UPDATE
     SET value = COALESCE(EXCLUDED.value, aq_raw.hourly_readings.value),
         source = EXCLUDED.source,
         fetched_at = now()";

/// Connects to the archive database.
pub fn connect(database_url: &str) -> Result<Client, SourceError> {
    Ok(Client::connect(database_url, NoTls)?)
}

/// Connects and checks that the archive schema has been created.
pub fn connect_and_verify(database_url: &str) -> Result<Client, SourceError> {
    let mut client = connect(database_url)?;
    let row = client.query_one(
        "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = $1",
        &[&ARCHIVE_SCHEMA],
    )?;
    let count: i64 = row.get(0);
    if count == 0 {
        return Err(SourceError::Database(format!(
            "schema '{}' not found; apply sql/001_aq_raw.sql",
            ARCHIVE_SCHEMA
        )));
    }
    Ok(client)
}

/// Value of the `location_kind` column.
pub fn location_kind(location: &LocationId) -> &'static str {
    match location {
        LocationId::Station(_) => "station",
        LocationId::City(_) => "city",
    }
}

fn pollutant_codes(pollutants: &[Pollutant]) -> Vec<String> {
    pollutants.iter().map(|p| p.code().to_string()).collect()
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct ArchiveStore {
    client: Client,
}

impl ArchiveStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn connect(database_url: &str) -> Result<Self, SourceError> {
        Ok(Self::new(connect_and_verify(database_url)?))
    }

    /// Stores readings in one transaction; returns the number of rows
    /// written.
    ///
    /// An hour already stored is overwritten by the newer fetch, except that
    /// a NULL never replaces a stored value.
    pub fn store_readings(&mut self, readings: &[Reading], source: &str) -> Result<u64, SourceError> {
        let mut tx = self.client.transaction()?;
        let statement = tx.prepare(UPSERT_READING)?;

        let mut written = 0;
        for reading in readings {
            written += tx.execute(
                &statement,
                &[
                    &location_kind(&reading.location),
                    &reading.location.code(),
                    &reading.timestamp,
                    &reading.pollutant.code(),
                    &reading.value,
                    &source,
                ],
            )?;
        }
        tx.commit()?;
        Ok(written)
    }

    /// Stored readings for `location` in `[start, end)`, ordered by time.
    pub fn query_readings(
        &mut self,
        location: &LocationId,
        pollutants: &[Pollutant],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Reading>, SourceError> {
        let rows = self.client.query(
            "SELECT reading_time, pollutant, value
             FROM aq_raw.hourly_readings
             WHERE location_kind = $1
               AND location_code = $2
               AND reading_time >= $3
               AND reading_time < $4
               AND pollutant = ANY($5)
             ORDER BY reading_time, pollutant",
            &[
                &location_kind(location),
                &location.code(),
                &start,
                &end,
                &pollutant_codes(pollutants),
            ],
        )?;

        let mut readings = Vec::with_capacity(rows.len());
        for row in rows {
            let code: String = row.get(1);
            let Some(pollutant) = Pollutant::from_code(&code) else {
                logging::warn(
                    DataSource::Archive,
                    Some(&location.to_string()),
                    &format!("ignoring stored reading with unknown pollutant '{}'", code),
                );
                continue;
            };
            readings.push(Reading::new(location.clone(), row.get(0), pollutant, row.get(2)));
        }
        Ok(readings)
    }

    /// First and last stored hour for a location.
    pub fn data_range(
        &mut self,
        location: &LocationId,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime)>, SourceError> {
        let row = self.client.query_one(
            "SELECT MIN(reading_time), MAX(reading_time)
             FROM aq_raw.hourly_readings
             WHERE location_kind = $1 AND location_code = $2",
            &[&location_kind(location), &location.code()],
        )?;

        let min: Option<NaiveDateTime> = row.get(0);
        let max: Option<NaiveDateTime> = row.get(1);
        Ok(min.zip(max))
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Replays archived readings `days_offset` days late.
pub struct ArchiveSource {
    store: ArchiveStore,
    days_offset: i64,
}

impl ArchiveSource {
    pub fn new(store: ArchiveStore, days_offset: i64) -> Self {
        Self { store, days_offset }
    }

    /// Archive window answering a request for `[start, end)`.
    pub fn replay_window(&self, start: NaiveDateTime, end: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
        replay_window(start, end, self.days_offset)
    }
}

pub fn replay_window(start: NaiveDateTime, end: NaiveDateTime, days_offset: i64) -> (NaiveDateTime, NaiveDateTime) {
    let offset = Duration::days(days_offset);
    (start - offset, end - offset)
}

/// Moves replayed readings forward onto the requested window.
pub fn shift_forward(readings: &mut [Reading], days_offset: i64) {
    let offset = Duration::days(days_offset);
    for reading in readings.iter_mut() {
        reading.timestamp += offset;
    }
}

impl SourceAdapter for ArchiveSource {
    fn source(&self) -> DataSource {
        DataSource::Archive
    }

    fn get_readings(
        &mut self,
        location: &LocationId,
        pollutants: &[Pollutant],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Reading>, SourceError> {
        let (from, to) = self.replay_window(start, end);
        let mut readings = self.store.query_readings(location, pollutants, from, to)?;
        shift_forward(&mut readings, self.days_offset);
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(day: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn test_replay_window_moves_back_by_offset() {
        assert_eq!(replay_window(t(10, 1), t(10, 16), 7), (t(3, 1), t(3, 16)));
        assert_eq!(replay_window(t(10, 1), t(10, 16), 0), (t(10, 1), t(10, 16)));
    }

    #[test]
    fn test_shift_forward_restores_requested_window() {
        let mut readings = vec![Reading::new(LocationId::station("1151A"), t(3, 5), Pollutant::O3, Some(80.0))];
        shift_forward(&mut readings, 7);
        assert_eq!(readings[0].timestamp, t(10, 5));
        assert_eq!(readings[0].value, Some(80.0));
    }

    #[test]
    fn test_location_kind_matches_schema_check_constraint() {
        assert_eq!(location_kind(&LocationId::station("1151A")), "station");
        assert_eq!(location_kind(&LocationId::city("320100")), "city");
    }

    #[test]
    fn test_upsert_fills_gaps_but_never_clears_values() {
        assert!(UPSERT_READING.contains("DO UPDATE"), "re-fetched hours must be written");
        assert!(
            UPSERT_READING.contains("COALESCE(EXCLUDED.value, aq_raw.hourly_readings.value)"),
            "a NULL in a later fetch must keep the stored value"
        );
        assert!(!UPSERT_READING.contains("DO NOTHING"));
    }

    #[test]
    #[ignore] // Requires DATABASE_URL and sql/001_aq_raw.sql applied
    fn test_store_and_replay_roundtrip() {
        dotenv::dotenv().ok();
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let mut store = ArchiveStore::connect(&url).expect("archive should be reachable");

        let location = LocationId::station("TEST1A");
        let readings = vec![
            Reading::new(location.clone(), t(3, 5), Pollutant::Pm25, Some(41.0)),
            Reading::new(location.clone(), t(3, 6), Pollutant::Pm25, None),
        ];
        store.store_readings(&readings, "TEST").expect("insert should succeed");

        // A later run publishes the missing hour and loses the earlier one.
        let later = vec![
            Reading::new(location.clone(), t(3, 5), Pollutant::Pm25, None),
            Reading::new(location.clone(), t(3, 6), Pollutant::Pm25, Some(55.0)),
        ];
        let again = store.store_readings(&later, "TEST").expect("re-fetch should not error");
        assert_eq!(again, 2, "both existing rows are touched");

        let mut source = ArchiveSource::new(store, 7);
        let replayed = source
            .get_readings(&location, &[Pollutant::Pm25], t(10, 0), t(11, 0))
            .expect("replay should succeed");
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].timestamp, t(10, 5));
        assert_eq!(replayed[0].value, Some(41.0), "NULL never overwrites a stored value");
        assert_eq!(replayed[1].value, Some(55.0), "a NULL row is filled by a later fetch");

        let mut cleanup = connect(&url).expect("connect");
        let _ = cleanup.execute("DELETE FROM aq_raw.hourly_readings WHERE location_code LIKE 'TEST%'", &[]);
    }
}
