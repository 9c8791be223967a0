use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, params};

use crate::models::{Measurement, MeasurementRecord, iso_timestamp};

const LAST_FETCH_KEY: &str = "last_fetch";

/// How far back a first sync reaches when no watermark was stored yet.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 3;

const RECORD_COLUMNS: &str = "record_date, fetch_date,
    weight, weight_unit, fat, fat_unit, muscle_mass, muscle_mass_unit,
    muscle_score, muscle_score_unit, visceral_fat_level, visceral_fat_level_unit,
    basal_metabolic_rate, basal_metabolic_rate_unit, body_age, body_age_unit,
    bone_mass, bone_mass_unit";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS measurements (
                    record_date TEXT PRIMARY KEY NOT NULL,
                    fetch_date TEXT NOT NULL,
                    weight REAL NOT NULL,
                    weight_unit TEXT,
                    fat REAL NOT NULL,
                    fat_unit TEXT,
                    muscle_mass REAL NOT NULL,
                    muscle_mass_unit TEXT,
                    muscle_score REAL NOT NULL,
                    muscle_score_unit TEXT,
                    visceral_fat_level REAL NOT NULL,
                    visceral_fat_level_unit TEXT,
                    basal_metabolic_rate REAL NOT NULL,
                    basal_metabolic_rate_unit TEXT,
                    body_age REAL NOT NULL,
                    body_age_unit TEXT,
                    bone_mass REAL NOT NULL,
                    bone_mass_unit TEXT
                );

                CREATE TABLE IF NOT EXISTS sync_state (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
            })
    }

    fn measurement_at(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Measurement> {
        Ok(Measurement {
            value: row.get(idx)?,
            unit: row.get(idx + 1)?,
        })
    }

    fn record_from_row(row: &rusqlite::Row) -> rusqlite::Result<MeasurementRecord> {
        let record_date: String = row.get(0)?;
        let fetch_date: String = row.get(1)?;
        Ok(MeasurementRecord {
            record_date: Self::parse_timestamp(0, &record_date)?,
            fetch_date: Self::parse_timestamp(1, &fetch_date)?,
            weight: Self::measurement_at(row, 2)?,
            fat: Self::measurement_at(row, 4)?,
            muscle_mass: Self::measurement_at(row, 6)?,
            muscle_score: Self::measurement_at(row, 8)?,
            visceral_fat_level: Self::measurement_at(row, 10)?,
            basal_metabolic_rate: Self::measurement_at(row, 12)?,
            body_age: Self::measurement_at(row, 14)?,
            bone_mass: Self::measurement_at(row, 16)?,
        })
    }

    // --- Measurements ---

    /// Upsert records keyed by `record_date`; the last write for a date wins.
    ///
    /// A non-empty batch also moves the watermark to its last `fetch_date`.
    pub fn put_records(&self, records: &[MeasurementRecord]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO measurements ({RECORD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                 ON CONFLICT(record_date) DO UPDATE SET
                    fetch_date = excluded.fetch_date,
                    weight = excluded.weight, weight_unit = excluded.weight_unit,
                    fat = excluded.fat, fat_unit = excluded.fat_unit,
                    muscle_mass = excluded.muscle_mass, muscle_mass_unit = excluded.muscle_mass_unit,
                    muscle_score = excluded.muscle_score, muscle_score_unit = excluded.muscle_score_unit,
                    visceral_fat_level = excluded.visceral_fat_level,
                    visceral_fat_level_unit = excluded.visceral_fat_level_unit,
                    basal_metabolic_rate = excluded.basal_metabolic_rate,
                    basal_metabolic_rate_unit = excluded.basal_metabolic_rate_unit,
                    body_age = excluded.body_age, body_age_unit = excluded.body_age_unit,
                    bone_mass = excluded.bone_mass, bone_mass_unit = excluded.bone_mass_unit"
            ))?;
            for r in records {
                stmt.execute(params![
                    iso_timestamp(&r.record_date),
                    iso_timestamp(&r.fetch_date),
                    r.weight.value,
                    r.weight.unit,
                    r.fat.value,
                    r.fat.unit,
                    r.muscle_mass.value,
                    r.muscle_mass.unit,
                    r.muscle_score.value,
                    r.muscle_score.unit,
                    r.visceral_fat_level.value,
                    r.visceral_fat_level.unit,
                    r.basal_metabolic_rate.value,
                    r.basal_metabolic_rate.unit,
                    r.body_age.value,
                    r.body_age.unit,
                    r.bone_mass.value,
                    r.bone_mass.unit,
                ])?;
            }
        }
        tx.commit()?;

        if let Some(last) = records.last() {
            self.set_watermark(last.fetch_date)?;
        }
        Ok(())
    }

    pub fn get_record(&self, record_date: DateTime<Utc>) -> Result<Option<MeasurementRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM measurements WHERE record_date = ?1"
        ))?;
        let mut rows = stmt.query(params![iso_timestamp(&record_date)])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::record_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// Every stored record, oldest first.
    pub fn get_all_records(&self) -> Result<Vec<MeasurementRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM measurements ORDER BY record_date"
        ))?;
        let records = stmt
            .query_map([], Self::record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Records measured at or after `since`, oldest first.
    pub fn get_records_since(&self, since: DateTime<Utc>) -> Result<Vec<MeasurementRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM measurements WHERE record_date >= ?1 ORDER BY record_date"
        ))?;
        let records = stmt
            .query_map(params![iso_timestamp(&since)], Self::record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count_records(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;
        Ok(count)
    }

    // --- Watermark ---

    pub fn set_watermark(&self, fetched_at: DateTime<Utc>) -> Result<()> {
        let now = iso_timestamp(&Utc::now());
        self.conn.execute(
            "INSERT INTO sync_state (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![LAST_FETCH_KEY, iso_timestamp(&fetched_at), now],
        )?;
        Ok(())
    }

    /// The stored watermark, if a sync ever wrote one.
    pub fn get_last_fetch(&self) -> Result<Option<DateTime<Utc>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM sync_state WHERE key = ?1")?;
        let mut rows = stmt.query(params![LAST_FETCH_KEY])?;
        if let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            let ts = DateTime::parse_from_rfc3339(&value)
                .with_context(|| format!("Corrupt watermark '{value}'"))?;
            Ok(Some(ts.with_timezone(&Utc)))
        } else {
            Ok(None)
        }
    }

    /// The watermark, or `now` minus [`DEFAULT_LOOKBACK_DAYS`] when never set.
    pub fn get_watermark(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        Ok(self
            .get_last_fetch()?
            .unwrap_or_else(|| now - Duration::days(DEFAULT_LOOKBACK_DAYS)))
    }

    pub fn clear_watermark(&self) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_state WHERE key = ?1", params![LAST_FETCH_KEY])?;
        Ok(rows > 0)
    }
}
