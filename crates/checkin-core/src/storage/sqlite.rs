//! SQLite reference implementation of the activity log and balance store.
//!
//! The activity table carries a `UNIQUE(user_id, checkin_day)` constraint:
//! the engine's eligibility read is advisory, and this constraint is what
//! actually rejects a duplicate same-day check-in (surfaced as
//! `InsertOutcome::Conflict`).

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::storage::traits::{
    ActivityLog, ActivityRecord, BalanceStore, InsertOutcome, WindowRow,
};

use super::data_dir;

/// SQLite database holding check-in activity and reward accounts.
///
/// The connection sits behind a mutex because the store ports are shared
/// (`Arc<dyn ActivityLog>` / `Arc<dyn BalanceStore>`) across the engine's
/// collaborators.
pub struct CheckinDatabase {
    conn: Mutex<Connection>,
}

impl CheckinDatabase {
    /// Open the database at `~/.config/checkin/checkin.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StoreError> {
        Self::open_at(data_dir()?.join("checkin.db"))
    }

    /// Open the database at an explicit path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.into().as_path())?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (tests, ephemeral use).
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.lock_conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS checkin_activity (
                id             TEXT PRIMARY KEY,
                user_id        TEXT NOT NULL,
                activity_type  TEXT NOT NULL,
                activity_data  TEXT NOT NULL,
                points_earned  INTEGER NOT NULL,
                created_at     TEXT NOT NULL,
                checkin_day    TEXT NOT NULL,
                UNIQUE(user_id, checkin_day)
            );

            CREATE TABLE IF NOT EXISTS reward_accounts (
                user_id            TEXT PRIMARY KEY,
                experience_points  INTEGER NOT NULL DEFAULT 0,
                updated_at         TEXT NOT NULL
            );

            -- Common query patterns: per-user history, window aggregates
            CREATE INDEX IF NOT EXISTS idx_activity_user_created
                ON checkin_activity(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_activity_created
                ON checkin_activity(created_at);",
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite connection poisoned")
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

impl ActivityLog for CheckinDatabase {
    fn checkin_timestamps(&self, user_id: &str) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT created_at FROM checkin_activity
             WHERE user_id = ?1 AND activity_type = ?2
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(
            params![user_id, ActivityRecord::DAILY_CHECKIN],
            |row| row.get::<_, String>(0),
        )?;

        let mut timestamps = Vec::new();
        for raw in rows {
            timestamps.push(parse_timestamp(&raw?)?);
        }
        Ok(timestamps)
    }

    fn has_checkin_today(&self, user_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let day = now.format("%Y-%m-%d").to_string();
        let conn = self.lock_conn();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM checkin_activity
                 WHERE user_id = ?1 AND checkin_day = ?2
                 LIMIT 1",
                params![user_id, day],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn insert_activity(&self, record: &ActivityRecord) -> Result<InsertOutcome, StoreError> {
        let payload = serde_json::to_string(&record.activity_data)?;
        let day = record.created_at.format("%Y-%m-%d").to_string();
        let result = self.lock_conn().execute(
            "INSERT INTO checkin_activity
                 (id, user_id, activity_type, activity_data, points_earned, created_at, checkin_day)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.user_id,
                record.activity_type,
                payload,
                record.points_earned,
                record.created_at.to_rfc3339(),
                day,
            ],
        );
        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(code, _))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(InsertOutcome::Conflict)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn checkins_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WindowRow>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, COUNT(*), COALESCE(SUM(points_earned), 0)
             FROM checkin_activity
             WHERE activity_type = ?1 AND created_at >= ?2 AND created_at < ?3
             GROUP BY user_id",
        )?;
        let rows = stmt.query_map(
            params![
                ActivityRecord::DAILY_CHECKIN,
                start.to_rfc3339(),
                end.to_rfc3339()
            ],
            |row| {
                Ok(WindowRow {
                    user_id: row.get(0)?,
                    checkins: row.get(1)?,
                    points: row.get(2)?,
                })
            },
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl BalanceStore for CheckinDatabase {
    fn read_balance(&self, user_id: &str) -> Result<i64, StoreError> {
        let conn = self.lock_conn();
        let balance: Option<i64> = conn
            .query_row(
                "SELECT experience_points FROM reward_accounts WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(balance.unwrap_or(0))
    }

    fn write_balance(&self, user_id: &str, value: i64) -> Result<(), StoreError> {
        self.lock_conn().execute(
            "INSERT INTO reward_accounts (user_id, experience_points, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 experience_points = excluded.experience_points,
                 updated_at = excluded.updated_at",
            params![user_id, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}
