//! Black-box persistence ports consumed by the engine.
//!
//! The engine treats the activity log and the balance store as external
//! collaborators. The SQLite implementation in this crate is a reference
//! backend; any store that can answer these queries works.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::multiplier::TierInfo;
use crate::reward::RewardBreakdown;

/// Append-only activity record written for every successful check-in.
///
/// This is both the audit trail and the only source the streak tracker
/// reads; no separate streak counter is trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Record id (uuid v4)
    pub id: String,

    /// User/profile id
    pub user_id: String,

    /// Always "daily_checkin" for records written by this engine
    pub activity_type: String,

    /// Audit payload embedded in the record
    pub activity_data: ActivityData,

    /// XP awarded by this check-in
    pub points_earned: i64,

    /// Insertion timestamp
    pub created_at: DateTime<Utc>,
}

/// Audit payload for a daily check-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityData {
    /// Greeting posted with the check-in
    pub greeting: String,

    /// Streak value after this check-in
    pub streak: u32,

    /// External attestation reference, if the subsystem was enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_ref: Option<String>,

    /// Full reward breakdown, kept for audit
    pub breakdown: RewardBreakdown,

    /// Multiplier applied to this award
    pub multiplier: f64,

    /// Tier the user was in at award time
    pub tier_info: TierInfo,

    /// Check-in timestamp
    pub timestamp: DateTime<Utc>,
}

impl ActivityRecord {
    /// The activity type written for every check-in.
    pub const DAILY_CHECKIN: &'static str = "daily_checkin";
}

/// Result of an activity insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Record was appended
    Inserted,
    /// The store rejected the record as a duplicate (user, day) check-in
    Conflict,
}

/// Per-user aggregate row for a statistics window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRow {
    pub user_id: String,
    pub checkins: u64,
    pub points: i64,
}

/// Query/insert port over the append-only check-in activity log.
pub trait ActivityLog: Send + Sync {
    /// Check-in timestamps for a user, newest first.
    fn checkin_timestamps(&self, user_id: &str) -> Result<Vec<DateTime<Utc>>, StoreError>;

    /// Whether the user already has a check-in on the UTC day of `now`.
    ///
    /// This read is advisory; the insert itself is the authority on
    /// duplicates (see `InsertOutcome::Conflict`).
    fn has_checkin_today(&self, user_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Append one activity record.
    fn insert_activity(&self, record: &ActivityRecord) -> Result<InsertOutcome, StoreError>;

    /// Per-user check-in counts and point totals inside a window.
    fn checkins_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WindowRow>, StoreError>;
}

/// Read/write port over the cumulative XP balance store.
pub trait BalanceStore: Send + Sync {
    /// Cumulative experience points for a user (0 for unknown users).
    fn read_balance(&self, user_id: &str) -> Result<i64, StoreError>;

    /// Overwrite the cumulative experience points for a user.
    fn write_balance(&self, user_id: &str, value: i64) -> Result<(), StoreError>;
}
