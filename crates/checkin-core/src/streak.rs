//! Consecutive-day streak tracking over the activity log.
//!
//! Two timing rules deliberately coexist here, matching the domain rule as
//! shipped:
//!
//! - **Continuity** (`is_streak_broken`, `validate_streak_continuity`)
//!   measures the elapsed gap in *hours* against `max_streak_gap_hours`.
//!   A check-in at 23:00 followed by one at 01:00 the next day (2h gap)
//!   preserves the streak; 00:01 followed by 23:30 two days later (47h)
//!   breaks it even though only one calendar day was skipped.
//! - **History replay** (`calculate_streak`, longest streak) walks distinct
//!   *calendar days* and requires a delta of exactly one day between
//!   successive entries; multiple same-day entries neither break nor
//!   extend a run.
//!
//! Do not unify the two without a deliberate domain-rule change.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StreakError;
use crate::storage::ActivityLog;

/// Configuration for streak continuity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreakConfig {
    /// Maximum gap between check-ins, in hours, before the streak breaks
    pub max_streak_gap_hours: i64,
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            max_streak_gap_hours: 24,
        }
    }
}

/// Derived streak facts for a user. Never persisted; recomputed from the
/// append-only activity history on every eligibility check and check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakState {
    /// Consecutive-day run ending at the most recent check-in
    pub current_streak: u32,

    /// Timestamp of the most recent check-in, if any
    pub last_checkin: Option<DateTime<Utc>>,

    /// Longest consecutive-day run anywhere in the history
    pub longest_streak: u32,

    /// Whether the gap since the last check-in is still below the maximum
    pub is_active: bool,
}

/// Computes streak facts from historical check-in events.
pub struct StreakTracker {
    log: Arc<dyn ActivityLog>,
    config: StreakConfig,
}

impl StreakTracker {
    pub fn new(log: Arc<dyn ActivityLog>, config: StreakConfig) -> Self {
        Self { log, config }
    }

    /// Current consecutive-day streak ending at the most recent entry.
    /// Returns 0 for users with no history.
    ///
    /// # Errors
    /// Returns an error if the activity log query fails.
    pub fn calculate_streak(&self, user_id: &str) -> Result<u32, StreakError> {
        let timestamps = self.log.checkin_timestamps(user_id)?;
        Ok(current_run(&timestamps))
    }

    /// Whether the gap between `last_checkin` and `now` exceeds the
    /// configured maximum. This is the sole continuity rule; calendar-day
    /// boundaries play no part in it.
    pub fn is_streak_broken(&self, last_checkin: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - last_checkin > Duration::hours(self.config.max_streak_gap_hours)
    }

    /// True if the user has no prior check-in, or the gap from the last
    /// check-in to `proposed` does not exceed the maximum.
    ///
    /// # Errors
    /// Returns an error if the activity log query fails.
    pub fn validate_streak_continuity(
        &self,
        user_id: &str,
        proposed: DateTime<Utc>,
    ) -> Result<bool, StreakError> {
        let timestamps = self.log.checkin_timestamps(user_id)?;
        Ok(match timestamps.first() {
            None => true,
            Some(last) => !self.is_streak_broken(*last, proposed),
        })
    }

    /// Full streak state, evaluated at the current instant.
    ///
    /// # Errors
    /// Returns an error if the activity log query fails.
    pub fn streak_info(&self, user_id: &str) -> Result<StreakState, StreakError> {
        self.streak_info_at(user_id, Utc::now())
    }

    /// Full streak state evaluated at `now` (deterministic variant).
    ///
    /// # Errors
    /// Returns an error if the activity log query fails.
    pub fn streak_info_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StreakState, StreakError> {
        let timestamps = self.log.checkin_timestamps(user_id)?;
        let current_streak = current_run(&timestamps);
        let longest_streak = longest_run(&timestamps).max(current_streak);
        let last_checkin = timestamps.first().copied();
        let is_active = last_checkin
            .map(|last| !self.is_streak_broken(last, now))
            .unwrap_or(false);
        Ok(StreakState {
            current_streak,
            last_checkin,
            longest_streak,
            is_active,
        })
    }

    pub fn config(&self) -> StreakConfig {
        self.config
    }
}

/// Distinct calendar days, newest first, from newest-first timestamps.
fn distinct_days_desc(timestamps: &[DateTime<Utc>]) -> Vec<NaiveDate> {
    let mut days: Vec<NaiveDate> = timestamps.iter().map(|t| t.date_naive()).collect();
    days.dedup();
    days
}

/// Length of the consecutive-day run ending at the most recent entry.
fn current_run(timestamps: &[DateTime<Utc>]) -> u32 {
    let days = distinct_days_desc(timestamps);
    let Some(first) = days.first() else {
        return 0;
    };
    let mut streak = 1u32;
    let mut expected = *first;
    for day in days.iter().skip(1) {
        if *day == expected - Duration::days(1) {
            streak += 1;
            expected = *day;
        } else {
            break;
        }
    }
    streak
}

/// Longest consecutive-day run anywhere in the history.
fn longest_run(timestamps: &[DateTime<Utc>]) -> u32 {
    let mut days = distinct_days_desc(timestamps);
    days.sort_unstable();
    days.dedup();
    let mut longest = 0u32;
    let mut run = 0u32;
    let mut prev: Option<NaiveDate> = None;
    for day in days {
        run = match prev {
            Some(p) if day == p + Duration::days(1) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(day);
    }
    longest
}
