//! Aggregate check-in statistics over a time window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::WindowRow;

/// Summary of check-in activity inside a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckinStatistics {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_checkins: u64,
    pub unique_users: u64,
    pub total_xp_awarded: i64,
    pub average_checkins_per_user: f64,

    /// Per-user rows, as returned by the store
    pub rows: Vec<WindowRow>,
}

/// Summarize per-user aggregate rows. An empty window produces zeroes
/// rather than an error.
pub fn summarize(
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    rows: Vec<WindowRow>,
) -> CheckinStatistics {
    let total_checkins: u64 = rows.iter().map(|r| r.checkins).sum();
    let total_xp_awarded: i64 = rows.iter().map(|r| r.points).sum();
    let unique_users = rows.len() as u64;
    let average_checkins_per_user = if unique_users == 0 {
        0.0
    } else {
        total_checkins as f64 / unique_users as f64
    };
    CheckinStatistics {
        window_start,
        window_end,
        total_checkins,
        unique_users,
        total_xp_awarded,
        average_checkins_per_user,
        rows,
    }
}
