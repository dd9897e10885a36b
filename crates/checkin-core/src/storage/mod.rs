//! Persistence ports and the SQLite reference backend.

pub mod sqlite;
pub mod traits;

pub use sqlite::CheckinDatabase;
pub use traits::{ActivityData, ActivityLog, ActivityRecord, BalanceStore, InsertOutcome, WindowRow};

use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Returns `~/.config/checkin[-dev]/`, created if absent.
///
/// Set CHECKIN_ENV=dev to keep development data separate from the
/// production database.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn data_dir() -> Result<PathBuf, StoreError> {
    let base = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");
    data_dir_under(&base, std::env::var("CHECKIN_ENV").ok().as_deref())
}

fn data_dir_under(base: &Path, env: Option<&str>) -> Result<PathBuf, StoreError> {
    let dir = base.join(match env {
        Some("dev") => "checkin-dev",
        _ => "checkin",
    });
    std::fs::create_dir_all(&dir).map_err(|e| {
        StoreError::Backend(format!("cannot create data dir {}: {e}", dir.display()))
    })?;
    Ok(dir)
}
