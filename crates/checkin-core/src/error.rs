//! Core error types for checkin-core.
//!
//! This module defines the error hierarchy using thiserror. The orchestrator
//! never lets any of these escape to callers of `perform_checkin`; they are
//! converted into a `CheckinOutcome` with `success: false` and a
//! machine-readable code.

use thiserror::Error;

/// Top-level error type for checkin-core.
#[derive(Error, Debug)]
pub enum CheckinError {
    /// Streak computation failed (persistence-layer read error)
    #[error("Streak calculation error: {0}")]
    Streak(#[from] StreakError),

    /// Reserved for calculator-internal invariant violations
    #[error("XP calculation error: {0}")]
    Calculation(#[from] CalculationError),

    /// Balance write or activity append failed
    #[error("XP update error: {0}")]
    Ledger(#[from] LedgerError),

    /// External attestation call failed
    #[error("Attestation error: {0}")]
    Attestation(#[from] AttestationError),

    /// Storage-layer errors outside the ledger path (eligibility, stats)
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Wallet address does not look like a 0x-prefixed 40-hex-digit address
    #[error("Invalid wallet address: {0}")]
    InvalidWallet(String),

    /// Attestation is enabled but no wallet address was supplied
    #[error("No wallet address available for attestation")]
    MissingWallet,

    /// Caller supplied an empty user/profile id
    #[error("Missing user profile id")]
    MissingProfile,

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

impl CheckinError {
    /// Machine-readable code for this error. Callers distinguish expected
    /// outcomes from infrastructure failures via this code, not via a
    /// different return shape.
    pub fn code(&self) -> &'static str {
        match self {
            CheckinError::Streak(_) => "streak_calculation_failed",
            CheckinError::Calculation(_) => "xp_calculation_failed",
            CheckinError::Ledger(LedgerError::Duplicate) => "already_checked_in",
            CheckinError::Ledger(_) => "xp_update_failed",
            CheckinError::Attestation(_) => "attestation_failed",
            CheckinError::Store(_) => "storage_failed",
            CheckinError::Config(_) => "invalid_configuration",
            CheckinError::InvalidWallet(_) => "invalid_wallet",
            CheckinError::MissingWallet => "missing_wallet",
            CheckinError::MissingProfile => "missing_profile",
            CheckinError::Custom(_) => "checkin_failed",
        }
    }

    /// Whether this is an ordinary, non-alarming outcome (bad input,
    /// duplicate check-in) rather than an infrastructure failure.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            CheckinError::Ledger(LedgerError::Duplicate)
                | CheckinError::InvalidWallet(_)
                | CheckinError::MissingWallet
                | CheckinError::MissingProfile
        )
    }
}

/// Streak computation errors.
#[derive(Error, Debug)]
pub enum StreakError {
    /// Activity log query failed
    #[error("Activity log query failed: {0}")]
    Query(#[from] StoreError),
}

/// Calculator-internal invariant violations.
///
/// Nothing in the shipped calculators produces these today; the orchestrator
/// uses them to reject degenerate multiplier inputs before committing.
#[derive(Error, Debug)]
pub enum CalculationError {
    /// Multiplier must be a finite value greater than zero
    #[error("Invalid multiplier {0}")]
    InvalidMultiplier(f64),
}

/// Ledger commit errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Reading the current balance failed
    #[error("Balance read failed: {0}")]
    BalanceRead(#[source] StoreError),

    /// Writing the new balance failed
    #[error("Balance write failed: {0}")]
    BalanceWrite(#[source] StoreError),

    /// Appending the activity record failed
    #[error("Activity append failed: {0}")]
    ActivityAppend(#[source] StoreError),

    /// The store rejected the activity insert as a duplicate check-in
    #[error("Duplicate check-in rejected by the store")]
    Duplicate,
}

/// External attestation errors.
#[derive(Error, Debug)]
pub enum AttestationError {
    /// The attestation subsystem reported a failure
    #[error("Attestation creation failed: {0}")]
    CreateFailed(String),

    /// The attestation response was missing its reference id
    #[error("Attestation response had no reference id")]
    MissingReference,
}

/// Persistence-layer errors surfaced by the black-box store traits.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend query or statement failed
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Store is temporarily locked
    #[error("Storage backend is locked")]
    Locked,

    /// Stored payload could not be decoded
    #[error("Stored payload could not be decoded: {0}")]
    Corrupt(String),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _msg) => {
                if code.code == rusqlite::ErrorCode::DatabaseLocked {
                    StoreError::Locked
                } else {
                    StoreError::Backend(err.to_string())
                }
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Result type alias for CheckinError
pub type Result<T, E = CheckinError> = std::result::Result<T, E>;
