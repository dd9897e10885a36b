//! # Checkin Core Library
//!
//! This library provides the core business logic for a daily check-in
//! reward engine: streak tracking, multiplier policies, reward
//! calculation, an XP ledger, and the orchestrator that ties them
//! together. Hosting applications own authentication and transport; they
//! hand the engine an authenticated user id and get back a structured
//! outcome.
//!
//! ## Architecture
//!
//! - **Engine**: The check-in orchestrator; one call is one attempt, and
//!   failures come back as outcomes rather than errors
//! - **Streaks**: Continuity and replay over the activity log
//! - **Multipliers / Rewards**: Pluggable policy and calculator
//!   strategies, selected via configuration
//! - **Ledger**: Balance update plus audit append with commit semantics
//! - **Storage**: SQLite reference backend behind black-box store traits
//!
//! ## Key Components
//!
//! - [`CheckinEngine`]: Check-in orchestrator
//! - [`StreakTracker`]: Streak continuity and replay
//! - [`MultiplierPolicy`]: Streak-to-multiplier mapping
//! - [`RewardCalculator`]: XP computation with itemized breakdowns
//! - [`RewardLedger`]: Balance and audit-trail commit
//! - [`CheckinDatabase`]: SQLite persistence

pub mod attestation;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod multiplier;
pub mod reward;
pub mod stats;
pub mod storage;
pub mod streak;

pub use attestation::{
    AttestationClient, AttestationPayload, AttestationReceipt, AttestationRequest,
    DisabledAttestor, LocalAttestor,
};
pub use config::{
    AttestationConfig, CalculatorConfig, EngineConfig, LedgerStrategy, PolicyConfig,
};
pub use engine::{CheckinEngine, CheckinOutcome, CheckinRequest, CheckinStatus, RewardPreview};
pub use error::{
    AttestationError, CalculationError, CheckinError, ConfigError, LedgerError, Result,
    StoreError, StreakError,
};
pub use ledger::{
    BatchedLedger, CachedLedger, CommitReceipt, DirectLedger, MemoryLedger, RewardLedger,
};
pub use multiplier::{
    ExponentialPolicy, LinearPolicy, MultiplierPolicy, MultiplierTier, SeasonalOverlay,
    TierInfo, TierMetadata, TieredPolicy,
};
pub use reward::{
    ContextMultiplier, ContextualCalculator, EventCalculator, ProgressiveCalculator,
    RewardBreakdown, RewardCalculator, RewardContext, StandardCalculator, TieredCalculator,
    XpLimits,
};
pub use stats::{summarize, CheckinStatistics};
pub use storage::{
    ActivityData, ActivityLog, ActivityRecord, BalanceStore, CheckinDatabase, InsertOutcome,
    WindowRow,
};
pub use streak::{StreakConfig, StreakState, StreakTracker};
