//! Engine configuration.
//!
//! The engine accepts this configuration from its caller; it does not load
//! or parse configuration files itself. Strategy selections are
//! serde-tagged enums so a caller can ship them as JSON alongside the rest
//! of its settings. `build_*` factories turn selections into the boxed
//! strategies injected at construction -- there is no lazy global default
//! instance; callers (and tests) construct their own engine.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ledger::{BatchedLedger, CachedLedger, DirectLedger, RewardLedger};
use crate::multiplier::{
    ExponentialPolicy, LinearPolicy, MultiplierPolicy, MultiplierTier, SeasonalOverlay,
    TieredPolicy,
};
use crate::reward::{
    ContextualCalculator, EventCalculator, ProgressiveCalculator, RewardCalculator,
    StandardCalculator, TieredCalculator, XpLimits,
};
use crate::storage::{ActivityLog, BalanceStore};
use crate::streak::StreakConfig;

/// Multiplier policy selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// Step function over a tier table; `None` uses the default five tiers
    Tiered { tiers: Option<Vec<MultiplierTier>> },
    Linear {
        base: f64,
        increment: f64,
        interval_days: u32,
        cap: f64,
    },
    Exponential {
        base: f64,
        rate: f64,
        interval_days: u32,
        cap: f64,
    },
    /// Wraps another policy with a factor active inside the window
    Seasonal {
        inner: Box<PolicyConfig>,
        factor: f64,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        label: String,
    },
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig::Tiered { tiers: None }
    }
}

/// Reward calculator selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CalculatorConfig {
    Standard,
    /// Standard plus fixed bonuses on milestone days; `None` uses the
    /// default 7/14/30/60/100/200/365 schedule
    Progressive { milestones: Option<Vec<(u32, f64)>> },
    /// Base and bonus scaled by a streak-dependent factor
    Tiered { scales: Option<Vec<(u32, f64)>> },
    /// Wraps another calculator with an event factor inside the window
    Event {
        inner: Box<CalculatorConfig>,
        factor: f64,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    },
    /// Wraps another calculator, applying caller-supplied context
    /// multipliers per invocation
    Contextual { inner: Box<CalculatorConfig> },
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        CalculatorConfig::Standard
    }
}

/// Ledger strategy selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerStrategy {
    Direct,
    Batched {
        flush_threshold: usize,
        flush_interval_secs: i64,
    },
    Cached { ttl_secs: i64 },
}

impl Default for LedgerStrategy {
    fn default() -> Self {
        LedgerStrategy::Direct
    }
}

/// Attestation subsystem settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttestationConfig {
    /// Administrative switch; when false the orchestrator skips the
    /// attestation step entirely
    pub enabled: bool,
    pub schema_id: String,
    pub signer: String,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schema_id: "daily-checkin-v1".to_string(),
            signer: String::new(),
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum streak gap, in hours
    pub max_streak_gap_hours: i64,

    pub base_xp: f64,
    pub weekly_bonus: f64,
    pub daily_bonus: f64,

    /// Minimum XP per successful check-in
    pub minimum_xp: i64,

    /// Optional XP ceiling per check-in
    pub maximum_xp: Option<i64>,

    pub multiplier_policy: PolicyConfig,
    pub reward_calculator: CalculatorConfig,
    pub ledger_strategy: LedgerStrategy,
    pub attestation: AttestationConfig,

    /// Greeting used when the caller supplies none
    pub default_greeting: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_streak_gap_hours: 24,
            base_xp: 10.0,
            weekly_bonus: 5.0,
            daily_bonus: 1.0,
            minimum_xp: 1,
            maximum_xp: None,
            multiplier_policy: PolicyConfig::default(),
            reward_calculator: CalculatorConfig::default(),
            ledger_strategy: LedgerStrategy::default(),
            attestation: AttestationConfig::default(),
            default_greeting: "gm".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn streak_config(&self) -> StreakConfig {
        StreakConfig {
            max_streak_gap_hours: self.max_streak_gap_hours,
        }
    }

    pub fn limits(&self) -> XpLimits {
        XpLimits {
            minimum: self.minimum_xp,
            maximum: self.maximum_xp,
        }
    }

    /// Build the configured multiplier policy.
    ///
    /// # Errors
    /// Returns an error if a custom tier table is invalid.
    pub fn build_policy(&self) -> Result<Box<dyn MultiplierPolicy>, ConfigError> {
        build_policy(&self.multiplier_policy)
    }

    /// Build the configured reward calculator.
    pub fn build_calculator(&self) -> Box<dyn RewardCalculator> {
        build_calculator(&self.reward_calculator, self)
    }

    /// Wrap the store ports in the configured ledger strategy.
    pub fn build_ledger(
        &self,
        balances: Arc<dyn BalanceStore>,
        activities: Arc<dyn ActivityLog>,
    ) -> Box<dyn RewardLedger> {
        let direct = Box::new(DirectLedger::new(balances, activities));
        match &self.ledger_strategy {
            LedgerStrategy::Direct => direct,
            LedgerStrategy::Batched {
                flush_threshold,
                flush_interval_secs,
            } => Box::new(BatchedLedger::new(
                direct,
                *flush_threshold,
                Duration::seconds(*flush_interval_secs),
            )),
            LedgerStrategy::Cached { ttl_secs } => {
                Box::new(CachedLedger::new(direct, Duration::seconds(*ttl_secs)))
            }
        }
    }
}

fn build_policy(config: &PolicyConfig) -> Result<Box<dyn MultiplierPolicy>, ConfigError> {
    Ok(match config {
        PolicyConfig::Tiered { tiers } => match tiers {
            Some(tiers) => Box::new(TieredPolicy::new(tiers.clone())?),
            None => Box::new(TieredPolicy::default()),
        },
        PolicyConfig::Linear {
            base,
            increment,
            interval_days,
            cap,
        } => Box::new(LinearPolicy::new(*base, *increment, *interval_days, *cap)),
        PolicyConfig::Exponential {
            base,
            rate,
            interval_days,
            cap,
        } => Box::new(ExponentialPolicy::new(*base, *rate, *interval_days, *cap)),
        PolicyConfig::Seasonal {
            inner,
            factor,
            starts_at,
            ends_at,
            label,
        } => Box::new(SeasonalOverlay::new(
            build_policy(inner)?,
            *factor,
            *starts_at,
            *ends_at,
            label.clone(),
        )),
    })
}

fn build_calculator(config: &CalculatorConfig, engine: &EngineConfig) -> Box<dyn RewardCalculator> {
    let standard = || {
        StandardCalculator::new(
            engine.base_xp,
            engine.weekly_bonus,
            engine.daily_bonus,
            engine.limits(),
        )
    };
    match config {
        CalculatorConfig::Standard => Box::new(standard()),
        CalculatorConfig::Progressive { milestones } => Box::new(ProgressiveCalculator::new(
            standard(),
            milestones
                .clone()
                .unwrap_or_else(ProgressiveCalculator::default_milestones),
        )),
        CalculatorConfig::Tiered { scales } => Box::new(TieredCalculator::new(
            standard(),
            scales
                .clone()
                .unwrap_or_else(TieredCalculator::default_scales),
        )),
        CalculatorConfig::Event {
            inner,
            factor,
            starts_at,
            ends_at,
        } => Box::new(EventCalculator::new(
            build_calculator(inner, engine),
            *factor,
            *starts_at,
            *ends_at,
        )),
        CalculatorConfig::Contextual { inner } => {
            Box::new(ContextualCalculator::new(build_calculator(inner, engine)))
        }
    }
}
