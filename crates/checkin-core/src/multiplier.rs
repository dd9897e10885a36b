//! Streak-to-multiplier policies.
//!
//! A policy maps a streak length to a reward multiplier and a named tier.
//! Policies are pure: `now` enters as an explicit parameter (only the
//! seasonal overlay looks at it), so every variant is deterministic and
//! testable without a clock stub. All variants guarantee a non-decreasing
//! multiplier as the streak grows; constructors clamp or reject
//! configurations that would break that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Display metadata attached to a tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierMetadata {
    pub icon: String,
    pub color: String,
    pub description: String,
}

/// A named, bounded range of streak values mapped to one multiplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplierTier {
    /// First streak value in this tier
    pub min_streak: u32,

    /// Last streak value in this tier; `None` means unbounded
    pub max_streak: Option<u32>,

    /// Multiplier applied while in this tier
    pub multiplier: f64,

    /// Display name
    pub name: String,

    /// Display metadata
    #[serde(default)]
    pub metadata: TierMetadata,
}

impl MultiplierTier {
    /// Whether `streak` falls inside this tier.
    pub fn contains(&self, streak: u32) -> bool {
        streak >= self.min_streak && self.max_streak.map_or(true, |max| streak <= max)
    }
}

/// Compact tier form embedded in activity payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierInfo {
    pub name: String,
    pub multiplier: f64,
}

impl From<&MultiplierTier> for TierInfo {
    fn from(tier: &MultiplierTier) -> Self {
        Self {
            name: tier.name.clone(),
            multiplier: tier.multiplier,
        }
    }
}

/// Every multiplier policy implements this trait. Implementations are
/// injected into the engine at construction and never mutated.
pub trait MultiplierPolicy: Send + Sync {
    /// Multiplier for a streak value. Always >= the multiplier for any
    /// smaller streak.
    fn multiplier_for(&self, streak: u32, now: DateTime<Utc>) -> f64;

    /// Tier table, ascending by `min_streak`, partitioning `[0, inf)`.
    fn tiers(&self, now: DateTime<Utc>) -> Vec<MultiplierTier>;

    /// The tier containing `streak`.
    fn current_tier(&self, streak: u32, now: DateTime<Utc>) -> MultiplierTier {
        let tiers = self.tiers(now);
        tiers
            .iter()
            .find(|t| t.contains(streak))
            .or_else(|| tiers.last())
            .cloned()
            .unwrap_or_else(|| MultiplierTier {
                min_streak: 0,
                max_streak: None,
                multiplier: 1.0,
                name: "Default".to_string(),
                metadata: TierMetadata::default(),
            })
    }

    /// The next tier above `streak`, if any.
    fn next_tier(&self, streak: u32, now: DateTime<Utc>) -> Option<MultiplierTier> {
        self.tiers(now)
            .into_iter()
            .find(|t| t.min_streak > streak)
    }

    /// Linear progress from the current tier toward the next, in `[0, 1]`.
    /// Returns 1.0 at the terminal tier.
    fn progress_to_next_tier(&self, streak: u32, now: DateTime<Utc>) -> f64 {
        let current = self.current_tier(streak, now);
        match self.next_tier(streak, now) {
            None => 1.0,
            Some(next) => {
                let span = next.min_streak.saturating_sub(current.min_streak);
                if span == 0 {
                    return 1.0;
                }
                let done = streak.saturating_sub(current.min_streak);
                (done as f64 / span as f64).clamp(0.0, 1.0)
            }
        }
    }
}

/// Step-function policy over a fixed tier table.
pub struct TieredPolicy {
    tiers: Vec<MultiplierTier>,
}

impl TieredPolicy {
    /// Create a policy from a tier table.
    ///
    /// # Errors
    /// Returns an error if the table is empty, does not start at streak 0,
    /// has gaps or overlaps, has a bounded terminal tier, or has a
    /// non-positive or decreasing multiplier anywhere.
    pub fn new(tiers: Vec<MultiplierTier>) -> Result<Self, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidValue {
            key: "multiplier_policy.tiers".to_string(),
            message: message.to_string(),
        };

        let Some(first) = tiers.first() else {
            return Err(invalid("tier table is empty"));
        };
        if first.min_streak != 0 {
            return Err(invalid("first tier must start at streak 0"));
        }

        for pair in tiers.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            match prev.max_streak {
                None => return Err(invalid("only the last tier may be unbounded")),
                Some(max) if next.min_streak != max + 1 => {
                    return Err(invalid("tiers must be contiguous and ascending"))
                }
                Some(max) if max < prev.min_streak => {
                    return Err(invalid("tier max_streak below min_streak"))
                }
                _ => {}
            }
            if next.multiplier < prev.multiplier {
                return Err(invalid("multipliers must be non-decreasing"));
            }
        }

        // tiers.last() is Some: the table is non-empty
        if tiers.last().map(|t| t.max_streak).unwrap_or(None).is_some() {
            return Err(invalid("last tier must be unbounded"));
        }
        if tiers.iter().any(|t| t.multiplier <= 0.0 || !t.multiplier.is_finite()) {
            return Err(invalid("multipliers must be positive and finite"));
        }

        Ok(Self { tiers })
    }

    /// Default five-tier table, 1.0x at streak 0 through 3.0x at 365+.
    pub fn default_tiers() -> Vec<MultiplierTier> {
        let tier = |min, max, multiplier, name: &str, icon: &str, color: &str, desc: &str| {
            MultiplierTier {
                min_streak: min,
                max_streak: max,
                multiplier,
                name: name.to_string(),
                metadata: TierMetadata {
                    icon: icon.to_string(),
                    color: color.to_string(),
                    description: desc.to_string(),
                },
            }
        };
        vec![
            tier(0, Some(6), 1.0, "Beginner", "🌱", "#9ca3af", "Just getting started"),
            tier(7, Some(29), 1.5, "Consistent", "🔥", "#f59e0b", "One week and counting"),
            tier(30, Some(99), 2.0, "Dedicated", "⚡", "#3b82f6", "A month of daily check-ins"),
            tier(100, Some(364), 2.5, "Committed", "💎", "#8b5cf6", "Triple digits"),
            tier(365, None, 3.0, "Legendary", "👑", "#f43f5e", "A full year, every day"),
        ]
    }
}

impl Default for TieredPolicy {
    fn default() -> Self {
        Self {
            tiers: Self::default_tiers(),
        }
    }
}

impl MultiplierPolicy for TieredPolicy {
    fn multiplier_for(&self, streak: u32, _now: DateTime<Utc>) -> f64 {
        self.tiers
            .iter()
            .find(|t| t.contains(streak))
            .map(|t| t.multiplier)
            .unwrap_or(1.0)
    }

    fn tiers(&self, _now: DateTime<Utc>) -> Vec<MultiplierTier> {
        self.tiers.clone()
    }
}

/// Linearly stepped policy: the multiplier grows by `increment` every
/// `interval_days` of streak, capped at `cap`.
pub struct LinearPolicy {
    base: f64,
    increment: f64,
    interval_days: u32,
    cap: f64,
}

impl LinearPolicy {
    /// Create a linear policy. Negative increments are clamped to zero and
    /// a cap below the base is raised to the base, keeping the multiplier
    /// monotonic for any configuration.
    pub fn new(base: f64, increment: f64, interval_days: u32, cap: f64) -> Self {
        let base = if base.is_finite() { base.max(1.0) } else { 1.0 };
        Self {
            base,
            increment: increment.max(0.0),
            interval_days: interval_days.max(1),
            cap: cap.max(base),
        }
    }

    fn steps_to_cap(&self) -> u32 {
        if self.increment <= 0.0 {
            return 0;
        }
        ((self.cap - self.base) / self.increment).ceil() as u32
    }
}

impl Default for LinearPolicy {
    fn default() -> Self {
        Self::new(1.0, 0.1, 7, 2.5)
    }
}

impl MultiplierPolicy for LinearPolicy {
    fn multiplier_for(&self, streak: u32, _now: DateTime<Utc>) -> f64 {
        let steps = (streak / self.interval_days) as f64;
        (self.base + steps * self.increment).max(self.base).min(self.cap)
    }

    fn tiers(&self, now: DateTime<Utc>) -> Vec<MultiplierTier> {
        synthesize_tiers(self, self.interval_days, self.steps_to_cap(), now)
    }
}

/// Exponentially stepped policy: the multiplier is multiplied by `rate`
/// every `interval_days` of streak, capped at `cap`.
pub struct ExponentialPolicy {
    base: f64,
    rate: f64,
    interval_days: u32,
    cap: f64,
}

impl ExponentialPolicy {
    /// Create an exponential policy. Rates below 1.0 are clamped to 1.0.
    pub fn new(base: f64, rate: f64, interval_days: u32, cap: f64) -> Self {
        let base = if base.is_finite() { base.max(1.0) } else { 1.0 };
        Self {
            base,
            rate: if rate.is_finite() { rate.max(1.0) } else { 1.0 },
            interval_days: interval_days.max(1),
            cap: cap.max(base),
        }
    }

    fn steps_to_cap(&self) -> u32 {
        if self.rate <= 1.0 {
            return 0;
        }
        ((self.cap / self.base).ln() / self.rate.ln()).ceil() as u32
    }
}

impl Default for ExponentialPolicy {
    fn default() -> Self {
        Self::new(1.0, 1.15, 7, 3.0)
    }
}

impl MultiplierPolicy for ExponentialPolicy {
    fn multiplier_for(&self, streak: u32, _now: DateTime<Utc>) -> f64 {
        let steps = (streak / self.interval_days) as i32;
        (self.base * self.rate.powi(steps)).min(self.cap)
    }

    fn tiers(&self, now: DateTime<Utc>) -> Vec<MultiplierTier> {
        synthesize_tiers(self, self.interval_days, self.steps_to_cap(), now)
    }
}

/// Build a tier table for formula-driven policies: one tier per interval
/// step up to the cap, then a single unbounded terminal tier.
fn synthesize_tiers<P: MultiplierPolicy + ?Sized>(
    policy: &P,
    interval_days: u32,
    steps_to_cap: u32,
    now: DateTime<Utc>,
) -> Vec<MultiplierTier> {
    let mut tiers = Vec::new();
    for step in 0..steps_to_cap {
        let min = step * interval_days;
        let multiplier = policy.multiplier_for(min, now);
        tiers.push(MultiplierTier {
            min_streak: min,
            max_streak: Some(min + interval_days - 1),
            multiplier,
            name: format!("{multiplier:.2}x"),
            metadata: TierMetadata::default(),
        });
    }
    let terminal_min = steps_to_cap * interval_days;
    let multiplier = policy.multiplier_for(terminal_min, now);
    tiers.push(MultiplierTier {
        min_streak: terminal_min,
        max_streak: None,
        multiplier,
        name: format!("{multiplier:.2}x"),
        metadata: TierMetadata::default(),
    });
    tiers
}

/// Wraps another policy, scaling its output by a seasonal factor while
/// `now` falls inside the event window. The tier listing is scaled and
/// re-labeled only while the window is active.
pub struct SeasonalOverlay {
    inner: Box<dyn MultiplierPolicy>,
    factor: f64,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    label: String,
}

impl SeasonalOverlay {
    /// Wrap `inner` with a seasonal factor active in `[starts_at, ends_at)`.
    /// Factors below 1.0 are clamped to 1.0 to preserve monotonicity of the
    /// combined policy across the window boundary.
    pub fn new(
        inner: Box<dyn MultiplierPolicy>,
        factor: f64,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            factor: if factor.is_finite() { factor.max(1.0) } else { 1.0 },
            starts_at,
            ends_at,
            label: label.into(),
        }
    }

    fn is_active(&self, now: DateTime<Utc>) -> bool {
        now >= self.starts_at && now < self.ends_at
    }
}

impl MultiplierPolicy for SeasonalOverlay {
    fn multiplier_for(&self, streak: u32, now: DateTime<Utc>) -> f64 {
        let inner = self.inner.multiplier_for(streak, now);
        if self.is_active(now) {
            inner * self.factor
        } else {
            inner
        }
    }

    fn tiers(&self, now: DateTime<Utc>) -> Vec<MultiplierTier> {
        let mut tiers = self.inner.tiers(now);
        if self.is_active(now) {
            for tier in &mut tiers {
                tier.multiplier *= self.factor;
                tier.name = format!("{} ({})", tier.name, self.label);
            }
        }
        tiers
    }
}
