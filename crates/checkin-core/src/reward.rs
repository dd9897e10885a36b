//! XP reward calculators.
//!
//! A calculator turns a streak length and a multiplier into an itemized
//! `RewardBreakdown`. All bonus math is additive before the multiplier is
//! applied; the multiplier applies once, to `(base + bonus)`; truncation to
//! integer XP happens after multiplication via floor, then clamping. The
//! pre-clamp value is kept on the breakdown so the invariant stays
//! auditable.
//!
//! The Event and Contextual variants wrap another calculator by explicit
//! delegation and only adjust the effective multiplier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Clamp bounds for a total XP award.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XpLimits {
    /// Minimum XP for any successful check-in
    pub minimum: i64,

    /// Optional ceiling; `None` means unbounded
    pub maximum: Option<i64>,
}

impl Default for XpLimits {
    fn default() -> Self {
        Self {
            minimum: 1,
            maximum: None,
        }
    }
}

impl XpLimits {
    /// Clamp a raw total into `[minimum, maximum]`.
    pub fn clamp(&self, raw: i64) -> i64 {
        let value = raw.max(self.minimum);
        match self.maximum {
            Some(max) => value.min(max),
            None => value,
        }
    }
}

/// A named multiplier supplied by the caller for one invocation
/// (e.g. "weekend", "anniversary").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMultiplier {
    pub name: String,
    pub factor: f64,
}

impl ContextMultiplier {
    pub fn new(name: impl Into<String>, factor: f64) -> Self {
        Self {
            name: name.into(),
            factor,
        }
    }
}

/// Per-invocation inputs that are not derived internally: the evaluation
/// instant and any caller-supplied context multipliers.
#[derive(Debug, Clone)]
pub struct RewardContext {
    pub now: DateTime<Utc>,
    pub multipliers: Vec<ContextMultiplier>,
}

impl RewardContext {
    /// Context with no extra multipliers.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            multipliers: Vec::new(),
        }
    }

    pub fn with_multipliers(now: DateTime<Utc>, multipliers: Vec<ContextMultiplier>) -> Self {
        Self { now, multipliers }
    }
}

/// Optional itemized components of a breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubBreakdown {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_bonus: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_bonus: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone_bonus: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier_bonus: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_bonus: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_bonus: Option<f64>,
}

/// Itemized XP award, computed fresh per check-in attempt or preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub base_xp: f64,
    pub streak_bonus: f64,
    pub multiplier: f64,

    /// `floor((base_xp + streak_bonus) * multiplier)` before clamping
    pub raw_total_xp: i64,

    /// Raw total clamped into the configured limits
    pub total_xp: i64,

    #[serde(default)]
    pub sub: SubBreakdown,
}

impl RewardBreakdown {
    fn compute(
        base_xp: f64,
        streak_bonus: f64,
        multiplier: f64,
        limits: XpLimits,
        sub: SubBreakdown,
    ) -> Self {
        let raw_total_xp = raw_total(base_xp, streak_bonus, multiplier);
        Self {
            base_xp,
            streak_bonus,
            multiplier,
            raw_total_xp,
            total_xp: limits.clamp(raw_total_xp),
            sub,
        }
    }

    /// Whether clamping changed the awarded total.
    pub fn was_clamped(&self) -> bool {
        self.raw_total_xp != self.total_xp
    }
}

/// Pre-clamp total: floor of `(base + bonus) * multiplier`.
fn raw_total(base: f64, bonus: f64, multiplier: f64) -> i64 {
    ((base + bonus) * multiplier).floor() as i64
}

/// Every reward calculator implements this trait. Calculators are pure:
/// identical inputs always produce identical outputs.
pub trait RewardCalculator: Send + Sync {
    /// Policy-configured base XP per check-in.
    fn base_xp(&self) -> f64;

    /// Additive streak bonus for a streak value.
    fn streak_bonus(&self, streak: u32) -> f64;

    /// Clamp bounds applied to every award.
    fn limits(&self) -> XpLimits;

    /// Total XP: floor of `(base + bonus) * multiplier`, clamped.
    fn total_xp(&self, base: f64, bonus: f64, multiplier: f64) -> i64 {
        self.limits().clamp(raw_total(base, bonus, multiplier))
    }

    /// Full itemized breakdown for a streak and multiplier.
    fn breakdown(&self, streak: u32, multiplier: f64, ctx: &RewardContext) -> RewardBreakdown;
}

/// Standard calculator: weekly bonus per completed week plus a per-day
/// linear bonus for the remaining days.
pub struct StandardCalculator {
    base_xp: f64,
    weekly_bonus: f64,
    daily_bonus: f64,
    limits: XpLimits,
}

impl StandardCalculator {
    pub fn new(base_xp: f64, weekly_bonus: f64, daily_bonus: f64, limits: XpLimits) -> Self {
        Self {
            base_xp,
            weekly_bonus,
            daily_bonus,
            limits,
        }
    }

    fn bonus_parts(&self, streak: u32) -> (f64, f64) {
        let weeks = (streak / 7) as f64;
        let days = streak as f64 - weeks;
        (weeks * self.weekly_bonus, days * self.daily_bonus)
    }
}

impl Default for StandardCalculator {
    fn default() -> Self {
        Self::new(10.0, 5.0, 1.0, XpLimits::default())
    }
}

impl RewardCalculator for StandardCalculator {
    fn base_xp(&self) -> f64 {
        self.base_xp
    }

    fn streak_bonus(&self, streak: u32) -> f64 {
        let (weekly, daily) = self.bonus_parts(streak);
        weekly + daily
    }

    fn limits(&self) -> XpLimits {
        self.limits
    }

    fn breakdown(&self, streak: u32, multiplier: f64, _ctx: &RewardContext) -> RewardBreakdown {
        let (weekly, daily) = self.bonus_parts(streak);
        RewardBreakdown::compute(
            self.base_xp,
            weekly + daily,
            multiplier,
            self.limits,
            SubBreakdown {
                weekly_bonus: Some(weekly),
                daily_bonus: Some(daily),
                ..SubBreakdown::default()
            },
        )
    }
}

/// Progressive calculator: the standard bonus plus a one-time fixed bonus
/// on the exact day a milestone streak is reached.
pub struct ProgressiveCalculator {
    standard: StandardCalculator,
    milestones: Vec<(u32, f64)>,
}

impl ProgressiveCalculator {
    pub fn new(standard: StandardCalculator, milestones: Vec<(u32, f64)>) -> Self {
        Self {
            standard,
            milestones,
        }
    }

    /// Default milestone schedule: 7/14/30/60/100/200/365.
    pub fn default_milestones() -> Vec<(u32, f64)> {
        vec![
            (7, 10.0),
            (14, 20.0),
            (30, 50.0),
            (60, 100.0),
            (100, 150.0),
            (200, 300.0),
            (365, 500.0),
        ]
    }

    fn milestone_bonus(&self, streak: u32) -> f64 {
        self.milestones
            .iter()
            .filter(|(m, _)| *m == streak)
            .map(|(_, bonus)| *bonus)
            .sum()
    }
}

impl Default for ProgressiveCalculator {
    fn default() -> Self {
        Self::new(StandardCalculator::default(), Self::default_milestones())
    }
}

impl RewardCalculator for ProgressiveCalculator {
    fn base_xp(&self) -> f64 {
        self.standard.base_xp()
    }

    fn streak_bonus(&self, streak: u32) -> f64 {
        self.standard.streak_bonus(streak) + self.milestone_bonus(streak)
    }

    fn limits(&self) -> XpLimits {
        self.standard.limits()
    }

    fn breakdown(&self, streak: u32, multiplier: f64, ctx: &RewardContext) -> RewardBreakdown {
        let mut breakdown = self.standard.breakdown(streak, multiplier, ctx);
        let milestone = self.milestone_bonus(streak);
        if milestone > 0.0 {
            breakdown = RewardBreakdown::compute(
                breakdown.base_xp,
                breakdown.streak_bonus + milestone,
                multiplier,
                self.limits(),
                SubBreakdown {
                    milestone_bonus: Some(milestone),
                    ..breakdown.sub
                },
            );
        }
        breakdown
    }
}

/// Tiered calculator: base and bonus are each scaled by a streak-dependent
/// factor distinct from the reward multiplier.
pub struct TieredCalculator {
    standard: StandardCalculator,
    /// `(min_streak, scale)` pairs, ascending by `min_streak`
    scales: Vec<(u32, f64)>,
}

impl TieredCalculator {
    pub fn new(standard: StandardCalculator, mut scales: Vec<(u32, f64)>) -> Self {
        scales.sort_by_key(|(min, _)| *min);
        Self { standard, scales }
    }

    /// Default scale table: 1.0 through streak 6, rising to 1.5 at 100+.
    pub fn default_scales() -> Vec<(u32, f64)> {
        vec![(0, 1.0), (7, 1.1), (30, 1.25), (100, 1.5)]
    }

    fn scale_for(&self, streak: u32) -> f64 {
        self.scales
            .iter()
            .rev()
            .find(|(min, _)| streak >= *min)
            .map(|(_, scale)| *scale)
            .unwrap_or(1.0)
    }
}

impl Default for TieredCalculator {
    fn default() -> Self {
        Self::new(StandardCalculator::default(), Self::default_scales())
    }
}

impl RewardCalculator for TieredCalculator {
    fn base_xp(&self) -> f64 {
        self.standard.base_xp()
    }

    fn streak_bonus(&self, streak: u32) -> f64 {
        self.standard.streak_bonus(streak) * self.scale_for(streak)
    }

    fn limits(&self) -> XpLimits {
        self.standard.limits()
    }

    fn breakdown(&self, streak: u32, multiplier: f64, _ctx: &RewardContext) -> RewardBreakdown {
        let scale = self.scale_for(streak);
        let unscaled_base = self.standard.base_xp();
        let unscaled_bonus = self.standard.streak_bonus(streak);
        let base = unscaled_base * scale;
        let bonus = unscaled_bonus * scale;
        let tier_extra = (base + bonus) - (unscaled_base + unscaled_bonus);
        RewardBreakdown::compute(
            base,
            bonus,
            multiplier,
            self.limits(),
            SubBreakdown {
                tier_bonus: (tier_extra > 0.0).then_some(tier_extra),
                ..SubBreakdown::default()
            },
        )
    }
}

/// Wraps a base calculator, multiplying the effective multiplier by an
/// event factor while the event window is active.
pub struct EventCalculator {
    inner: Box<dyn RewardCalculator>,
    factor: f64,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

impl EventCalculator {
    pub fn new(
        inner: Box<dyn RewardCalculator>,
        factor: f64,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self {
            inner,
            factor: if factor.is_finite() { factor.max(1.0) } else { 1.0 },
            starts_at,
            ends_at,
        }
    }

    fn is_active(&self, now: DateTime<Utc>) -> bool {
        now >= self.starts_at && now < self.ends_at
    }
}

impl RewardCalculator for EventCalculator {
    fn base_xp(&self) -> f64 {
        self.inner.base_xp()
    }

    fn streak_bonus(&self, streak: u32) -> f64 {
        self.inner.streak_bonus(streak)
    }

    fn limits(&self) -> XpLimits {
        self.inner.limits()
    }

    fn breakdown(&self, streak: u32, multiplier: f64, ctx: &RewardContext) -> RewardBreakdown {
        if !self.is_active(ctx.now) {
            return self.inner.breakdown(streak, multiplier, ctx);
        }
        let effective = multiplier * self.factor;
        let mut breakdown = self.inner.breakdown(streak, effective, ctx);
        let plain = raw_total(breakdown.base_xp, breakdown.streak_bonus, multiplier);
        breakdown.sub.event_bonus = Some((breakdown.raw_total_xp - plain) as f64);
        breakdown
    }
}

/// Wraps a base calculator, applying the product of the caller-supplied
/// context multipliers to the effective multiplier.
pub struct ContextualCalculator {
    inner: Box<dyn RewardCalculator>,
}

impl ContextualCalculator {
    pub fn new(inner: Box<dyn RewardCalculator>) -> Self {
        Self { inner }
    }

    fn context_factor(ctx: &RewardContext) -> f64 {
        ctx.multipliers
            .iter()
            .map(|m| if m.factor.is_finite() && m.factor > 0.0 { m.factor } else { 1.0 })
            .product()
    }
}

impl RewardCalculator for ContextualCalculator {
    fn base_xp(&self) -> f64 {
        self.inner.base_xp()
    }

    fn streak_bonus(&self, streak: u32) -> f64 {
        self.inner.streak_bonus(streak)
    }

    fn limits(&self) -> XpLimits {
        self.inner.limits()
    }

    fn breakdown(&self, streak: u32, multiplier: f64, ctx: &RewardContext) -> RewardBreakdown {
        let factor = Self::context_factor(ctx);
        if (factor - 1.0).abs() < f64::EPSILON {
            return self.inner.breakdown(streak, multiplier, ctx);
        }
        let effective = multiplier * factor;
        let mut breakdown = self.inner.breakdown(streak, effective, ctx);
        let plain = raw_total(breakdown.base_xp, breakdown.streak_bonus, multiplier);
        breakdown.sub.context_bonus = Some((breakdown.raw_total_xp - plain) as f64);
        breakdown
    }
}
