//! Check-in orchestrator.
//!
//! One call to `perform_checkin` is one attempt: eligibility, streak
//! projection, reward computation, optional attestation, ledger commit.
//! The orchestrator never lets an error escape -- every failure path
//! produces a `CheckinOutcome` with `success: false` and a
//! machine-readable code. "Already checked in" and bad-input outcomes are
//! ordinary results, not alarms.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attestation::{
    AttestationClient, AttestationPayload, AttestationRequest, DisabledAttestor, LocalAttestor,
};
use crate::config::{AttestationConfig, EngineConfig};
use crate::error::{CalculationError, CheckinError, LedgerError, Result};
use crate::ledger::RewardLedger;
use crate::multiplier::{MultiplierPolicy, TierInfo};
use crate::reward::{ContextMultiplier, RewardBreakdown, RewardCalculator, RewardContext};
use crate::stats::{self, CheckinStatistics};
use crate::storage::{ActivityData, ActivityLog, ActivityRecord, BalanceStore, CheckinDatabase};
use crate::streak::{StreakState, StreakTracker};

/// One check-in attempt. The caller is assumed to hold an authenticated
/// identity; this engine only validates shapes.
#[derive(Debug, Clone, Default)]
pub struct CheckinRequest {
    /// User/profile id
    pub user_id: String,

    /// Wallet address; required when attestation is enabled
    pub wallet_address: Option<String>,

    /// Greeting to record; the configured default is used when `None`
    pub greeting: Option<String>,

    /// Caller-supplied context multipliers for this invocation
    pub context_multipliers: Vec<ContextMultiplier>,
}

impl CheckinRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}

/// Result of one check-in attempt. Failure paths use the same shape with
/// `success: false`; callers distinguish expected outcomes from
/// infrastructure failures via `code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinOutcome {
    pub success: bool,
    pub xp_earned: i64,

    /// Streak before this attempt
    pub current_streak: u32,

    /// Streak after a successful attempt; equals `current_streak` on
    /// failure
    pub new_streak: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_ref: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<RewardBreakdown>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl CheckinOutcome {
    fn failure(err: &CheckinError, current_streak: u32) -> Self {
        Self {
            success: false,
            xp_earned: 0,
            current_streak,
            new_streak: current_streak,
            attestation_ref: None,
            breakdown: None,
            error: Some(err.to_string()),
            code: Some(err.code().to_string()),
        }
    }

    fn already_checked_in(current_streak: u32) -> Self {
        Self {
            success: false,
            xp_earned: 0,
            current_streak,
            new_streak: current_streak,
            attestation_ref: None,
            breakdown: None,
            error: Some("Already checked in today".to_string()),
            code: Some("already_checked_in".to_string()),
        }
    }
}

/// Read-only check-in status for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinStatus {
    pub checked_in_today: bool,
    pub can_check_in: bool,
    pub streak: StreakState,

    /// When the next check-in becomes available (start of the next UTC
    /// day), present only after today's check-in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_available: Option<DateTime<Utc>>,
}

/// What the next check-in would award, without performing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardPreview {
    pub current_streak: u32,
    pub projected_streak: u32,
    pub multiplier: f64,
    pub tier: TierInfo,
    pub breakdown: RewardBreakdown,
}

/// The check-in orchestrator. Strategies are injected at construction and
/// never swapped afterwards; tests construct their own engine with test
/// doubles rather than resetting shared state.
pub struct CheckinEngine {
    activity_log: Arc<dyn ActivityLog>,
    streaks: StreakTracker,
    policy: Box<dyn MultiplierPolicy>,
    calculator: Box<dyn RewardCalculator>,
    ledger: Box<dyn RewardLedger>,
    attestor: Box<dyn AttestationClient>,
    attestation: AttestationConfig,
    default_greeting: String,
}

impl CheckinEngine {
    /// Build an engine from configuration and store ports.
    ///
    /// # Errors
    /// Returns an error if the configured policy is invalid.
    pub fn new(
        config: &EngineConfig,
        activity_log: Arc<dyn ActivityLog>,
        balances: Arc<dyn BalanceStore>,
        attestor: Box<dyn AttestationClient>,
    ) -> Result<Self> {
        let ledger = config.build_ledger(balances, Arc::clone(&activity_log));
        Ok(Self {
            streaks: StreakTracker::new(Arc::clone(&activity_log), config.streak_config()),
            activity_log,
            policy: config.build_policy()?,
            calculator: config.build_calculator(),
            ledger,
            attestor,
            attestation: config.attestation.clone(),
            default_greeting: config.default_greeting.clone(),
        })
    }

    /// Fully injected constructor, for callers assembling their own
    /// strategies (and for tests).
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        activity_log: Arc<dyn ActivityLog>,
        streaks: StreakTracker,
        policy: Box<dyn MultiplierPolicy>,
        calculator: Box<dyn RewardCalculator>,
        ledger: Box<dyn RewardLedger>,
        attestor: Box<dyn AttestationClient>,
        attestation: AttestationConfig,
        default_greeting: impl Into<String>,
    ) -> Self {
        Self {
            activity_log,
            streaks,
            policy,
            calculator,
            ledger,
            attestor,
            attestation,
            default_greeting: default_greeting.into(),
        }
    }

    /// Open an engine backed by the default SQLite database.
    ///
    /// With attestation enabled this uses the local digest attestor;
    /// production callers inject their real client via `new`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the
    /// configuration is invalid.
    pub fn open_default(config: &EngineConfig) -> Result<Self> {
        let db = Arc::new(CheckinDatabase::open()?);
        let attestor: Box<dyn AttestationClient> = if config.attestation.enabled {
            Box::new(LocalAttestor::new(config.attestation.signer.clone()))
        } else {
            Box::new(DisabledAttestor)
        };
        Self::new(config, Arc::clone(&db) as _, db as _, attestor)
    }

    /// Perform one check-in attempt at the current instant.
    pub fn perform_checkin(&self, request: &CheckinRequest) -> CheckinOutcome {
        self.perform_checkin_at(request, Utc::now())
    }

    /// Perform one check-in attempt at `now` (deterministic variant).
    pub fn perform_checkin_at(&self, request: &CheckinRequest, now: DateTime<Utc>) -> CheckinOutcome {
        if let Err(err) = self.validate_request(request) {
            return CheckinOutcome::failure(&err, self.known_streak(&request.user_id));
        }
        let user_id = request.user_id.as_str();

        // Eligibility: the store's today-check, not the hour-gap rule.
        match self.activity_log.has_checkin_today(user_id, now) {
            Ok(true) => {
                debug!(user_id, "check-in rejected: already checked in today");
                return CheckinOutcome::already_checked_in(self.known_streak(user_id));
            }
            Ok(false) => {}
            Err(err) => {
                let known = self.known_streak(user_id);
                return CheckinOutcome::failure(&CheckinError::Store(err), known);
            }
        }

        // Streak projection: continuity decides between +1 and a reset.
        let current_streak = match self.streaks.calculate_streak(user_id) {
            Ok(streak) => streak,
            Err(err) => return CheckinOutcome::failure(&err.into(), 0),
        };
        let continuous = match self.streaks.validate_streak_continuity(user_id, now) {
            Ok(continuous) => continuous,
            Err(err) => return CheckinOutcome::failure(&err.into(), current_streak),
        };
        let new_streak = if continuous { current_streak + 1 } else { 1 };

        // Reward computation.
        let multiplier = self.policy.multiplier_for(new_streak, now);
        if !multiplier.is_finite() || multiplier <= 0.0 {
            let err = CheckinError::Calculation(CalculationError::InvalidMultiplier(multiplier));
            return CheckinOutcome::failure(&err, current_streak);
        }
        let ctx = RewardContext::with_multipliers(now, request.context_multipliers.clone());
        let breakdown = self.calculator.breakdown(new_streak, multiplier, &ctx);
        let tier: TierInfo = (&self.policy.current_tier(new_streak, now)).into();
        let greeting = request
            .greeting
            .clone()
            .unwrap_or_else(|| self.default_greeting.clone());

        // Attestation: skipped transparently when disabled; fatal when
        // enabled and failing (no partial credit).
        let attestation_ref = if self.attestation.enabled && self.attestor.is_enabled() {
            // validate_request guarantees a wallet when attestation is on
            let recipient = request.wallet_address.clone().unwrap_or_default();
            let attestation_request = AttestationRequest {
                schema_id: self.attestation.schema_id.clone(),
                recipient,
                payload: AttestationPayload {
                    user_id: user_id.to_string(),
                    timestamp: now,
                    greeting: greeting.clone(),
                    xp_awarded: breakdown.total_xp,
                    streak: new_streak,
                },
                signer: self.attestation.signer.clone(),
            };
            match self.attestor.create_attestation(&attestation_request) {
                Ok(receipt) => Some(receipt.reference_id),
                Err(err) => {
                    warn!(user_id, %err, "attestation failed; aborting check-in");
                    return CheckinOutcome::failure(&err.into(), current_streak);
                }
            }
        } else {
            None
        };

        // Commit.
        let record = ActivityRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            activity_type: ActivityRecord::DAILY_CHECKIN.to_string(),
            activity_data: ActivityData {
                greeting,
                streak: new_streak,
                attestation_ref: attestation_ref.clone(),
                breakdown: breakdown.clone(),
                multiplier,
                tier_info: tier,
                timestamp: now,
            },
            points_earned: breakdown.total_xp,
            created_at: now,
        };
        match self.ledger.commit(user_id, breakdown.total_xp, &record) {
            Ok(receipt) => {
                info!(
                    user_id,
                    xp = breakdown.total_xp,
                    new_streak,
                    audit_recorded = receipt.audit_recorded,
                    "check-in committed"
                );
                CheckinOutcome {
                    success: true,
                    xp_earned: breakdown.total_xp,
                    current_streak,
                    new_streak,
                    attestation_ref,
                    breakdown: Some(breakdown),
                    error: None,
                    code: None,
                }
            }
            Err(LedgerError::Duplicate) => {
                // The advisory eligibility read raced a concurrent attempt.
                CheckinOutcome::already_checked_in(current_streak)
            }
            Err(err) => CheckinOutcome::failure(&err.into(), current_streak),
        }
    }

    /// Can/has-checked-in-today plus the next available time.
    ///
    /// # Errors
    /// Returns an error if the activity log query fails.
    pub fn status(&self, user_id: &str) -> Result<CheckinStatus> {
        self.status_at(user_id, Utc::now())
    }

    /// Status evaluated at `now` (deterministic variant).
    ///
    /// # Errors
    /// Returns an error if the activity log query fails.
    pub fn status_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<CheckinStatus> {
        let checked_in_today = self.activity_log.has_checkin_today(user_id, now)?;
        let streak = self.streaks.streak_info_at(user_id, now)?;
        let next_available = checked_in_today
            .then(|| {
                (now.date_naive() + Duration::days(1))
                    .and_hms_opt(0, 0, 0)
                    .map(|t| t.and_utc())
            })
            .flatten();
        Ok(CheckinStatus {
            checked_in_today,
            can_check_in: !checked_in_today,
            streak,
            next_available,
        })
    }

    /// What the next check-in would award, without performing it.
    ///
    /// # Errors
    /// Returns an error if the activity log query fails.
    pub fn preview(&self, user_id: &str) -> Result<RewardPreview> {
        self.preview_at(user_id, Utc::now())
    }

    /// Preview evaluated at `now` (deterministic variant).
    ///
    /// # Errors
    /// Returns an error if the activity log query fails.
    pub fn preview_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<RewardPreview> {
        let current_streak = self.streaks.calculate_streak(user_id)?;
        let continuous = self.streaks.validate_streak_continuity(user_id, now)?;
        let projected_streak = if continuous { current_streak + 1 } else { 1 };
        let multiplier = self.policy.multiplier_for(projected_streak, now);
        let breakdown =
            self.calculator
                .breakdown(projected_streak, multiplier, &RewardContext::at(now));
        Ok(RewardPreview {
            current_streak,
            projected_streak,
            multiplier,
            tier: (&self.policy.current_tier(projected_streak, now)).into(),
            breakdown,
        })
    }

    /// Aggregate counts and totals over a time window. Tolerant of empty
    /// windows and unknown users.
    ///
    /// # Errors
    /// Returns an error if the activity log query fails.
    pub fn statistics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CheckinStatistics> {
        let rows = self.activity_log.checkins_in_window(start, end)?;
        Ok(stats::summarize(start, end, rows))
    }

    fn validate_request(&self, request: &CheckinRequest) -> Result<()> {
        if request.user_id.trim().is_empty() {
            return Err(CheckinError::MissingProfile);
        }
        if let Some(wallet) = &request.wallet_address {
            if !is_valid_wallet(wallet) {
                return Err(CheckinError::InvalidWallet(wallet.clone()));
            }
        }
        if self.attestation.enabled
            && self.attestor.is_enabled()
            && request.wallet_address.is_none()
        {
            return Err(CheckinError::MissingWallet);
        }
        Ok(())
    }

    /// Best-effort streak for failure outcomes; 0 when the log is
    /// unreadable.
    fn known_streak(&self, user_id: &str) -> u32 {
        self.streaks.calculate_streak(user_id).unwrap_or(0)
    }
}

/// `0x` followed by 40 hex digits.
fn is_valid_wallet(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::RecordingAttestor;
    use crate::error::StoreError;
    use crate::ledger::{LedgerCall, MemoryLedger};
    use crate::multiplier::TieredPolicy;
    use crate::reward::StandardCalculator;
    use crate::storage::{InsertOutcome, WindowRow};
    use crate::streak::StreakConfig;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Activity log stub with scripted history.
    #[derive(Default)]
    struct StubLog {
        timestamps: Mutex<Vec<DateTime<Utc>>>,
        fail_queries: std::sync::atomic::AtomicBool,
        fail_today_check: std::sync::atomic::AtomicBool,
    }

    impl StubLog {
        fn with(mut timestamps: Vec<DateTime<Utc>>) -> Arc<Self> {
            timestamps.sort_unstable_by(|a, b| b.cmp(a));
            Arc::new(Self {
                timestamps: Mutex::new(timestamps),
                ..Self::default()
            })
        }
    }

    impl ActivityLog for StubLog {
        fn checkin_timestamps(&self, _user_id: &str) -> Result<Vec<DateTime<Utc>>, StoreError> {
            if self.fail_queries.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::Backend("injected query failure".to_string()));
            }
            Ok(self.timestamps.lock().unwrap().clone())
        }

        fn has_checkin_today(
            &self,
            _user_id: &str,
            now: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            if self.fail_today_check.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::Backend(
                    "injected eligibility read failure".to_string(),
                ));
            }
            Ok(self
                .timestamps
                .lock()
                .unwrap()
                .iter()
                .any(|t| t.date_naive() == now.date_naive()))
        }

        fn insert_activity(&self, record: &ActivityRecord) -> Result<InsertOutcome, StoreError> {
            self.timestamps.lock().unwrap().insert(0, record.created_at);
            Ok(InsertOutcome::Inserted)
        }

        fn checkins_in_window(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<WindowRow>, StoreError> {
            Ok(vec![WindowRow {
                user_id: "u1".to_string(),
                checkins: self.timestamps.lock().unwrap().len() as u64,
                points: 0,
            }])
        }
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, d, h, 0, 0).unwrap()
    }

    struct Harness {
        engine: CheckinEngine,
        ledger_view: Arc<MemoryLedger>,
        attestor_view: Arc<RecordingAttestor>,
    }

    /// Ledger/attestor wrappers so the test keeps a handle on the doubles
    /// after they are boxed into the engine.
    struct SharedLedger(Arc<MemoryLedger>);

    impl RewardLedger for SharedLedger {
        fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
            self.0.balance(user_id)
        }
        fn update_balance(&self, user_id: &str, delta: i64) -> Result<i64, LedgerError> {
            self.0.update_balance(user_id, delta)
        }
        fn record_activity(
            &self,
            record: &ActivityRecord,
        ) -> Result<InsertOutcome, LedgerError> {
            self.0.record_activity(record)
        }
        fn commit(
            &self,
            user_id: &str,
            delta: i64,
            record: &ActivityRecord,
        ) -> Result<crate::ledger::CommitReceipt, LedgerError> {
            self.0.commit(user_id, delta, record)
        }
    }

    struct SharedAttestor(Arc<RecordingAttestor>);

    impl AttestationClient for SharedAttestor {
        fn create_attestation(
            &self,
            request: &AttestationRequest,
        ) -> std::result::Result<crate::attestation::AttestationReceipt, crate::error::AttestationError>
        {
            self.0.create_attestation(request)
        }
    }

    fn harness(timestamps: Vec<DateTime<Utc>>, attestation_enabled: bool) -> Harness {
        let log = StubLog::with(timestamps);
        let ledger_view = Arc::new(MemoryLedger::new());
        let attestor_view = Arc::new(RecordingAttestor::new());
        let engine = CheckinEngine::from_parts(
            Arc::clone(&log) as _,
            StreakTracker::new(log, StreakConfig::default()),
            Box::new(TieredPolicy::default()),
            Box::new(StandardCalculator::default()),
            Box::new(SharedLedger(Arc::clone(&ledger_view))),
            Box::new(SharedAttestor(Arc::clone(&attestor_view))),
            AttestationConfig {
                enabled: attestation_enabled,
                ..AttestationConfig::default()
            },
            "gm",
        );
        Harness {
            engine,
            ledger_view,
            attestor_view,
        }
    }

    const WALLET: &str = "0x00112233445566778899aabbccddeeff00112233";

    #[test]
    fn test_first_checkin_starts_streak_at_one() {
        let h = harness(vec![], false);
        let outcome = h
            .engine
            .perform_checkin_at(&CheckinRequest::new("u1"), at(10, 12));
        assert!(outcome.success);
        assert_eq!(outcome.current_streak, 0);
        assert_eq!(outcome.new_streak, 1);
        // streak 1, multiplier 1.0: floor((10 + 1) * 1.0) = 11
        assert_eq!(outcome.xp_earned, 11);
        assert!(outcome.attestation_ref.is_none());
        assert_eq!(h.ledger_view.balance("u1").unwrap(), 11);
    }

    #[test]
    fn test_week_streak_earns_consistent_multiplier() {
        // Seven consecutive days ending yesterday; today is day 8.
        let history = (2..=8).map(|d| at(d, 9)).collect();
        let h = harness(history, false);
        let outcome = h
            .engine
            .perform_checkin_at(&CheckinRequest::new("u1"), at(9, 8));
        assert!(outcome.success);
        assert_eq!(outcome.new_streak, 8);
        // bonus floor(8/7)*5 + 7*1 = 12; floor((10 + 12) * 1.5) = 33
        assert_eq!(outcome.xp_earned, 33);
        let breakdown = outcome.breakdown.unwrap();
        assert_eq!(breakdown.multiplier, 1.5);
        assert_eq!(breakdown.raw_total_xp, 33);
    }

    #[test]
    fn test_already_checked_in_today_is_ordinary_outcome() {
        let h = harness(vec![at(9, 7)], false);
        let outcome = h
            .engine
            .perform_checkin_at(&CheckinRequest::new("u1"), at(9, 20));
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("already_checked_in"));
        assert_eq!(outcome.error.as_deref(), Some("Already checked in today"));
        assert_eq!(outcome.current_streak, 1);
        // No commit was attempted.
        assert!(h.ledger_view.calls().is_empty());
    }

    #[test]
    fn test_broken_streak_resets_to_one() {
        // Last check-in 30 hours before the attempt; not "today".
        let h = harness(vec![at(8, 9), at(9, 9)], false);
        let outcome = h
            .engine
            .perform_checkin_at(&CheckinRequest::new("u1"), at(10, 15));
        assert!(outcome.success);
        assert_eq!(outcome.current_streak, 2);
        assert_eq!(outcome.new_streak, 1);
    }

    #[test]
    fn test_continuous_streak_increments() {
        // Last check-in 23 hours before the attempt, previous day.
        let h = harness(vec![at(9, 9)], false);
        let outcome = h
            .engine
            .perform_checkin_at(&CheckinRequest::new("u1"), at(10, 8));
        assert!(outcome.success);
        assert_eq!(outcome.new_streak, 2);
    }

    #[test]
    fn test_attestation_disabled_skips_call_entirely() {
        let h = harness(vec![], false);
        let outcome = h
            .engine
            .perform_checkin_at(&CheckinRequest::new("u1"), at(10, 12));
        assert!(outcome.success);
        assert!(outcome.attestation_ref.is_none());
        assert!(h.attestor_view.requests().is_empty());
    }

    #[test]
    fn test_attestation_enabled_embeds_reference() {
        let h = harness(vec![], true);
        let mut request = CheckinRequest::new("u1");
        request.wallet_address = Some(WALLET.to_string());
        let outcome = h.engine.perform_checkin_at(&request, at(10, 12));
        assert!(outcome.success);
        assert!(outcome.attestation_ref.is_some());

        let requests = h.attestor_view.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].recipient, WALLET);
        assert_eq!(requests[0].payload.xp_awarded, outcome.xp_earned);
    }

    #[test]
    fn test_attestation_failure_aborts_before_commit() {
        let h = harness(vec![], true);
        h.attestor_view.fail_next_calls(true);
        let mut request = CheckinRequest::new("u1");
        request.wallet_address = Some(WALLET.to_string());
        let outcome = h.engine.perform_checkin_at(&request, at(10, 12));
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("attestation_failed"));
        // No partial credit.
        assert!(h.ledger_view.calls().is_empty());
        assert_eq!(h.ledger_view.balance("u1").unwrap(), 0);
    }

    #[test]
    fn test_missing_wallet_with_attestation_enabled() {
        let h = harness(vec![], true);
        let outcome = h
            .engine
            .perform_checkin_at(&CheckinRequest::new("u1"), at(10, 12));
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("missing_wallet"));
    }

    #[test]
    fn test_invalid_wallet_is_rejected() {
        let h = harness(vec![], false);
        let mut request = CheckinRequest::new("u1");
        request.wallet_address = Some("0x1234".to_string());
        let outcome = h.engine.perform_checkin_at(&request, at(10, 12));
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("invalid_wallet"));
    }

    #[test]
    fn test_empty_user_id_is_rejected() {
        let h = harness(vec![], false);
        let outcome = h
            .engine
            .perform_checkin_at(&CheckinRequest::new("  "), at(10, 12));
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("missing_profile"));
    }

    #[test]
    fn test_append_failure_still_succeeds() {
        let h = harness(vec![], false);
        h.ledger_view.fail_activity_appends(true);
        let outcome = h
            .engine
            .perform_checkin_at(&CheckinRequest::new("u1"), at(10, 12));
        // Balance is the user-facing guarantee.
        assert!(outcome.success);
        assert_eq!(outcome.xp_earned, 11);
        assert_eq!(h.ledger_view.balance("u1").unwrap(), 11);
        assert!(h.ledger_view.activities().is_empty());
    }

    #[test]
    fn test_balance_write_failure_is_fatal() {
        let h = harness(vec![], false);
        h.ledger_view.fail_balance_writes(true);
        let outcome = h
            .engine
            .perform_checkin_at(&CheckinRequest::new("u1"), at(10, 12));
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("xp_update_failed"));
        assert_eq!(outcome.xp_earned, 0);
    }

    #[test]
    fn test_insert_conflict_surfaces_as_already_checked_in() {
        let h = harness(vec![], false);
        h.ledger_view.conflict_on_appends(true);
        let outcome = h
            .engine
            .perform_checkin_at(&CheckinRequest::new("u1"), at(10, 12));
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("already_checked_in"));
        // Compensated: no balance drift.
        assert_eq!(h.ledger_view.balance("u1").unwrap(), 0);
    }

    #[test]
    fn test_streak_query_failure_becomes_failure_outcome() {
        let log = StubLog::with(vec![]);
        log.fail_queries
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let ledger = Arc::new(MemoryLedger::new());
        let engine = CheckinEngine::from_parts(
            Arc::clone(&log) as _,
            StreakTracker::new(log, StreakConfig::default()),
            Box::new(TieredPolicy::default()),
            Box::new(StandardCalculator::default()),
            Box::new(SharedLedger(ledger)),
            Box::new(DisabledAttestor),
            AttestationConfig::default(),
            "gm",
        );
        let outcome = engine.perform_checkin_at(&CheckinRequest::new("u1"), at(10, 12));
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("streak_calculation_failed"));
    }

    #[test]
    fn test_eligibility_read_failure_reports_known_streak() {
        // History is readable; only the today-check fails.
        let log = StubLog::with(vec![at(9, 9)]);
        log.fail_today_check
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let ledger = Arc::new(MemoryLedger::new());
        let engine = CheckinEngine::from_parts(
            Arc::clone(&log) as _,
            StreakTracker::new(log, StreakConfig::default()),
            Box::new(TieredPolicy::default()),
            Box::new(StandardCalculator::default()),
            Box::new(SharedLedger(ledger)),
            Box::new(DisabledAttestor),
            AttestationConfig::default(),
            "gm",
        );
        let outcome = engine.perform_checkin_at(&CheckinRequest::new("u1"), at(10, 8));
        assert!(!outcome.success);
        assert_eq!(outcome.code.as_deref(), Some("storage_failed"));
        assert_eq!(outcome.current_streak, 1);
    }

    #[test]
    fn test_preview_runs_without_mutation() {
        let h = harness(vec![at(9, 9)], false);
        let preview = h.engine.preview_at("u1", at(10, 8)).unwrap();
        assert_eq!(preview.current_streak, 1);
        assert_eq!(preview.projected_streak, 2);
        assert_eq!(preview.breakdown.total_xp, 12); // floor((10 + 2) * 1.0)
        assert!(h.ledger_view.calls().is_empty());
    }

    #[test]
    fn test_status_reports_next_available_after_checkin() {
        let h = harness(vec![at(9, 9)], false);

        let open = h.engine.status_at("u1", at(10, 8)).unwrap();
        assert!(open.can_check_in);
        assert!(open.next_available.is_none());
        assert_eq!(open.streak.current_streak, 1);

        let closed = h.engine.status_at("u1", at(9, 20)).unwrap();
        assert!(closed.checked_in_today);
        assert!(!closed.can_check_in);
        assert_eq!(closed.next_available, Some(at(10, 0)));
    }

    #[test]
    fn test_statistics_summarizes_window_rows() {
        let h = harness(vec![at(8, 9), at(9, 9)], false);
        let stats = h.engine.statistics(at(1, 0), at(30, 0)).unwrap();
        assert_eq!(stats.unique_users, 1);
        assert_eq!(stats.total_checkins, 2);
    }

    #[test]
    fn test_wallet_validation() {
        assert!(is_valid_wallet(WALLET));
        assert!(!is_valid_wallet("0x1234"));
        assert!(!is_valid_wallet("1234567890123456789012345678901234567890ab"));
        assert!(!is_valid_wallet(
            "0xzz112233445566778899aabbccddeeff00112233"
        ));
    }

    #[test]
    fn test_calls_recorded_for_successful_commit() {
        let h = harness(vec![], false);
        h.engine
            .perform_checkin_at(&CheckinRequest::new("u1"), at(10, 12));
        let calls = h.ledger_view.calls();
        assert!(matches!(
            calls.last(),
            Some(LedgerCall::Commit { user_id, delta: 11 }) if user_id == "u1"
        ));
    }
}
