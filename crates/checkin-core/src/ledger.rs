//! Reward ledgers: balance commits plus the append-only audit record.
//!
//! `commit` is the preferred combined entry point. Its error handling is
//! deliberately asymmetric: the balance write is the operation of record
//! and any failure there fails the attempt, while a failure of the
//! activity append alone is logged as a warning and the attempt still
//! succeeds. The cumulative balance can therefore (rarely) run ahead of
//! the audit trail; this is an accepted consistency gap, not an oversight.
//!
//! A uniqueness *conflict* on the append is different: it means the
//! advisory eligibility read raced a concurrent check-in. The ledger then
//! issues a best-effort compensating balance write and reports the
//! duplicate so the orchestrator can surface the ordinary
//! "already checked in" outcome.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::error::{LedgerError, StoreError};
use crate::storage::{ActivityLog, ActivityRecord, BalanceStore, InsertOutcome};

/// Result of a successful combined commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Cumulative balance after the commit
    pub new_balance: i64,

    /// False when the activity append failed and was warn-logged
    pub audit_recorded: bool,
}

/// Every ledger strategy implements this trait.
pub trait RewardLedger: Send + Sync {
    /// Current cumulative balance for a user.
    fn balance(&self, user_id: &str) -> Result<i64, LedgerError>;

    /// Read-modify-write of the cumulative balance. Returns the new value.
    fn update_balance(&self, user_id: &str, delta: i64) -> Result<i64, LedgerError>;

    /// Append one activity record.
    fn record_activity(&self, record: &ActivityRecord) -> Result<InsertOutcome, LedgerError>;

    /// Combined entry point: balance update plus activity append, with the
    /// asymmetric error policy described at the module level.
    fn commit(
        &self,
        user_id: &str,
        delta: i64,
        record: &ActivityRecord,
    ) -> Result<CommitReceipt, LedgerError>;

    /// Apply any queued updates. No-op for unbatched strategies.
    fn flush(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Synchronous-per-call ledger over the store ports.
pub struct DirectLedger {
    balances: Arc<dyn BalanceStore>,
    activities: Arc<dyn ActivityLog>,
}

impl DirectLedger {
    pub fn new(balances: Arc<dyn BalanceStore>, activities: Arc<dyn ActivityLog>) -> Self {
        Self {
            balances,
            activities,
        }
    }
}

impl RewardLedger for DirectLedger {
    fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        self.balances
            .read_balance(user_id)
            .map_err(LedgerError::BalanceRead)
    }

    fn update_balance(&self, user_id: &str, delta: i64) -> Result<i64, LedgerError> {
        let current = self
            .balances
            .read_balance(user_id)
            .map_err(LedgerError::BalanceRead)?;
        let new_value = current + delta;
        self.balances
            .write_balance(user_id, new_value)
            .map_err(LedgerError::BalanceWrite)?;
        Ok(new_value)
    }

    fn record_activity(&self, record: &ActivityRecord) -> Result<InsertOutcome, LedgerError> {
        self.activities
            .insert_activity(record)
            .map_err(LedgerError::ActivityAppend)
    }

    fn commit(
        &self,
        user_id: &str,
        delta: i64,
        record: &ActivityRecord,
    ) -> Result<CommitReceipt, LedgerError> {
        let new_balance = self.update_balance(user_id, delta)?;
        match self.record_activity(record) {
            Ok(InsertOutcome::Inserted) => Ok(CommitReceipt {
                new_balance,
                audit_recorded: true,
            }),
            Ok(InsertOutcome::Conflict) => {
                warn!(user_id, "duplicate check-in detected at insert; reverting balance");
                if let Err(err) = self.balances.write_balance(user_id, new_balance - delta) {
                    warn!(user_id, %err, "compensating balance write failed");
                }
                Err(LedgerError::Duplicate)
            }
            Err(err) => {
                // Balance is the user-facing guarantee; the audit trail is
                // best-effort. Do not fail the attempt.
                warn!(user_id, %err, "activity append failed after balance write");
                Ok(CommitReceipt {
                    new_balance,
                    audit_recorded: false,
                })
            }
        }
    }
}

/// Queueing ledger for bulk/administrative grants.
///
/// Balance deltas are queued and applied when the queue reaches
/// `flush_threshold` or `flush_interval` has elapsed since the last flush
/// (checked on submit; there is no background task). A queued update is
/// not visible to `balance()` until flushed -- a bounded, accepted
/// staleness window.
pub struct BatchedLedger {
    inner: Box<dyn RewardLedger>,
    queue: Mutex<Vec<(String, i64)>>,
    flush_threshold: usize,
    flush_interval: Duration,
    last_flush: Mutex<DateTime<Utc>>,
}

impl BatchedLedger {
    pub fn new(inner: Box<dyn RewardLedger>, flush_threshold: usize, flush_interval: Duration) -> Self {
        Self {
            inner,
            queue: Mutex::new(Vec::new()),
            flush_threshold: flush_threshold.max(1),
            flush_interval,
            last_flush: Mutex::new(Utc::now()),
        }
    }

    /// Number of queued, unflushed updates.
    pub fn pending(&self) -> usize {
        self.queue.lock().expect("ledger queue poisoned").len()
    }

    fn enqueue(&self, user_id: &str, delta: i64) -> Result<(), LedgerError> {
        {
            let mut queue = self.queue.lock().expect("ledger queue poisoned");
            queue.push((user_id.to_string(), delta));
            let due = queue.len() >= self.flush_threshold
                || Utc::now() - *self.last_flush.lock().expect("flush stamp poisoned")
                    >= self.flush_interval;
            if !due {
                return Ok(());
            }
        }
        self.flush()
    }

    fn queued_for(&self, user_id: &str) -> i64 {
        self.queue
            .lock()
            .expect("ledger queue poisoned")
            .iter()
            .filter(|(user, _)| user == user_id)
            .map(|(_, delta)| delta)
            .sum()
    }
}

impl RewardLedger for BatchedLedger {
    /// Flushed balance only; queued deltas are not yet visible.
    fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        self.inner.balance(user_id)
    }

    fn update_balance(&self, user_id: &str, delta: i64) -> Result<i64, LedgerError> {
        self.enqueue(user_id, delta)?;
        // Projected value: flushed balance plus whatever is still queued.
        Ok(self.inner.balance(user_id)? + self.queued_for(user_id))
    }

    fn record_activity(&self, record: &ActivityRecord) -> Result<InsertOutcome, LedgerError> {
        self.inner.record_activity(record)
    }

    fn commit(
        &self,
        user_id: &str,
        delta: i64,
        record: &ActivityRecord,
    ) -> Result<CommitReceipt, LedgerError> {
        // The audit record is written eagerly so the duplicate check stays
        // authoritative; only the balance delta is deferred.
        let audit_recorded = match self.inner.record_activity(record) {
            Ok(InsertOutcome::Inserted) => true,
            Ok(InsertOutcome::Conflict) => return Err(LedgerError::Duplicate),
            Err(err) => {
                warn!(user_id, %err, "activity append failed; queueing balance delta anyway");
                false
            }
        };
        let new_balance = self.update_balance(user_id, delta)?;
        Ok(CommitReceipt {
            new_balance,
            audit_recorded,
        })
    }

    fn flush(&self) -> Result<(), LedgerError> {
        let drained: Vec<(String, i64)> = {
            let mut queue = self.queue.lock().expect("ledger queue poisoned");
            queue.drain(..).collect()
        };
        if drained.is_empty() {
            return Ok(());
        }

        let mut totals: HashMap<String, i64> = HashMap::new();
        for (user, delta) in drained {
            *totals.entry(user).or_insert(0) += delta;
        }
        debug!(users = totals.len(), "flushing batched ledger queue");

        let mut pending = totals.into_iter();
        while let Some((user, delta)) = pending.next() {
            if let Err(err) = self.inner.update_balance(&user, delta) {
                // Failed and unattempted totals go back on the queue for
                // the next flush; totals already applied do not.
                warn!(user = %user, %err, "flush failed; re-queueing unapplied totals");
                let mut queue = self.queue.lock().expect("ledger queue poisoned");
                queue.push((user, delta));
                queue.extend(pending);
                return Err(err);
            }
        }
        *self.last_flush.lock().expect("flush stamp poisoned") = Utc::now();
        Ok(())
    }
}

/// Ledger with a short-TTL read cache over balances.
///
/// The cache is local to this instance and invalidated synchronously on
/// every write through it; staleness across *other* ledger instances is a
/// known, bounded risk.
pub struct CachedLedger {
    inner: Box<dyn RewardLedger>,
    cache: Mutex<HashMap<String, (i64, DateTime<Utc>)>>,
    ttl: Duration,
}

impl CachedLedger {
    pub fn new(inner: Box<dyn RewardLedger>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn cached(&self, user_id: &str) -> Option<i64> {
        let cache = self.cache.lock().expect("balance cache poisoned");
        cache.get(user_id).and_then(|(value, stored_at)| {
            (Utc::now() - *stored_at < self.ttl).then_some(*value)
        })
    }

    fn store(&self, user_id: &str, value: i64) {
        self.cache
            .lock()
            .expect("balance cache poisoned")
            .insert(user_id.to_string(), (value, Utc::now()));
    }

    fn invalidate(&self, user_id: &str) {
        self.cache
            .lock()
            .expect("balance cache poisoned")
            .remove(user_id);
    }
}

impl RewardLedger for CachedLedger {
    fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        if let Some(value) = self.cached(user_id) {
            return Ok(value);
        }
        let value = self.inner.balance(user_id)?;
        self.store(user_id, value);
        Ok(value)
    }

    fn update_balance(&self, user_id: &str, delta: i64) -> Result<i64, LedgerError> {
        self.invalidate(user_id);
        let new_value = self.inner.update_balance(user_id, delta)?;
        self.store(user_id, new_value);
        Ok(new_value)
    }

    fn record_activity(&self, record: &ActivityRecord) -> Result<InsertOutcome, LedgerError> {
        self.inner.record_activity(record)
    }

    fn commit(
        &self,
        user_id: &str,
        delta: i64,
        record: &ActivityRecord,
    ) -> Result<CommitReceipt, LedgerError> {
        self.invalidate(user_id);
        let receipt = self.inner.commit(user_id, delta, record)?;
        self.store(user_id, receipt.new_balance);
        Ok(receipt)
    }

    fn flush(&self) -> Result<(), LedgerError> {
        self.inner.flush()
    }
}

/// Recorded ledger call, for assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    Balance { user_id: String },
    UpdateBalance { user_id: String, delta: i64 },
    RecordActivity { user_id: String },
    Commit { user_id: String, delta: i64 },
}

/// In-memory ledger and test double. Records every call and supports
/// injected failures for the balance write and the activity append.
#[derive(Default)]
pub struct MemoryLedger {
    balances: Mutex<HashMap<String, i64>>,
    activities: Mutex<Vec<ActivityRecord>>,
    calls: Mutex<Vec<LedgerCall>>,
    fail_balance_write: AtomicBool,
    fail_activity_append: AtomicBool,
    conflict_on_append: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every balance write fail.
    pub fn fail_balance_writes(&self, fail: bool) {
        self.fail_balance_write.store(fail, Ordering::SeqCst);
    }

    /// Make every activity append fail.
    pub fn fail_activity_appends(&self, fail: bool) {
        self.fail_activity_append.store(fail, Ordering::SeqCst);
    }

    /// Make every activity append report a duplicate conflict.
    pub fn conflict_on_appends(&self, conflict: bool) {
        self.conflict_on_append.store(conflict, Ordering::SeqCst);
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<LedgerCall> {
        self.calls.lock().expect("call log poisoned").clone()
    }

    /// All appended activity records.
    pub fn activities(&self) -> Vec<ActivityRecord> {
        self.activities.lock().expect("activity log poisoned").clone()
    }

    fn record_call(&self, call: LedgerCall) {
        self.calls.lock().expect("call log poisoned").push(call);
    }

    fn append(&self, record: &ActivityRecord) -> Result<InsertOutcome, LedgerError> {
        if self.fail_activity_append.load(Ordering::SeqCst) {
            return Err(LedgerError::ActivityAppend(StoreError::Backend(
                "injected append failure".to_string(),
            )));
        }
        if self.conflict_on_append.load(Ordering::SeqCst) {
            return Ok(InsertOutcome::Conflict);
        }
        self.activities
            .lock()
            .expect("activity log poisoned")
            .push(record.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn apply_delta(&self, user_id: &str, delta: i64) -> Result<i64, LedgerError> {
        if self.fail_balance_write.load(Ordering::SeqCst) {
            return Err(LedgerError::BalanceWrite(StoreError::Backend(
                "injected write failure".to_string(),
            )));
        }
        let mut balances = self.balances.lock().expect("balances poisoned");
        let entry = balances.entry(user_id.to_string()).or_insert(0);
        *entry += delta;
        Ok(*entry)
    }
}

impl RewardLedger for MemoryLedger {
    fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        self.record_call(LedgerCall::Balance {
            user_id: user_id.to_string(),
        });
        Ok(*self
            .balances
            .lock()
            .expect("balances poisoned")
            .get(user_id)
            .unwrap_or(&0))
    }

    fn update_balance(&self, user_id: &str, delta: i64) -> Result<i64, LedgerError> {
        self.record_call(LedgerCall::UpdateBalance {
            user_id: user_id.to_string(),
            delta,
        });
        self.apply_delta(user_id, delta)
    }

    fn record_activity(&self, record: &ActivityRecord) -> Result<InsertOutcome, LedgerError> {
        self.record_call(LedgerCall::RecordActivity {
            user_id: record.user_id.clone(),
        });
        self.append(record)
    }

    fn commit(
        &self,
        user_id: &str,
        delta: i64,
        record: &ActivityRecord,
    ) -> Result<CommitReceipt, LedgerError> {
        self.record_call(LedgerCall::Commit {
            user_id: user_id.to_string(),
            delta,
        });
        let new_balance = self.apply_delta(user_id, delta)?;
        match self.append(record) {
            Ok(InsertOutcome::Inserted) => Ok(CommitReceipt {
                new_balance,
                audit_recorded: true,
            }),
            Ok(InsertOutcome::Conflict) => {
                if let Err(err) = self.apply_delta(user_id, -delta) {
                    warn!(user_id, %err, "compensating balance write failed");
                }
                Err(LedgerError::Duplicate)
            }
            Err(err) => {
                warn!(user_id, %err, "activity append failed after balance write");
                Ok(CommitReceipt {
                    new_balance,
                    audit_recorded: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplier::TierInfo;
    use crate::reward::{RewardBreakdown, SubBreakdown};

    fn record(user_id: &str, points: i64) -> ActivityRecord {
        ActivityRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            activity_type: ActivityRecord::DAILY_CHECKIN.to_string(),
            activity_data: crate::storage::ActivityData {
                greeting: "gm".to_string(),
                streak: 1,
                attestation_ref: None,
                breakdown: RewardBreakdown {
                    base_xp: 10.0,
                    streak_bonus: 0.0,
                    multiplier: 1.0,
                    raw_total_xp: points,
                    total_xp: points,
                    sub: SubBreakdown::default(),
                },
                multiplier: 1.0,
                tier_info: TierInfo {
                    name: "Beginner".to_string(),
                    multiplier: 1.0,
                },
                timestamp: Utc::now(),
            },
            points_earned: points,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_memory_ledger_commit_updates_both() {
        let ledger = MemoryLedger::new();
        let receipt = ledger.commit("u1", 10, &record("u1", 10)).unwrap();
        assert_eq!(receipt.new_balance, 10);
        assert!(receipt.audit_recorded);
        assert_eq!(ledger.balance("u1").unwrap(), 10);
        assert_eq!(ledger.activities().len(), 1);
    }

    #[test]
    fn test_commit_append_failure_is_not_fatal() {
        let ledger = MemoryLedger::new();
        ledger.fail_activity_appends(true);
        let receipt = ledger.commit("u1", 10, &record("u1", 10)).unwrap();
        assert_eq!(receipt.new_balance, 10);
        assert!(!receipt.audit_recorded);
        // Balance kept; audit trail is behind by one record.
        assert_eq!(ledger.balance("u1").unwrap(), 10);
        assert!(ledger.activities().is_empty());
    }

    #[test]
    fn test_commit_balance_failure_is_fatal() {
        let ledger = MemoryLedger::new();
        ledger.fail_balance_writes(true);
        let err = ledger.commit("u1", 10, &record("u1", 10)).unwrap_err();
        assert!(matches!(err, LedgerError::BalanceWrite(_)));
        assert!(ledger.activities().is_empty());
    }

    #[test]
    fn test_commit_conflict_reverts_balance() {
        let ledger = MemoryLedger::new();
        ledger.conflict_on_appends(true);
        let err = ledger.commit("u1", 10, &record("u1", 10)).unwrap_err();
        assert!(matches!(err, LedgerError::Duplicate));
        assert_eq!(ledger.balance("u1").unwrap(), 0);
    }

    #[test]
    fn test_batched_ledger_defers_until_threshold() {
        let batched = BatchedLedger::new(Box::new(MemoryLedger::new()), 3, Duration::hours(1));

        batched.update_balance("u1", 5).unwrap();
        batched.update_balance("u1", 5).unwrap();
        assert_eq!(batched.pending(), 2);
        // Queued deltas are not yet visible to reads.
        assert_eq!(batched.balance("u1").unwrap(), 0);

        // Third update crosses the threshold and flushes everything.
        batched.update_balance("u2", 7).unwrap();
        assert_eq!(batched.pending(), 0);
        assert_eq!(batched.balance("u1").unwrap(), 10);
        assert_eq!(batched.balance("u2").unwrap(), 7);
    }

    #[test]
    fn test_batched_ledger_explicit_flush() {
        let batched = BatchedLedger::new(Box::new(MemoryLedger::new()), 100, Duration::hours(1));
        batched.update_balance("u1", 5).unwrap();
        assert_eq!(batched.balance("u1").unwrap(), 0);
        batched.flush().unwrap();
        assert_eq!(batched.balance("u1").unwrap(), 5);
    }

    #[test]
    fn test_batched_update_returns_projected_balance() {
        let batched = BatchedLedger::new(Box::new(MemoryLedger::new()), 100, Duration::hours(1));
        let projected = batched.update_balance("u1", 5).unwrap();
        assert_eq!(projected, 5);
        assert_eq!(batched.balance("u1").unwrap(), 0);
    }

    /// Forwarding wrapper so the test keeps a handle on the boxed inner
    /// double.
    struct SharedInner(Arc<MemoryLedger>);

    impl RewardLedger for SharedInner {
        fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
            self.0.balance(user_id)
        }
        fn update_balance(&self, user_id: &str, delta: i64) -> Result<i64, LedgerError> {
            self.0.update_balance(user_id, delta)
        }
        fn record_activity(&self, record: &ActivityRecord) -> Result<InsertOutcome, LedgerError> {
            self.0.record_activity(record)
        }
        fn commit(
            &self,
            user_id: &str,
            delta: i64,
            record: &ActivityRecord,
        ) -> Result<CommitReceipt, LedgerError> {
            self.0.commit(user_id, delta, record)
        }
    }

    #[test]
    fn test_batched_flush_failure_retains_queued_deltas() {
        let inner = Arc::new(MemoryLedger::new());
        let batched = BatchedLedger::new(
            Box::new(SharedInner(Arc::clone(&inner))),
            100,
            Duration::hours(1),
        );

        batched.update_balance("u1", 5).unwrap();
        inner.fail_balance_writes(true);
        assert!(batched.flush().is_err());
        // The delta survived the failed flush.
        assert_eq!(batched.pending(), 1);

        // Store recovers; the retained delta applies on the next flush.
        inner.fail_balance_writes(false);
        batched.flush().unwrap();
        assert_eq!(batched.pending(), 0);
        assert_eq!(batched.balance("u1").unwrap(), 5);
    }

    #[test]
    fn test_batched_flush_failure_keeps_unattempted_totals() {
        let inner = Arc::new(MemoryLedger::new());
        let batched = BatchedLedger::new(
            Box::new(SharedInner(Arc::clone(&inner))),
            100,
            Duration::hours(1),
        );

        batched.update_balance("u1", 5).unwrap();
        batched.update_balance("u2", 7).unwrap();
        inner.fail_balance_writes(true);
        assert!(batched.flush().is_err());
        // Both per-user totals are back on the queue.
        assert_eq!(batched.pending(), 2);

        inner.fail_balance_writes(false);
        batched.flush().unwrap();
        assert_eq!(batched.balance("u1").unwrap(), 5);
        assert_eq!(batched.balance("u2").unwrap(), 7);
    }

    #[test]
    fn test_cached_ledger_serves_from_cache_and_invalidates() {
        let cached = CachedLedger::new(Box::new(MemoryLedger::new()), Duration::minutes(5));

        assert_eq!(cached.balance("u1").unwrap(), 0);
        // Write invalidates synchronously; the next read sees the new value.
        cached.update_balance("u1", 10).unwrap();
        assert_eq!(cached.balance("u1").unwrap(), 10);

        let receipt = cached.commit("u1", 5, &record("u1", 5)).unwrap();
        assert_eq!(receipt.new_balance, 15);
        assert_eq!(cached.balance("u1").unwrap(), 15);
    }

    #[test]
    fn test_memory_ledger_records_calls() {
        let ledger = MemoryLedger::new();
        ledger.update_balance("u1", 3).unwrap();
        ledger.commit("u1", 4, &record("u1", 4)).unwrap();
        let calls = ledger.calls();
        assert_eq!(
            calls[0],
            LedgerCall::UpdateBalance {
                user_id: "u1".to_string(),
                delta: 3
            }
        );
        assert_eq!(
            calls[1],
            LedgerCall::Commit {
                user_id: "u1".to_string(),
                delta: 4
            }
        );
    }
}
