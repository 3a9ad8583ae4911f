//! Capacity ledger.
//!
//! The ledger is the single source of truth for resource occupancy. Each
//! resource lives behind its own mutex, so reserve, confirm and release on
//! one resource are totally ordered while different resources never contend.
//! Locks are only held for counter bookkeeping; nothing in here awaits or
//! calls out to collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::model::{Hold, HoldId, HoldState, RequesterId, ResourceId, Utilization};

mod state;
use state::ResourceSlot;

mod error;
pub use error::{HoldOperation, LedgerError};

/// Default advisory lifetime of a tentative hold, in seconds.
pub const DEFAULT_HOLD_TTL_SECS: i64 = 15 * 60;

/// Per-resource capacity bookkeeping.
pub struct Ledger {
    resources: RwLock<HashMap<ResourceId, Arc<Mutex<ResourceSlot>>>>,
    /// Owning resource of every hold ever created
    hold_index: RwLock<HashMap<HoldId, ResourceId>>,
    next_hold: AtomicU64,
    hold_ttl: Duration,
}

/// Public API
impl Ledger {
    pub fn new(hold_ttl: Duration) -> Self {
        Self {
            resources: RwLock::new(HashMap::new()),
            hold_index: RwLock::new(HashMap::new()),
            next_hold: AtomicU64::new(1),
            hold_ttl,
        }
    }

    /// Register a resource with a fixed, positive capacity.
    pub fn register(&self, resource: ResourceId, capacity: u32) -> Result<(), LedgerError> {
        if capacity == 0 {
            return Err(LedgerError::ZeroCapacity(resource));
        }
        let mut resources = self
            .resources
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if resources.contains_key(&resource) {
            return Err(LedgerError::DuplicateResource(resource));
        }
        info!(resource = %resource, capacity, "resource registered");
        let slot = ResourceSlot::new(resource.clone(), capacity);
        resources.insert(resource, Arc::new(Mutex::new(slot)));
        Ok(())
    }

    /// Atomically take one unit of `resource` for `requester` as a tentative hold.
    pub fn reserve(
        &self,
        requester: &RequesterId,
        resource: &ResourceId,
    ) -> Result<Hold, LedgerError> {
        let slot = self.slot(resource)?;
        let result = {
            let mut slot = lock(&slot);
            if slot.has_room() {
                let hold = self.new_hold(requester, resource);
                slot.reserve(hold)
            } else {
                Err(LedgerError::CapacityFull(resource.clone()))
            }
        };

        if let Ok(hold) = &result {
            self.hold_index
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(hold.id, resource.clone());
        }
        Self::log_result("reserve", resource, &result);
        result
    }

    /// Turn a tentative hold into a confirmed one.
    ///
    /// Confirming an already confirmed hold returns it unchanged.
    pub fn confirm(&self, hold: HoldId) -> Result<Hold, LedgerError> {
        let resource = self.owner(hold)?;
        let slot = self.slot(&resource)?;
        let result = lock(&slot).confirm(hold);
        Self::log_result("confirm", &resource, &result);
        result
    }

    /// Give a hold's unit of capacity back.
    ///
    /// A tentative hold becomes cancelled; a confirmed hold is withdrawn.
    /// Releasing a hold that already gave its unit back is a no-op.
    pub fn release(&self, hold: HoldId) -> Result<Hold, LedgerError> {
        let resource = self.owner(hold)?;
        let slot = self.slot(&resource)?;
        let result = lock(&slot).release(hold);
        Self::log_result("release", &resource, &result);
        result
    }

    /// Cancel a hold that is still tentative.
    ///
    /// Unlike [`release`](Self::release), a hold that already left the
    /// tentative state is an error, so callers learn whether this call is the
    /// one that gave the unit back.
    pub fn cancel(&self, hold: HoldId) -> Result<Hold, LedgerError> {
        let resource = self.owner(hold)?;
        let slot = self.slot(&resource)?;
        let result = lock(&slot).cancel(hold);
        Self::log_result("cancel", &resource, &result);
        result
    }

    pub fn utilization(&self, resource: &ResourceId) -> Result<Utilization, LedgerError> {
        let slot = self.slot(resource)?;
        let util = lock(&slot).utilization();
        Ok(util)
    }

    /// Snapshot of every registered resource, sorted by id.
    pub fn resources(&self) -> Vec<(ResourceId, Utilization)> {
        let mut snapshot: Vec<_> = self
            .slots()
            .into_iter()
            .map(|(id, slot)| {
                let util = lock(&slot).utilization();
                (id, util)
            })
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    pub fn hold(&self, hold: HoldId) -> Option<Hold> {
        let resource = self.owner(hold).ok()?;
        let slot = self.slot(&resource).ok()?;
        lock(&slot).hold(hold).cloned()
    }

    /// Release every tentative hold whose expiry is at or before `now`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<Hold> {
        let mut released = Vec::new();
        for (resource, slot) in self.slots() {
            let mut slot = lock(&slot);
            for id in slot.expired(now) {
                match slot.cancel(id) {
                    Ok(hold) => {
                        warn!(
                            resource = %resource,
                            hold = %hold.id,
                            requester = %hold.requester,
                            "expired tentative hold released"
                        );
                        released.push(hold);
                    }
                    Err(e) => warn!(resource = %resource, hold = %id, reason = %e, "sweep skipped hold"),
                }
            }
        }
        released
    }
}

/// Private API
impl Ledger {
    fn log_result(op: &str, resource: &ResourceId, result: &Result<Hold, LedgerError>) {
        match result {
            Ok(hold) => info!(
                resource = %resource,
                hold = %hold.id,
                requester = %hold.requester,
                state = %hold.state,
                withdrawn = hold.withdrawn,
                "{op} applied"
            ),
            Err(e) => info!(resource = %resource, reason = %e, "{op} skipped"),
        }
    }

    fn new_hold(&self, requester: &RequesterId, resource: &ResourceId) -> Hold {
        let id = HoldId::new(self.next_hold.fetch_add(1, Ordering::Relaxed));
        let created_at = Utc::now();
        Hold {
            id,
            requester: requester.clone(),
            resource: resource.clone(),
            state: HoldState::Tentative,
            withdrawn: false,
            created_at,
            expires_at: created_at + self.hold_ttl,
        }
    }

    fn slot(&self, resource: &ResourceId) -> Result<Arc<Mutex<ResourceSlot>>, LedgerError> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .cloned()
            .ok_or_else(|| LedgerError::ResourceNotFound(resource.clone()))
    }

    fn slots(&self) -> Vec<(ResourceId, Arc<Mutex<ResourceSlot>>)> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect()
    }

    fn owner(&self, hold: HoldId) -> Result<ResourceId, LedgerError> {
        self.hold_index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&hold)
            .cloned()
            .ok_or(LedgerError::HoldNotFound(hold))
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_HOLD_TTL_SECS))
    }
}

// Slot mutations finish before anything can panic, so a poisoned slot is still consistent.
fn lock(slot: &Mutex<ResourceSlot>) -> MutexGuard<'_, ResourceSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Periodically release expired tentative holds until the handle is aborted.
pub fn spawn_sweeper(ledger: Arc<Ledger>, every: StdDuration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let released = ledger.sweep_expired(Utc::now());
            if !released.is_empty() {
                info!(count = released.len(), "sweep released expired holds");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    // test utils

    fn ledger_with(resource: &str, capacity: u32) -> Ledger {
        let ledger = Ledger::default();
        ledger.register(resource.into(), capacity).unwrap();
        ledger
    }

    fn util(ledger: &Ledger, resource: &str) -> Utilization {
        ledger.utilization(&resource.into()).unwrap()
    }

    fn assert_invariant(u: Utilization) {
        assert!(u.confirmed + u.tentative <= u.capacity, "{u:?}");
    }

    // Register

    #[test]
    fn register_rejects_zero_capacity() {
        let ledger = Ledger::default();
        assert_eq!(
            ledger.register("course-A".into(), 0),
            Err(LedgerError::ZeroCapacity("course-A".into()))
        );
    }

    #[test]
    fn register_rejects_duplicates() {
        let ledger = ledger_with("course-A", 2);
        assert_eq!(
            ledger.register("course-A".into(), 5),
            Err(LedgerError::DuplicateResource("course-A".into()))
        );
        assert_eq!(util(&ledger, "course-A").capacity, 2);
    }

    // Reserve

    #[test]
    fn reserve_creates_tentative_hold() {
        let ledger = ledger_with("course-A", 2);
        let hold = ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();

        assert_eq!(hold.state, HoldState::Tentative);
        assert_eq!(hold.requester, RequesterId::from("s1"));
        assert_eq!(hold.resource, ResourceId::from("course-A"));
        assert_eq!(
            hold.expires_at - hold.created_at,
            Duration::seconds(DEFAULT_HOLD_TTL_SECS)
        );
        assert_eq!(util(&ledger, "course-A").tentative, 1);
        assert_eq!(ledger.hold(hold.id), Some(hold));
    }

    #[test]
    fn reserve_unknown_resource_fails() {
        let ledger = Ledger::default();
        assert_eq!(
            ledger.reserve(&"s1".into(), &"nope".into()),
            Err(LedgerError::ResourceNotFound("nope".into()))
        );
    }

    #[test]
    fn reserve_full_resource_fails() {
        let ledger = ledger_with("course-A", 1);
        ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();

        let result = ledger.reserve(&"s2".into(), &"course-A".into());
        assert_eq!(result, Err(LedgerError::CapacityFull("course-A".into())));
        assert_eq!(util(&ledger, "course-A").tentative, 1);
    }

    #[test]
    fn hold_ids_are_unique() {
        let ledger = ledger_with("course-A", 3);
        let a = ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();
        let b = ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();
        assert_ne!(a.id, b.id);
    }

    // Confirm

    #[test]
    fn confirm_moves_tentative_to_confirmed() {
        let ledger = ledger_with("course-A", 2);
        let hold = ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();
        let confirmed = ledger.confirm(hold.id).unwrap();

        assert_eq!(confirmed.state, HoldState::Confirmed);
        assert_eq!(confirmed.id, hold.id);
        let u = util(&ledger, "course-A");
        assert_eq!((u.confirmed, u.tentative), (1, 0));
    }

    #[test]
    fn confirm_twice_is_noop() {
        let ledger = ledger_with("course-A", 2);
        let hold = ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();
        let first = ledger.confirm(hold.id).unwrap();
        let second = ledger.confirm(hold.id).unwrap();

        assert_eq!(first, second);
        let u = util(&ledger, "course-A");
        assert_eq!((u.confirmed, u.tentative), (1, 0));
    }

    #[test]
    fn confirm_cancelled_hold_fails() {
        let ledger = ledger_with("course-A", 2);
        let hold = ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();
        ledger.release(hold.id).unwrap();

        assert_eq!(
            ledger.confirm(hold.id),
            Err(LedgerError::InvalidHoldState(
                HoldOperation::Confirm,
                hold.id,
                HoldState::Cancelled
            ))
        );
        let u = util(&ledger, "course-A");
        assert_eq!((u.confirmed, u.tentative), (0, 0));
    }

    #[test]
    fn confirm_unknown_hold_fails() {
        let ledger = ledger_with("course-A", 2);
        assert_eq!(
            ledger.confirm(HoldId::new(99)),
            Err(LedgerError::HoldNotFound(HoldId::new(99)))
        );
    }

    // Release

    #[test]
    fn release_tentative_cancels() {
        let ledger = ledger_with("course-A", 1);
        let hold = ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();
        let released = ledger.release(hold.id).unwrap();

        assert_eq!(released.state, HoldState::Cancelled);
        assert!(!released.withdrawn);
        assert_eq!(util(&ledger, "course-A").tentative, 0);

        // capacity is back
        ledger.reserve(&"s2".into(), &"course-A".into()).unwrap();
    }

    #[test]
    fn release_twice_is_noop() {
        let ledger = ledger_with("course-A", 2);
        let a = ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();
        ledger.reserve(&"s2".into(), &"course-A".into()).unwrap();
        ledger.release(a.id).unwrap();
        let before = util(&ledger, "course-A");

        let again = ledger.release(a.id).unwrap();
        assert_eq!(again.state, HoldState::Cancelled);
        assert_eq!(util(&ledger, "course-A"), before);
    }

    #[test]
    fn cancel_reports_holds_that_already_left_tentative() {
        let ledger = ledger_with("course-A", 2);
        let a = ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();

        assert_eq!(ledger.cancel(a.id).unwrap().state, HoldState::Cancelled);
        assert!(matches!(
            ledger.cancel(a.id),
            Err(LedgerError::InvalidHoldState(HoldOperation::Release, id, HoldState::Cancelled)) if id == a.id
        ));
        assert_eq!(util(&ledger, "course-A").tentative, 0);
        assert!(matches!(
            ledger.cancel(HoldId::new(99)),
            Err(LedgerError::HoldNotFound(_))
        ));
    }

    #[test]
    fn release_confirmed_is_withdrawal() {
        let ledger = ledger_with("course-A", 2);
        let hold = ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();
        ledger.confirm(hold.id).unwrap();

        let withdrawn = ledger.release(hold.id).unwrap();
        assert_eq!(withdrawn.state, HoldState::Confirmed);
        assert!(withdrawn.withdrawn);
        assert_eq!(util(&ledger, "course-A").confirmed, 0);

        // second withdrawal changes nothing
        ledger.release(hold.id).unwrap();
        let u = util(&ledger, "course-A");
        assert_eq!((u.confirmed, u.tentative), (0, 0));
    }

    #[test]
    fn confirm_after_withdrawal_is_noop() {
        let ledger = ledger_with("course-A", 2);
        let hold = ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();
        ledger.confirm(hold.id).unwrap();
        ledger.release(hold.id).unwrap();

        let again = ledger.confirm(hold.id).unwrap();
        assert!(again.withdrawn);
        assert_eq!(util(&ledger, "course-A").confirmed, 0);
    }

    // Snapshots

    #[test]
    fn resources_are_sorted() {
        let ledger = Ledger::default();
        ledger.register("course-B".into(), 1).unwrap();
        ledger.register("course-A".into(), 2).unwrap();

        let ids: Vec<_> = ledger
            .resources()
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(ids, ["course-A", "course-B"]);
    }

    // Sweep

    #[test]
    fn sweep_releases_only_expired_tentative_holds() {
        let ledger = Ledger::new(Duration::seconds(30));
        ledger.register("course-A".into(), 3).unwrap();
        let stale = ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();
        let kept = ledger.reserve(&"s2".into(), &"course-A".into()).unwrap();
        ledger.confirm(kept.id).unwrap();

        let released = ledger.sweep_expired(Utc::now() + Duration::seconds(31));

        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, stale.id);
        assert_eq!(released[0].state, HoldState::Cancelled);
        let u = util(&ledger, "course-A");
        assert_eq!((u.confirmed, u.tentative), (1, 0));
    }

    #[test]
    fn sweep_before_expiry_does_nothing() {
        let ledger = ledger_with("course-A", 1);
        ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();
        assert!(ledger.sweep_expired(Utc::now()).is_empty());
        assert_eq!(util(&ledger, "course-A").tentative, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_reclaims_expired_holds() {
        let ledger = Arc::new(Ledger::new(Duration::zero()));
        ledger.register("course-A".into(), 1).unwrap();
        ledger.reserve(&"s1".into(), &"course-A".into()).unwrap();

        let handle = spawn_sweeper(Arc::clone(&ledger), StdDuration::from_secs(1));
        tokio::time::sleep(StdDuration::from_millis(1500)).await;
        handle.abort();

        assert_eq!(ledger.utilization(&"course-A".into()).unwrap().tentative, 0);
    }

    // Concurrency

    #[test]
    fn last_slot_goes_to_exactly_one_thread() {
        let ledger = ledger_with("course-A", 1);
        let barrier = Barrier::new(2);

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = ["s1", "s2"]
                .into_iter()
                .map(|who| {
                    let (ledger, barrier) = (&ledger, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        ledger.reserve(&who.into(), &"course-A".into())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(LedgerError::CapacityFull(_))))
                .count(),
            1
        );
        assert_eq!(util(&ledger, "course-A").tentative, 1);
    }

    #[test]
    fn contended_reserve_confirm_release_keeps_invariant() {
        let ledger = ledger_with("course-A", 5);

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let ledger = &ledger;
                scope.spawn(move || {
                    for round in 0..200 {
                        let requester = RequesterId::new(format!("w{worker}-{round}"));
                        if let Ok(hold) = ledger.reserve(&requester, &"course-A".into()) {
                            assert_invariant(util(ledger, "course-A"));
                            if round % 2 == 0 {
                                ledger.confirm(hold.id).unwrap();
                            }
                            ledger.release(hold.id).unwrap();
                        }
                        assert_invariant(util(ledger, "course-A"));
                    }
                });
            }
        });

        let u = util(&ledger, "course-A");
        assert_eq!((u.confirmed, u.tentative), (0, 0));
    }

    // Property: random operation sequences never over-subscribe or drift counters

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Reserve(u8),
            Confirm(usize),
            Release(usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u8..6).prop_map(Op::Reserve),
                any::<usize>().prop_map(Op::Confirm),
                any::<usize>().prop_map(Op::Release),
            ]
        }

        proptest! {
            #[test]
            fn counters_match_holds(capacity in 1u32..6, ops in prop::collection::vec(op(), 0..64)) {
                let ledger = ledger_with("course-A", capacity);
                let mut holds = Vec::new();

                for op in ops {
                    match op {
                        Op::Reserve(who) => {
                            if let Ok(hold) = ledger.reserve(&format!("s{who}").into(), &"course-A".into()) {
                                holds.push(hold.id);
                            }
                        }
                        Op::Confirm(i) if !holds.is_empty() => {
                            let _ = ledger.confirm(holds[i % holds.len()]);
                        }
                        Op::Release(i) if !holds.is_empty() => {
                            let _ = ledger.release(holds[i % holds.len()]);
                        }
                        _ => {}
                    }

                    let u = util(&ledger, "course-A");
                    prop_assert!(u.confirmed + u.tentative <= u.capacity);

                    let all: Vec<Hold> = holds.iter().filter_map(|id| ledger.hold(*id)).collect();
                    let tentative = all.iter().filter(|h| h.state == HoldState::Tentative).count();
                    let confirmed = all
                        .iter()
                        .filter(|h| h.state == HoldState::Confirmed && !h.withdrawn)
                        .count();
                    prop_assert_eq!(u.tentative as usize, tentative);
                    prop_assert_eq!(u.confirmed as usize, confirmed);
                }
            }
        }
    }
}
