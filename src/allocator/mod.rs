//! Reservation allocator.
//!
//! Wraps the [`Ledger`] with requester identity rules: a requester holds at
//! most one active hold per resource, and confirm/cancel/withdraw act on the
//! requester's own holds. Holds are only ever created or moved through here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::ledger::{Ledger, LedgerError};
use crate::model::{Hold, HoldId, HoldState, RequesterId, ResourceId};

mod error;
pub use error::AllocationError;

/// Hold ids of one requester, oldest first.
type RequesterHolds = Arc<Mutex<Vec<HoldId>>>;

pub struct Allocator {
    ledger: Arc<Ledger>,
    requesters: Mutex<HashMap<RequesterId, RequesterHolds>>,
}

/// Public API
impl Allocator {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            requesters: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Place a tentative hold on `resource` for `requester`.
    ///
    /// Fails with [`AllocationError::AlreadyReserved`] when the requester
    /// already has an active hold on that resource. The check and the
    /// reservation happen under the requester's lock, so retried requests
    /// can never produce a second hold.
    pub fn allocate(
        &self,
        requester: &RequesterId,
        resource: &ResourceId,
    ) -> Result<Hold, AllocationError> {
        let entry = self.entry(requester);
        let mut held = lock(&entry);

        if let Some(existing) = self.latest(&held, |h| &h.resource == resource && h.is_active()) {
            info!(
                requester = %requester,
                resource = %resource,
                hold = %existing.id,
                "allocation refused, hold already active"
            );
            return Err(AllocationError::AlreadyReserved(
                requester.clone(),
                resource.clone(),
                existing.id,
            ));
        }

        let hold = self.ledger.reserve(requester, resource)?;
        held.push(hold.id);
        Ok(hold)
    }

    /// Confirm the requester's most recent tentative hold.
    pub fn confirm_allocation(&self, requester: &RequesterId) -> Result<Hold, AllocationError> {
        self.confirm_matching(requester, |_| true)
    }

    /// Confirm the requester's tentative hold on `resource`.
    pub fn confirm_allocation_for(
        &self,
        requester: &RequesterId,
        resource: &ResourceId,
    ) -> Result<Hold, AllocationError> {
        self.confirm_matching(requester, |h| &h.resource == resource)
    }

    /// Confirm exactly `hold`, which must belong to `requester`.
    ///
    /// A hold that was cancelled in the meantime (for example by the expiry
    /// sweep) is refused; another hold of the same requester is never
    /// confirmed in its place.
    pub fn confirm_hold(
        &self,
        requester: &RequesterId,
        hold: HoldId,
    ) -> Result<Hold, AllocationError> {
        let not_found = || AllocationError::NotFound(requester.clone());
        let entry = self.existing(requester).ok_or_else(not_found)?;
        let held = lock(&entry);
        if !held.contains(&hold) {
            return Err(not_found());
        }
        Ok(self.ledger.confirm(hold)?)
    }

    /// Cancel exactly `hold` if it belongs to `requester` and is still tentative.
    ///
    /// Returns whether this call gave the unit back.
    pub fn cancel_hold(&self, requester: &RequesterId, hold: HoldId) -> bool {
        let Some(entry) = self.existing(requester) else {
            return false;
        };
        let held = lock(&entry);
        if !held.contains(&hold) {
            return false;
        }
        self.cancel_tentative(requester, hold)
    }

    /// Release the requester's most recent tentative hold, if any.
    pub fn cancel_allocation(&self, requester: &RequesterId) -> bool {
        self.release_matching(requester, HoldState::Tentative, |_| true)
    }

    /// Release the requester's tentative hold on `resource`, if any.
    pub fn cancel_allocation_for(&self, requester: &RequesterId, resource: &ResourceId) -> bool {
        self.release_matching(requester, HoldState::Tentative, |h| &h.resource == resource)
    }

    /// Give back the requester's most recent confirmed seat.
    pub fn withdraw(&self, requester: &RequesterId) -> bool {
        self.release_matching(requester, HoldState::Confirmed, |_| true)
    }

    /// Give back the requester's confirmed seat on `resource`.
    pub fn withdraw_from(&self, requester: &RequesterId, resource: &ResourceId) -> bool {
        self.release_matching(requester, HoldState::Confirmed, |h| &h.resource == resource)
    }

    /// Every hold the requester ever placed, oldest first.
    pub fn holds_of(&self, requester: &RequesterId) -> Vec<Hold> {
        let Some(entry) = self.existing(requester) else {
            return Vec::new();
        };
        let held = lock(&entry);
        held.iter().filter_map(|id| self.ledger.hold(*id)).collect()
    }
}

/// Private API
impl Allocator {
    fn entry(&self, requester: &RequesterId) -> RequesterHolds {
        let mut requesters = self
            .requesters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(requesters.entry(requester.clone()).or_default())
    }

    fn existing(&self, requester: &RequesterId) -> Option<RequesterHolds> {
        self.requesters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(requester)
            .cloned()
    }

    /// Most recent hold in `held` matching `filter`, as currently recorded by the ledger.
    fn latest(&self, held: &[HoldId], filter: impl Fn(&Hold) -> bool) -> Option<Hold> {
        held.iter()
            .rev()
            .filter_map(|id| self.ledger.hold(*id))
            .find(|h| filter(h))
    }

    fn confirm_matching(
        &self,
        requester: &RequesterId,
        filter: impl Fn(&Hold) -> bool,
    ) -> Result<Hold, AllocationError> {
        let not_found = || AllocationError::NotFound(requester.clone());
        let entry = self.existing(requester).ok_or_else(not_found)?;
        let held = lock(&entry);

        let hold = self
            .latest(&held, |h| h.state == HoldState::Tentative && filter(h))
            .ok_or_else(not_found)?;
        Ok(self.ledger.confirm(hold.id)?)
    }

    /// Release the latest active hold in `state` matching `filter`.
    fn release_matching(
        &self,
        requester: &RequesterId,
        state: HoldState,
        filter: impl Fn(&Hold) -> bool,
    ) -> bool {
        let Some(entry) = self.existing(requester) else {
            return false;
        };
        let held = lock(&entry);

        let Some(hold) = self.latest(&held, |h| h.state == state && h.is_active() && filter(h))
        else {
            return false;
        };

        if state == HoldState::Tentative {
            return self.cancel_tentative(requester, hold.id);
        }
        match self.ledger.release(hold.id) {
            Ok(_) => true,
            Err(e) => {
                warn!(requester = %requester, hold = %hold.id, reason = %e, "release failed");
                false
            }
        }
    }

    fn cancel_tentative(&self, requester: &RequesterId, hold: HoldId) -> bool {
        match self.ledger.cancel(hold) {
            Ok(_) => true,
            Err(LedgerError::InvalidHoldState(_, _, state)) => {
                info!(requester = %requester, hold = %hold, state = %state, "hold no longer tentative");
                false
            }
            Err(e) => {
                warn!(requester = %requester, hold = %hold, reason = %e, "cancel failed");
                false
            }
        }
    }
}

fn lock(entry: &Mutex<Vec<HoldId>>) -> MutexGuard<'_, Vec<HoldId>> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}
