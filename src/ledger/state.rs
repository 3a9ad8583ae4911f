use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::error::{HoldOperation, LedgerError};
use crate::model::{Hold, HoldId, HoldState, ResourceId, Utilization};

/// Occupancy counters of one resource together with the holds placed on it.
///
/// Every counter change happens here, next to the hold transition that
/// causes it, so `confirmed + tentative <= capacity` is checked in one place.
#[derive(Debug)]
pub struct ResourceSlot {
    id: ResourceId,
    capacity: u32,
    confirmed: u32,
    tentative: u32,
    holds: HashMap<HoldId, Hold>,
}

impl ResourceSlot {
    pub fn new(id: ResourceId, capacity: u32) -> Self {
        Self {
            id,
            capacity,
            confirmed: 0,
            tentative: 0,
            holds: HashMap::new(),
        }
    }

    pub fn utilization(&self) -> Utilization {
        Utilization {
            capacity: self.capacity,
            confirmed: self.confirmed,
            tentative: self.tentative,
        }
    }

    pub fn has_room(&self) -> bool {
        self.confirmed + self.tentative < self.capacity
    }

    pub fn hold(&self, id: HoldId) -> Option<&Hold> {
        self.holds.get(&id)
    }

    /// Take one unit of capacity for `hold`, which must be tentative.
    pub fn reserve(&mut self, hold: Hold) -> Result<Hold, LedgerError> {
        debug_assert_eq!(hold.state, HoldState::Tentative);
        if !self.has_room() {
            return Err(LedgerError::CapacityFull(self.id.clone()));
        }
        self.tentative += 1;
        self.holds.insert(hold.id, hold.clone());
        Ok(hold)
    }

    pub fn confirm(&mut self, id: HoldId) -> Result<Hold, LedgerError> {
        let hold = self
            .holds
            .get_mut(&id)
            .ok_or(LedgerError::HoldNotFound(id))?;

        match hold.state {
            HoldState::Tentative => {
                hold.state = HoldState::Confirmed;
                self.tentative -= 1;
                self.confirmed += 1;
            }
            HoldState::Confirmed => {}
            HoldState::Cancelled => {
                return Err(LedgerError::InvalidHoldState(
                    HoldOperation::Confirm,
                    id,
                    hold.state,
                ));
            }
        }
        Ok(hold.clone())
    }

    pub fn release(&mut self, id: HoldId) -> Result<Hold, LedgerError> {
        let hold = self
            .holds
            .get_mut(&id)
            .ok_or(LedgerError::HoldNotFound(id))?;

        match (hold.state, hold.withdrawn) {
            (HoldState::Tentative, _) => {
                hold.state = HoldState::Cancelled;
                self.tentative -= 1;
            }
            (HoldState::Confirmed, false) => {
                hold.withdrawn = true;
                self.confirmed -= 1;
            }
            // already terminal
            (HoldState::Confirmed, true) | (HoldState::Cancelled, _) => {}
        }
        Ok(hold.clone())
    }

    /// Cancel a tentative hold; any other state is refused.
    pub fn cancel(&mut self, id: HoldId) -> Result<Hold, LedgerError> {
        let hold = self
            .holds
            .get_mut(&id)
            .ok_or(LedgerError::HoldNotFound(id))?;

        if hold.state != HoldState::Tentative {
            return Err(LedgerError::InvalidHoldState(
                HoldOperation::Release,
                id,
                hold.state,
            ));
        }
        hold.state = HoldState::Cancelled;
        self.tentative -= 1;
        Ok(hold.clone())
    }

    pub fn expired(&self, now: DateTime<Utc>) -> Vec<HoldId> {
        self.holds
            .values()
            .filter(|h| h.is_expired(now))
            .map(|h| h.id)
            .collect()
    }
}
