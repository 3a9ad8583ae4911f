use thiserror::Error;

use crate::ledger::LedgerError;
use crate::model::{HoldId, RequesterId, ResourceId};

/// Error returned by [`Allocator`](super::Allocator) operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("requester {0} already holds {2} on {1}")]
    AlreadyReserved(RequesterId, ResourceId, HoldId),

    #[error("requester {0} has no tentative hold")]
    NotFound(RequesterId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
