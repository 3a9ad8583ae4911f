//! Error types for ledger operations.

use thiserror::Error;

use crate::model::{HoldId, HoldState, ResourceId};

/// The hold transition being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldOperation {
    Confirm,
    Release,
}

/// Error returned by [`Ledger`](super::Ledger) operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("resource {0} not found")]
    ResourceNotFound(ResourceId),

    #[error("resource {0} is at capacity")]
    CapacityFull(ResourceId),

    #[error("hold {0} not found")]
    HoldNotFound(HoldId),

    #[error("{0:?}: hold {1} is {2}")]
    InvalidHoldState(HoldOperation, HoldId, HoldState),

    #[error("resource {0} is already registered")]
    DuplicateResource(ResourceId),

    #[error("resource {0} must have a positive capacity")]
    ZeroCapacity(ResourceId),
}
