//! Error taxonomy of an enrollment attempt.

use thiserror::Error;

use crate::allocator::AllocationError;
use crate::ledger::LedgerError;
use crate::model::{RequesterId, ResourceId};

/// Why an enrollment attempt did not succeed.
///
/// Everything except [`InvalidHoldState`](Self::InvalidHoldState) and
/// [`SystemError`](Self::SystemError) is an expected outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnrollmentError {
    #[error("resource {0} not found")]
    ResourceNotFound(ResourceId),

    #[error("resource {0} is full")]
    CapacityFull(ResourceId),

    #[error("requester {0} already holds a seat on {1}")]
    AlreadyReserved(RequesterId, ResourceId),

    #[error("invalid hold state: {0}")]
    InvalidHoldState(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("payment failed: {0}")]
    PaymentFailed(String),

    #[error("identity issuance failed: {0}")]
    IssuanceFailed(String),

    #[error("system error: {0}")]
    SystemError(String),
}

impl EnrollmentError {
    /// Bugs and broken collaborators, as opposed to normal refusals.
    pub fn is_system(&self) -> bool {
        matches!(self, Self::InvalidHoldState(_) | Self::SystemError(_))
    }
}

impl From<LedgerError> for EnrollmentError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::ResourceNotFound(resource) => Self::ResourceNotFound(resource),
            LedgerError::CapacityFull(resource) => Self::CapacityFull(resource),
            LedgerError::InvalidHoldState(..) => Self::InvalidHoldState(e.to_string()),
            LedgerError::HoldNotFound(_)
            | LedgerError::DuplicateResource(_)
            | LedgerError::ZeroCapacity(_) => Self::SystemError(e.to_string()),
        }
    }
}

impl From<AllocationError> for EnrollmentError {
    fn from(e: AllocationError) -> Self {
        match e {
            AllocationError::AlreadyReserved(requester, resource, _) => {
                Self::AlreadyReserved(requester, resource)
            }
            AllocationError::NotFound(_) => Self::SystemError(e.to_string()),
            AllocationError::Ledger(e) => e.into(),
        }
    }
}
