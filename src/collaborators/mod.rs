//! Contracts of the external services an enrollment depends on.
//!
//! The orchestrator only looks at the success flag and message of each
//! outcome. An `Err` means the service itself broke, as opposed to refusing
//! the request, and is handled as a system error.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;

use crate::Fee;
use crate::model::{RequesterId, ResourceId};

mod simulated;
pub use simulated::{DocumentChecklist, SequentialIssuer, SimulatedGateway};

/// Documents submitted with an enrollment, passed through to the [`Verifier`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationInput {
    pub documents: Vec<String>,
}

impl VerificationInput {
    pub fn new<S: Into<String>>(documents: impl IntoIterator<Item = S>) -> Self {
        Self {
            documents: documents.into_iter().map(Into::into).collect(),
        }
    }
}

/// Fee and payment method, passed through to the [`PaymentGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentInput {
    pub amount: Fee,
    pub method: String,
}

impl PaymentInput {
    pub fn new(amount: Fee, method: impl Into<String>) -> Self {
        Self {
            amount,
            method: method.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub approved: bool,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdCard {
    pub number: String,
    pub holder: RequesterId,
    pub resource: ResourceId,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuance {
    pub success: bool,
    pub issued_id: Option<String>,
    pub card: Option<IdCard>,
    pub message: String,
}

/// A collaborator failed to produce an outcome at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{service}: {reason}")]
    Failed {
        service: &'static str,
        reason: String,
    },
}

pub trait Verifier: Send + Sync {
    fn verify<'a>(
        &'a self,
        requester: &'a RequesterId,
        input: &'a VerificationInput,
    ) -> BoxFuture<'a, Result<Verification, CollaboratorError>>;
}

pub trait PaymentGateway: Send + Sync {
    fn charge<'a>(
        &'a self,
        requester: &'a RequesterId,
        amount: Fee,
        method: &'a str,
    ) -> BoxFuture<'a, Result<Charge, CollaboratorError>>;
}

pub trait IdentityIssuer: Send + Sync {
    fn issue<'a>(
        &'a self,
        requester: &'a RequesterId,
        resource: &'a ResourceId,
    ) -> BoxFuture<'a, Result<Issuance, CollaboratorError>>;
}
