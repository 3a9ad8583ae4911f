//! Enrollment saga.
//!
//! Runs the fixed pipeline for one enrollment attempt:
//!
//! ```text
//! AllocateResource ─► VerifyRequester ─► ProcessPayment ─► IssueIdentity ─► ConfirmAllocation
//!                          │                   │                 │
//!                          └───────────────────┴─────────────────┴─► Compensation (cancel hold)
//! ```
//!
//! Only the seat is compensated. A charge or an issued id is not undone when a
//! later step fails.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, info};

use crate::allocator::Allocator;
use crate::collaborators::{
    CollaboratorError, IdentityIssuer, PaymentGateway, PaymentInput, VerificationInput, Verifier,
};
use crate::model::{HoldId, RequesterId, ResourceId, StepName, Utilization};

mod error;
pub use error::EnrollmentError;

mod steps;
pub use steps::EnrollmentResult;
use steps::{Outcome, StepLog};


/// Coordinates the allocator with the external collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    allocator: Arc<Allocator>,
    verifier: Arc<dyn Verifier>,
    payments: Arc<dyn PaymentGateway>,
    issuer: Arc<dyn IdentityIssuer>,
    step_timeout: Option<Duration>,
}

/// Public API
impl Orchestrator {
    pub fn new(
        allocator: Arc<Allocator>,
        verifier: Arc<dyn Verifier>,
        payments: Arc<dyn PaymentGateway>,
        issuer: Arc<dyn IdentityIssuer>,
    ) -> Self {
        Self {
            allocator,
            verifier,
            payments,
            issuer,
            step_timeout: None,
        }
    }

    /// Bound every collaborator call; an overrun counts as a system error.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    /// Run one enrollment attempt to completion.
    ///
    /// The pipeline runs on its own task: dropping the returned future does
    /// not interrupt it, so compensation still happens and no tentative hold
    /// is left behind by a caller that went away. If the task itself dies,
    /// the steps it recorded so far are kept and its hold is released.
    pub async fn enroll(
        &self,
        requester: RequesterId,
        resource: ResourceId,
        verification: VerificationInput,
        payment: PaymentInput,
    ) -> EnrollmentResult {
        let log = StepLog::default();
        let saga = self.clone();
        let trail = log.clone();
        let (who, what) = (requester.clone(), resource.clone());
        let attempt = tokio::spawn(async move {
            saga.run(&trail, &who, &what, &verification, &payment).await
        });

        match attempt.await {
            Ok(result) => result,
            Err(e) => self.abandoned(&log, &requester, &resource, &e.to_string()),
        }
    }

    /// Give back the requester's most recent confirmed seat.
    pub fn withdraw(&self, requester: &RequesterId) -> bool {
        let withdrawn = self.allocator.withdraw(requester);
        info!(requester = %requester, withdrawn, "withdrawal requested");
        withdrawn
    }

    pub fn utilization(&self, resource: &ResourceId) -> Result<Utilization, EnrollmentError> {
        Ok(self.allocator.ledger().utilization(resource)?)
    }
}

/// Private API
impl Orchestrator {
    async fn run(
        &self,
        log: &StepLog,
        requester: &RequesterId,
        resource: &ResourceId,
        verification: &VerificationInput,
        payment: &PaymentInput,
    ) -> EnrollmentResult {
        let mut outcome = Outcome::default();

        // Nothing is held yet, so a refusal here needs no compensation
        let hold = match self.allocator.allocate(requester, resource) {
            Ok(hold) => {
                log.ok(
                    StepName::AllocateResource,
                    format!("tentative hold {} on {resource}", hold.id),
                );
                log.held(hold.id);
                hold.id
            }
            Err(e) => {
                let e = EnrollmentError::from(e);
                info!(requester = %requester, resource = %resource, reason = %e, "enrollment refused");
                log.fail(StepName::AllocateResource, e.to_string());
                outcome.error = Some(e);
                return log.finish(outcome);
            }
        };

        let verified = self
            .guarded(
                StepName::VerifyRequester,
                self.verifier.verify(requester, verification),
            )
            .await
            .and_then(|v| {
                if v.approved {
                    Ok(v.details)
                } else {
                    Err(EnrollmentError::VerificationFailed(v.details))
                }
            });
        match verified {
            Ok(details) => log.ok(StepName::VerifyRequester, details),
            Err(e) => {
                let step = StepName::VerifyRequester;
                return self.compensate(log, outcome, step, e, requester, resource);
            }
        }

        let charged = self
            .guarded(
                StepName::ProcessPayment,
                self.payments
                    .charge(requester, payment.amount, &payment.method),
            )
            .await
            .and_then(|c| {
                if c.success {
                    Ok(c)
                } else {
                    Err(EnrollmentError::PaymentFailed(c.message))
                }
            });
        match charged {
            Ok(charge) => {
                log.ok(StepName::ProcessPayment, charge.message);
                outcome.transaction_id = charge.transaction_id;
            }
            Err(e) => {
                let step = StepName::ProcessPayment;
                return self.compensate(log, outcome, step, e, requester, resource);
            }
        }

        let issued = self
            .guarded(
                StepName::IssueIdentity,
                self.issuer.issue(requester, resource),
            )
            .await
            .and_then(|i| {
                if i.success {
                    Ok(i)
                } else {
                    Err(EnrollmentError::IssuanceFailed(i.message))
                }
            });
        match issued {
            Ok(issuance) => {
                log.ok(StepName::IssueIdentity, issuance.message);
                outcome.issued_id = issuance.issued_id;
            }
            Err(e) => {
                let step = StepName::IssueIdentity;
                return self.compensate(log, outcome, step, e, requester, resource);
            }
        }

        // A failed confirm is not compensated: a hold still tentative is left
        // to an operator or the expiry sweep.
        match self.allocator.confirm_hold(requester, hold) {
            Ok(confirmed) => {
                info!(requester = %requester, resource = %resource, hold = %confirmed.id, "enrollment confirmed");
                log.ok(
                    StepName::ConfirmAllocation,
                    format!("hold {} confirmed", confirmed.id),
                );
            }
            Err(e) => {
                let e = match EnrollmentError::from(e) {
                    e if e.is_system() => e,
                    other => EnrollmentError::SystemError(other.to_string()),
                };
                error!(
                    requester = %requester,
                    resource = %resource,
                    hold = %hold,
                    reason = %e,
                    "confirm failed, hold needs attention"
                );
                log.fail(StepName::ConfirmAllocation, e.to_string());
                log.fail(StepName::SystemError, e.to_string());
                outcome.error = Some(e);
            }
        }

        log.finish(outcome)
    }

    /// Await a collaborator call, turning errors, panics and overruns into system errors.
    async fn guarded<T>(
        &self,
        step: StepName,
        call: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, EnrollmentError> {
        let call = AssertUnwindSafe(call).catch_unwind();
        let finished = match self.step_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                EnrollmentError::SystemError(format!("{step} timed out after {limit:?}"))
            })?,
            None => call.await,
        };

        match finished {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(EnrollmentError::SystemError(format!("{step}: {e}"))),
            Err(payload) => Err(EnrollmentError::SystemError(format!(
                "{step} panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    /// Record a failed step and release the attempt's hold.
    fn compensate(
        &self,
        log: &StepLog,
        mut outcome: Outcome,
        step: StepName,
        error: EnrollmentError,
        requester: &RequesterId,
        resource: &ResourceId,
    ) -> EnrollmentResult {
        log.fail(step, error.to_string());
        if error.is_system() {
            error!(requester = %requester, resource = %resource, step = %step, reason = %error, "enrollment hit a system error");
            log.fail(StepName::SystemError, error.to_string());
        } else {
            info!(requester = %requester, resource = %resource, step = %step, reason = %error, "enrollment step failed");
        }

        if let Some(hold) = log.hold() {
            self.release_own_hold(log, requester, resource, hold);
        }

        outcome.error = Some(error);
        log.finish(outcome)
    }

    /// Cancel the attempt's own hold and record the compensation outcome.
    ///
    /// Only `hold` is touched; a newer hold of the same requester survives.
    fn release_own_hold(
        &self,
        log: &StepLog,
        requester: &RequesterId,
        resource: &ResourceId,
        hold: HoldId,
    ) {
        let (restored, message) = if self.allocator.cancel_hold(requester, hold) {
            (true, format!("hold {hold} released"))
        } else if self.hold_released(hold) {
            (true, format!("hold {hold} was already released"))
        } else {
            (false, format!("hold {hold} could not be released"))
        };
        if !restored {
            error!(requester = %requester, resource = %resource, hold = %hold, "compensation left a hold active");
        }
        log.record(StepName::Compensation, restored, message);
    }

    fn hold_released(&self, id: HoldId) -> bool {
        self.allocator
            .ledger()
            .hold(id)
            .is_none_or(|hold| !hold.is_active())
    }

    /// The attempt's task died before producing a result.
    fn abandoned(
        &self,
        log: &StepLog,
        requester: &RequesterId,
        resource: &ResourceId,
        reason: &str,
    ) -> EnrollmentResult {
        let error = EnrollmentError::SystemError(format!("enrollment task failed: {reason}"));
        error!(requester = %requester, resource = %resource, reason = %error, "enrollment task failed");

        log.fail(StepName::SystemError, error.to_string());
        if let Some(hold) = log.hold() {
            self.release_own_hold(log, requester, resource, hold);
        }

        log.finish(Outcome {
            error: Some(error),
            ..Outcome::default()
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
