use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::debug;

use super::EnrollmentError;
use crate::model::{HoldId, StepName, StepRecord};

/// Append-only record of the steps taken by one enrollment attempt.
///
/// Clones share the same trail, so the caller still sees every step the
/// pipeline recorded even if the task running it dies.
#[derive(Debug, Default, Clone)]
pub(super) struct StepLog {
    trail: Arc<Mutex<Trail>>,
}

#[derive(Debug, Default)]
struct Trail {
    steps: Vec<StepRecord>,
    hold: Option<HoldId>,
}

impl StepLog {
    pub fn record(&self, step: StepName, success: bool, message: impl Into<String>) {
        let message = message.into();
        debug!(step = %step, success, message = %message, "step recorded");
        self.trail().steps.push(StepRecord {
            step,
            success,
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn ok(&self, step: StepName, message: impl Into<String>) {
        self.record(step, true, message);
    }

    pub fn fail(&self, step: StepName, message: impl Into<String>) {
        self.record(step, false, message);
    }

    /// Remember the hold this attempt placed.
    pub fn held(&self, hold: HoldId) {
        self.trail().hold = Some(hold);
    }

    pub fn hold(&self) -> Option<HoldId> {
        self.trail().hold
    }

    /// Take the recorded trail and fold it into the final result.
    pub fn finish(&self, outcome: Outcome) -> EnrollmentResult {
        let Trail { steps, hold } = mem::take(&mut *self.trail());
        let Outcome {
            transaction_id,
            issued_id,
            error,
        } = outcome;
        let (success, message) = match &error {
            None => (true, "enrollment confirmed".to_string()),
            Some(e) => (false, e.to_string()),
        };
        EnrollmentResult {
            success,
            message,
            steps,
            hold,
            transaction_id,
            issued_id,
            error,
        }
    }

    fn trail(&self) -> MutexGuard<'_, Trail> {
        self.trail.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What an attempt produced so far, folded into the final result.
#[derive(Debug, Default)]
pub(super) struct Outcome {
    pub transaction_id: Option<String>,
    pub issued_id: Option<String>,
    pub error: Option<EnrollmentError>,
}

/// Result of one enrollment attempt.
///
/// `steps` is the complete ordered history whatever the outcome, so a caller
/// can always tell why an attempt succeeded or failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentResult {
    pub success: bool,
    pub message: String,
    pub steps: Vec<StepRecord>,
    pub hold: Option<HoldId>,
    pub transaction_id: Option<String>,
    pub issued_id: Option<String>,
    pub error: Option<EnrollmentError>,
}

impl EnrollmentResult {
    /// `(step, success)` pairs, handy for matching on the path an attempt took.
    pub fn path(&self) -> Vec<(StepName, bool)> {
        self.steps.iter().map(|s| (s.step, s.success)).collect()
    }
}
