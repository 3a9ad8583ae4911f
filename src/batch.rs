//! Batch driver: feeds a stream of requests through the orchestrator.
//!
//! Enrollments run concurrently up to a limit. A withdrawal waits for every
//! earlier request to finish first, so it always sees the seats they took.

use tokio::task::JoinSet;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::csv::Request;
use crate::model::{RequesterId, ResourceId};
use crate::saga::{EnrollmentResult, Orchestrator};

/// Counts of how each request in a batch ended.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub enrolled: usize,
    pub rejected: usize,
    pub system_errors: usize,
    pub withdrawn: usize,
    pub nothing_to_withdraw: usize,
}

type Finished = (RequesterId, ResourceId, EnrollmentResult);

impl BatchSummary {
    fn record(&mut self, (requester, resource, result): Finished) {
        let path: Vec<String> = result
            .steps
            .iter()
            .map(|s| format!("{}:{}", s.step, if s.success { "ok" } else { "fail" }))
            .collect();

        match &result.error {
            None => {
                self.enrolled += 1;
                info!(requester = %requester, resource = %resource, "enrolled");
            }
            Some(e) => {
                if e.is_system() {
                    self.system_errors += 1;
                } else {
                    self.rejected += 1;
                }
                warn!(
                    requester = %requester,
                    resource = %resource,
                    steps = %path.join(" > "),
                    "enrollment failed: {e}"
                );
            }
        }
    }
}

/// Run every request in `requests`, with at most `max_in_flight` enrollments at once.
pub async fn run(
    orchestrator: &Orchestrator,
    mut requests: impl Stream<Item = Request> + Unpin,
    max_in_flight: usize,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    let mut in_flight: JoinSet<Finished> = JoinSet::new();

    while let Some(request) = requests.next().await {
        match request {
            Request::Enroll {
                requester,
                resource,
                verification,
                payment,
            } => {
                while in_flight.len() >= max_in_flight.max(1) {
                    join_one(&mut in_flight, &mut summary).await;
                }
                let orchestrator = orchestrator.clone();
                in_flight.spawn(async move {
                    let result = orchestrator
                        .enroll(requester.clone(), resource.clone(), verification, payment)
                        .await;
                    (requester, resource, result)
                });
            }
            Request::Withdraw { requester } => {
                while !in_flight.is_empty() {
                    join_one(&mut in_flight, &mut summary).await;
                }
                if orchestrator.withdraw(&requester) {
                    summary.withdrawn += 1;
                } else {
                    summary.nothing_to_withdraw += 1;
                    warn!(requester = %requester, "nothing to withdraw");
                }
            }
        }
    }

    while !in_flight.is_empty() {
        join_one(&mut in_flight, &mut summary).await;
    }
    summary
}

async fn join_one(in_flight: &mut JoinSet<Finished>, summary: &mut BatchSummary) {
    match in_flight.join_next().await {
        Some(Ok(finished)) => summary.record(finished),
        Some(Err(e)) => {
            summary.system_errors += 1;
            warn!(reason = %e, "enrollment task failed");
        }
        None => {}
    }
}
