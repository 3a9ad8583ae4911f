//! In-process stand-ins for the external services, used by the batch binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::info;

use super::{
    Charge, CollaboratorError, IdCard, IdentityIssuer, Issuance, PaymentGateway, Verification,
    VerificationInput, Verifier,
};
use crate::Fee;
use crate::model::{RequesterId, ResourceId};

/// Approves a requester when every required document was submitted.
#[derive(Debug, Clone)]
pub struct DocumentChecklist {
    required: Vec<String>,
}

impl DocumentChecklist {
    pub fn new<S: Into<String>>(required: impl IntoIterator<Item = S>) -> Self {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    fn missing<'a>(&'a self, input: &VerificationInput) -> Vec<&'a str> {
        self.required
            .iter()
            .filter(|doc| {
                !input
                    .documents
                    .iter()
                    .any(|given| given.trim().eq_ignore_ascii_case(doc))
            })
            .map(String::as_str)
            .collect()
    }
}

impl Default for DocumentChecklist {
    fn default() -> Self {
        Self::new(["transcript", "id-proof"])
    }
}

impl Verifier for DocumentChecklist {
    fn verify<'a>(
        &'a self,
        requester: &'a RequesterId,
        input: &'a VerificationInput,
    ) -> BoxFuture<'a, Result<Verification, CollaboratorError>> {
        async move {
            let missing = self.missing(input);
            let verification = if missing.is_empty() {
                Verification {
                    approved: true,
                    details: format!("{} documents verified", input.documents.len()),
                }
            } else {
                Verification {
                    approved: false,
                    details: format!("missing documents: {}", missing.join(", ")),
                }
            };
            info!(requester = %requester, approved = verification.approved, "documents checked");
            Ok(verification)
        }
        .boxed()
    }
}

/// Charges fees up to a limit through a fixed set of payment methods.
#[derive(Debug)]
pub struct SimulatedGateway {
    methods: Vec<String>,
    limit: Fee,
    next_txn: AtomicU64,
}

impl SimulatedGateway {
    pub fn new<S: Into<String>>(methods: impl IntoIterator<Item = S>, limit: Fee) -> Self {
        Self {
            methods: methods.into_iter().map(Into::into).collect(),
            limit,
            next_txn: AtomicU64::new(1),
        }
    }

    fn decline_reason(&self, amount: Fee, method: &str) -> Option<String> {
        if !self.methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
            Some(format!("unsupported payment method '{method}'"))
        } else if amount.is_zero() {
            Some("fee must be positive".to_string())
        } else if amount > self.limit {
            Some(format!("fee {amount} exceeds limit {}", self.limit))
        } else {
            None
        }
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new(["card", "bank-transfer"], Fee::from_major(10_000))
    }
}

impl PaymentGateway for SimulatedGateway {
    fn charge<'a>(
        &'a self,
        requester: &'a RequesterId,
        amount: Fee,
        method: &'a str,
    ) -> BoxFuture<'a, Result<Charge, CollaboratorError>> {
        async move {
            let charge = match self.decline_reason(amount, method) {
                Some(reason) => Charge {
                    success: false,
                    transaction_id: None,
                    message: reason,
                },
                None => {
                    let txn = format!("TXN-{}", self.next_txn.fetch_add(1, Ordering::Relaxed));
                    Charge {
                        success: true,
                        message: format!("charged {amount} via {method} ({txn})"),
                        transaction_id: Some(txn),
                    }
                }
            };
            info!(requester = %requester, amount = %amount, success = charge.success, "payment attempted");
            Ok(charge)
        }
        .boxed()
    }
}

/// Highest number an id can carry in its four-digit suffix.
const MAX_ID_NUMBER: u64 = 9_999;

/// Issues ids numbered per resource, e.g. `COURSE-A-0001`.
///
/// Fails once a resource has used up its four-digit number range.
#[derive(Debug, Default)]
pub struct SequentialIssuer {
    issued: Mutex<HashMap<ResourceId, u64>>,
}

impl SequentialIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_number(&self, resource: &ResourceId) -> Option<String> {
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        let n = issued.entry(resource.clone()).or_insert(0);
        if *n >= MAX_ID_NUMBER {
            return None;
        }
        *n += 1;
        Some(format!("{}-{:04}", resource.as_str().to_ascii_uppercase(), n))
    }
}

impl IdentityIssuer for SequentialIssuer {
    fn issue<'a>(
        &'a self,
        requester: &'a RequesterId,
        resource: &'a ResourceId,
    ) -> BoxFuture<'a, Result<Issuance, CollaboratorError>> {
        async move {
            let number = self
                .next_number(resource)
                .ok_or_else(|| CollaboratorError::Failed {
                    service: "identity issuer",
                    reason: format!("id numbers for {resource} exhausted"),
                })?;
            info!(requester = %requester, id = %number, "identity issued");
            Ok(Issuance {
                success: true,
                issued_id: Some(number.clone()),
                message: format!("issued {number}"),
                card: Some(IdCard {
                    number,
                    holder: requester.clone(),
                    resource: resource.clone(),
                    issued_at: Utc::now(),
                }),
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checklist_approves_complete_submission() {
        let verifier = DocumentChecklist::default();
        let input = VerificationInput::new(["Transcript", " id-proof "]);

        let outcome = verifier.verify(&"s1".into(), &input).await.unwrap();
        assert!(outcome.approved);
    }

    #[tokio::test]
    async fn checklist_lists_missing_documents() {
        let verifier = DocumentChecklist::new(["transcript", "id-proof", "photo"]);
        let input = VerificationInput::new(["transcript"]);

        let outcome = verifier.verify(&"s1".into(), &input).await.unwrap();
        assert!(!outcome.approved);
        assert_eq!(outcome.details, "missing documents: id-proof, photo");
    }

    #[tokio::test]
    async fn gateway_charges_supported_method() {
        let gateway = SimulatedGateway::default();

        let first = gateway
            .charge(&"s1".into(), Fee::from_major(150), "card")
            .await
            .unwrap();
        let second = gateway
            .charge(&"s2".into(), Fee::from_major(150), "CARD")
            .await
            .unwrap();

        assert!(first.success);
        assert_eq!(first.transaction_id.as_deref(), Some("TXN-1"));
        assert_eq!(second.transaction_id.as_deref(), Some("TXN-2"));
    }

    #[tokio::test]
    async fn gateway_declines() {
        let gateway = SimulatedGateway::new(["card"], Fee::from_major(100));
        let s1 = RequesterId::from("s1");

        let bad_method = gateway.charge(&s1, Fee::from_major(10), "cash").await.unwrap();
        let zero = gateway.charge(&s1, Fee::default(), "card").await.unwrap();
        let too_much = gateway.charge(&s1, Fee::from_major(101), "card").await.unwrap();

        for charge in [&bad_method, &zero, &too_much] {
            assert!(!charge.success);
            assert!(charge.transaction_id.is_none());
        }
        assert_eq!(bad_method.message, "unsupported payment method 'cash'");
        assert_eq!(too_much.message, "fee 101.00 exceeds limit 100.00");
    }

    #[tokio::test]
    async fn issuer_numbers_per_resource() {
        let issuer = SequentialIssuer::new();
        let s1 = RequesterId::from("s1");

        let a1 = issuer.issue(&s1, &"course-a".into()).await.unwrap();
        let a2 = issuer.issue(&"s2".into(), &"course-a".into()).await.unwrap();
        let b1 = issuer.issue(&s1, &"course-b".into()).await.unwrap();

        assert_eq!(a1.issued_id.as_deref(), Some("COURSE-A-0001"));
        assert_eq!(a2.issued_id.as_deref(), Some("COURSE-A-0002"));
        assert_eq!(b1.issued_id.as_deref(), Some("COURSE-B-0001"));
        assert_eq!(a1.card.unwrap().holder, s1);
    }

    #[tokio::test]
    async fn issuer_fails_when_number_range_is_exhausted() {
        let issuer = SequentialIssuer::new();
        issuer
            .issued
            .lock()
            .unwrap()
            .insert("course-a".into(), MAX_ID_NUMBER - 1);
        let s1 = RequesterId::from("s1");

        let last = issuer.issue(&s1, &"course-a".into()).await.unwrap();
        assert_eq!(last.issued_id.as_deref(), Some("COURSE-A-9999"));

        let err = issuer.issue(&s1, &"course-a".into()).await.unwrap_err();
        assert_eq!(
            err,
            CollaboratorError::Failed {
                service: "identity issuer",
                reason: "id numbers for course-a exhausted".to_string(),
            }
        );
        // other resources keep their own range
        assert!(issuer.issue(&s1, &"course-b".into()).await.unwrap().success);
    }
}
