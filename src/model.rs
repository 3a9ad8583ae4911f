//! Core domain types shared by the ledger, allocator and orchestrator.

use std::fmt;

use chrono::{DateTime, Utc};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a capacity-limited resource (e.g. a course).
    ResourceId
);

string_id!(
    /// Identifier of a requester (e.g. a student).
    RequesterId
);

/// Hold identifier, unique for the lifetime of a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HoldId(u64);

impl HoldId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HoldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H-{}", self.0)
    }
}

/// Lifecycle state of a hold.
///
/// `Tentative` moves to exactly one of the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoldState {
    #[default]
    Tentative,
    Confirmed,
    Cancelled,
}

impl fmt::Display for HoldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HoldState::Tentative => "tentative",
            HoldState::Confirmed => "confirmed",
            HoldState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A claim on one unit of a resource's capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hold {
    pub id: HoldId,
    pub requester: RequesterId,
    pub resource: ResourceId,
    pub state: HoldState,
    /// Set once when a confirmed hold gives its seat back.
    /// Distinguishes "consumed then released" from "never consumed".
    pub withdrawn: bool,
    pub created_at: DateTime<Utc>,
    /// Advisory; only the expiry sweep acts on it.
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    /// Whether this hold currently occupies capacity.
    pub fn is_active(&self) -> bool {
        match self.state {
            HoldState::Tentative => true,
            HoldState::Confirmed => !self.withdrawn,
            HoldState::Cancelled => false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == HoldState::Tentative && self.expires_at <= now
    }
}

/// Read-only snapshot of a resource's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utilization {
    pub capacity: u32,
    pub confirmed: u32,
    pub tentative: u32,
}

impl Utilization {
    pub fn available(&self) -> u32 {
        self.capacity - self.confirmed - self.tentative
    }
}

/// Names of the records an enrollment attempt can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepName {
    AllocateResource,
    VerifyRequester,
    ProcessPayment,
    IssueIdentity,
    ConfirmAllocation,
    Compensation,
    SystemError,
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepName::AllocateResource => "AllocateResource",
            StepName::VerifyRequester => "VerifyRequester",
            StepName::ProcessPayment => "ProcessPayment",
            StepName::IssueIdentity => "IssueIdentity",
            StepName::ConfirmAllocation => "ConfirmAllocation",
            StepName::Compensation => "Compensation",
            StepName::SystemError => "SystemError",
        };
        f.write_str(name)
    }
}

/// One audit entry of an enrollment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: StepName,
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
