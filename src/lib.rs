pub mod allocator;
pub mod batch;
pub mod collaborators;
pub mod config;
pub mod csv;
pub mod fee;
pub mod ledger;
pub mod model;
pub mod saga;

pub use allocator::{AllocationError, Allocator};
pub use config::Config;
pub use fee::Fee;
pub use ledger::{Ledger, LedgerError, spawn_sweeper};
pub use model::{
    Hold, HoldId, HoldState, RequesterId, ResourceId, StepName, StepRecord, Utilization,
};
pub use saga::{EnrollmentError, EnrollmentResult, Orchestrator};
