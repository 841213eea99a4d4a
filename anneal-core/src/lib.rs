//! anneal-core: provider-independent desired-state convergence.
//!
//! - [`handler::ResourceHandler`]: per-kind normalize / fetch / diff / plan
//! - [`controller::ConvergenceController`]: per-resource state machine with
//!   at most one attempt in flight per identity
//! - [`tracker::ExecutionTracker`]: submission with backoff and awaiting of
//!   orchestration tasks
//! - [`queue::ResourceCheckQueue`]: inbound check scheduling

pub mod clients;
pub mod controller;
pub mod error;
pub mod handler;
pub mod orchestration;
pub mod queue;
pub mod resource;
pub mod retry;
pub mod status;
pub mod store;
pub mod tracker;

pub use controller::{CheckOutcome, ConvergenceController, SkipReason};
pub use error::{Error, Result};
pub use handler::{Divergence, ResourceHandler};
pub use orchestration::{Job, OrchestrationBackend, OrchestrationRequest, TaskRef, TaskStatus};
pub use queue::{CheckWorker, ResourceCheckQueue};
pub use resource::{Resource, ResourceMetadata, ResourceName, API_VERSION_V1};
pub use status::{Phase, ResourceStatus};
pub use tracker::{ExecutionTracker, FailureReason, TerminalStatus, TrackerConfig};
