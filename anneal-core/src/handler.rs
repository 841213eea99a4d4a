//! Resource handlers - the per-kind half of convergence.
//!
//! A handler knows how to normalize a declared spec, fetch and normalize the
//! provider's view of it, diff the two and plan operations. The controller
//! owns sequencing, locking, submission and status.

use async_trait::async_trait;

use crate::error::Result;
use crate::orchestration::{Job, OrchestrationRequest};

/// Result of comparing desired and current state.
pub trait Divergence {
    /// `true` when nothing needs to change.
    fn is_empty(&self) -> bool;
}

/// Trait for resource kind handlers.
#[async_trait]
pub trait ResourceHandler: Send + Sync + 'static {
    /// The declared spec type.
    type Spec: Clone + Send + Sync + 'static;
    /// The spec after normalization and reference resolution.
    type Desired: Send + Sync;
    /// The normalized provider state.
    type Current: Send + Sync;
    /// Structural diff between desired and current.
    type Diff: Divergence + Send + Sync;
    /// One planned provider operation.
    type Operation: Into<Job> + Send + Sync;

    /// Resource kind served by this handler, e.g. `ec2.SecurityGroup`.
    fn kind(&self) -> &'static str;

    /// Normalize the declared spec. No I/O.
    fn normalize(&self, spec: &Self::Spec) -> Result<Self::Desired>;

    /// Fetch and normalize the current state; `Ok(None)` if it does not exist.
    async fn current(&self, desired: &Self::Desired) -> Result<Option<Self::Current>>;

    fn diff(&self, desired: &Self::Desired, current: Option<&Self::Current>) -> Self::Diff;

    /// Operations converging current towards desired; empty if in sync.
    fn plan(&self, diff: &Self::Diff) -> Vec<Self::Operation>;

    /// The operation decommissioning the resource.
    fn plan_delete(&self, spec: &Self::Spec) -> Self::Operation;

    /// Wrap planned operations into a backend request.
    fn request(&self, spec: &Self::Spec, operations: Vec<Self::Operation>) -> OrchestrationRequest;
}
