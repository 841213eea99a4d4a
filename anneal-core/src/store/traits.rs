//! Store trait definitions.
//!
//! The controller only depends on these traits; the in-memory
//! implementations in [`super::memory`] back a single controller instance.

use async_trait::async_trait;

use crate::error::Result;
use crate::resource::{Resource, ResourceName};
use crate::status::ResourceStatus;

/// Declared resources, keyed by name.
#[async_trait]
pub trait ResourceRepository<S>: Send + Sync
where
    S: Send + Sync,
{
    /// Get a resource by name.
    async fn get(&self, name: &ResourceName) -> Result<Option<Resource<S>>>;

    /// List the names of all managed resources.
    async fn list(&self) -> Result<Vec<ResourceName>>;

    /// Insert or replace a resource.
    async fn upsert(&self, resource: Resource<S>) -> Result<()>;

    /// Remove a resource, returning it if it existed.
    async fn remove(&self, name: &ResourceName) -> Result<Option<Resource<S>>>;
}

/// Last known status per resource.
#[async_trait]
pub trait StatusRepository: Send + Sync {
    async fn get(&self, name: &ResourceName) -> Result<Option<ResourceStatus>>;

    async fn put(&self, name: &ResourceName, status: ResourceStatus) -> Result<()>;

    /// All resources with a persisted in-flight task.
    async fn in_flight(&self) -> Result<Vec<(ResourceName, ResourceStatus)>>;
}

/// Per-identity mutual exclusion across concurrent checks.
#[async_trait]
pub trait ResourceLock: Send + Sync {
    /// Atomically take the lock for `name` if nobody holds it.
    /// Returns `false` if it is already held.
    async fn try_acquire(&self, name: &ResourceName, owner: &str) -> Result<bool>;

    /// Release the lock if held by `owner`.
    async fn release(&self, name: &ResourceName, owner: &str) -> Result<()>;
}
