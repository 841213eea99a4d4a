//! In-memory store implementations.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::traits::{ResourceLock, ResourceRepository, StatusRepository};
use crate::error::Result;
use crate::resource::{Resource, ResourceName};
use crate::status::ResourceStatus;

/// Resource repository backed by an ordered map.
pub struct MemoryResourceRepository<S> {
    resources: RwLock<BTreeMap<ResourceName, Resource<S>>>,
}

impl<S> MemoryResourceRepository<S> {
    pub fn new() -> Self {
        Self {
            resources: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<S> Default for MemoryResourceRepository<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S> ResourceRepository<S> for MemoryResourceRepository<S>
where
    S: Clone + Send + Sync,
{
    async fn get(&self, name: &ResourceName) -> Result<Option<Resource<S>>> {
        Ok(self.resources.read().await.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<ResourceName>> {
        Ok(self.resources.read().await.keys().cloned().collect())
    }

    async fn upsert(&self, resource: Resource<S>) -> Result<()> {
        let mut resources = self.resources.write().await;
        resources.insert(resource.metadata.name.clone(), resource);
        Ok(())
    }

    async fn remove(&self, name: &ResourceName) -> Result<Option<Resource<S>>> {
        Ok(self.resources.write().await.remove(name))
    }
}

/// Status repository backed by a hash map.
#[derive(Default)]
pub struct MemoryStatusRepository {
    statuses: RwLock<HashMap<ResourceName, ResourceStatus>>,
}

impl MemoryStatusRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusRepository for MemoryStatusRepository {
    async fn get(&self, name: &ResourceName) -> Result<Option<ResourceStatus>> {
        Ok(self.statuses.read().await.get(name).cloned())
    }

    async fn put(&self, name: &ResourceName, status: ResourceStatus) -> Result<()> {
        debug!(resource = %name, phase = ?status.phase, "Status updated");
        self.statuses.write().await.insert(name.clone(), status);
        Ok(())
    }

    async fn in_flight(&self) -> Result<Vec<(ResourceName, ResourceStatus)>> {
        let statuses = self.statuses.read().await;
        let mut pending: Vec<_> = statuses
            .iter()
            .filter(|(_, s)| s.in_flight.is_some())
            .map(|(n, s)| (n.clone(), s.clone()))
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pending)
    }
}

/// Lock table; the mutex makes check-and-insert a single atomic step.
#[derive(Default)]
pub struct MemoryResourceLock {
    holders: Mutex<HashMap<ResourceName, String>>,
}

impl MemoryResourceLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceLock for MemoryResourceLock {
    async fn try_acquire(&self, name: &ResourceName, owner: &str) -> Result<bool> {
        let mut holders = self.holders.lock().await;
        if holders.contains_key(name) {
            return Ok(false);
        }
        holders.insert(name.clone(), owner.to_string());
        Ok(true)
    }

    async fn release(&self, name: &ResourceName, owner: &str) -> Result<()> {
        let mut holders = self.holders.lock().await;
        if holders.get(name).map(String::as_str) == Some(owner) {
            holders.remove(name);
        }
        Ok(())
    }
}
