//! Network (VPC) name/id resolution.

use std::sync::RwLock;

use tracing::info;

use anneal_core::Result;

use crate::clients::{CloudDriver, Network};

/// Synchronous network lookups used during normalization.
pub trait NetworkLookup: Send + Sync {
    fn network_by_name(&self, name: &str, account: &str, region: &str) -> Option<Network>;

    fn network_by_id(&self, id: &str) -> Option<Network>;
}

/// Networks fetched from the cloud driver, refreshed periodically.
#[derive(Debug, Default)]
pub struct NetworkCache {
    networks: RwLock<Vec<Network>>,
}

impl NetworkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_networks(networks: Vec<Network>) -> Self {
        Self {
            networks: RwLock::new(networks),
        }
    }

    /// Replace the cached networks with the driver's current list.
    pub async fn refresh(&self, driver: &dyn CloudDriver) -> Result<usize> {
        let networks = driver.list_networks().await?;
        let count = networks.len();
        *self.networks.write().unwrap_or_else(|e| e.into_inner()) = networks;
        info!(networks = count, "Refreshed network cache");
        Ok(count)
    }

    fn find(&self, predicate: impl Fn(&Network) -> bool) -> Option<Network> {
        self.networks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|n| predicate(n))
            .cloned()
    }
}

impl NetworkLookup for NetworkCache {
    fn network_by_name(&self, name: &str, account: &str, region: &str) -> Option<Network> {
        self.find(|n| n.name == name && n.account == account && n.region == region)
    }

    fn network_by_id(&self, id: &str) -> Option<Network> {
        self.find(|n| n.id == id)
    }
}
