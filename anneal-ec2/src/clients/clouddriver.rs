//! Cloud driver client: read-only view of provider state.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use anneal_core::clients::check_response;
use anneal_core::Result;

use crate::model::CLOUD_PROVIDER;

/// A security group as the cloud driver reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedSecurityGroup {
    #[serde(rename = "type", default = "default_provider")]
    pub cloud_provider: String,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub account_name: String,
    pub region: String,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub moniker: Option<Moniker>,
    #[serde(default)]
    pub inbound_rules: Vec<ObservedRule>,
}

fn default_provider() -> String {
    CLOUD_PROVIDER.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Moniker {
    pub app: String,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// One observed ingress rule. A rule either references a group or carries
/// an IP range, and may cover several port ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedRule {
    pub protocol: String,
    #[serde(default)]
    pub port_ranges: Vec<ObservedPortRange>,
    #[serde(default)]
    pub security_group: Option<ObservedReference>,
    #[serde(default)]
    pub range: Option<ObservedCidr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedPortRange {
    pub start_port: u16,
    pub end_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedReference {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub account_name: String,
    pub region: String,
    #[serde(default)]
    pub vpc_id: Option<String>,
}

/// IP range split into address and mask, e.g. `10.0.0.0` and `/16`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedCidr {
    pub ip: String,
    pub cidr: String,
}

/// A network (VPC) known to the cloud driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    #[serde(default = "default_provider")]
    pub cloud_provider: String,
    pub id: String,
    pub name: String,
    pub account: String,
    pub region: String,
}

/// Read-only access to provider state.
#[async_trait]
pub trait CloudDriver: Send + Sync {
    /// Look up a security group; `Ok(None)` if it does not exist.
    async fn get_security_group(
        &self,
        account: &str,
        name: &str,
        region: &str,
        vpc_id: Option<&str>,
    ) -> Result<Option<ObservedSecurityGroup>>;

    async fn list_networks(&self) -> Result<Vec<Network>>;
}

/// Cloud driver over its REST API.
#[derive(Clone, Debug)]
pub struct HttpCloudDriver {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCloudDriver {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self { client, endpoint }
    }

    fn security_group_url(&self, account: &str, name: &str, region: &str) -> String {
        format!(
            "{}/securityGroups/{}/{}/{}/{}",
            self.endpoint, account, CLOUD_PROVIDER, region, name
        )
    }
}

#[async_trait]
impl CloudDriver for HttpCloudDriver {
    async fn get_security_group(
        &self,
        account: &str,
        name: &str,
        region: &str,
        vpc_id: Option<&str>,
    ) -> Result<Option<ObservedSecurityGroup>> {
        let mut request = self
            .client
            .get(self.security_group_url(account, name, region));
        if let Some(vpc_id) = vpc_id {
            request = request.query(&[("vpcId", vpc_id)]);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(account, name, region, "Security group not found");
            return Ok(None);
        }
        let group = check_response(response).await?.json().await?;
        Ok(Some(group))
    }

    async fn list_networks(&self) -> Result<Vec<Network>> {
        let response = self
            .client
            .get(format!("{}/networks/{}", self.endpoint, CLOUD_PROVIDER))
            .send()
            .await?;
        Ok(check_response(response).await?.json().await?)
    }
}
