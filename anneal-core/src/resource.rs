//! Managed resource envelope and identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default API version of managed resources.
pub const API_VERSION_V1: &str = "anneal.io/v1";

/// Unique identity of a managed resource, e.g.
/// `ec2.SecurityGroup:storefront:prod:us-west-3:fnord`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind prefix of the name (`ec2.SecurityGroup` for the example above).
    pub fn kind(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    pub name: ResourceName,
    pub uid: Uuid,
    #[serde(default)]
    pub resource_version: u64,
}

/// A declared resource: desired spec plus identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource<S> {
    pub api_version: String,
    pub kind: String,
    pub metadata: ResourceMetadata,
    pub spec: S,
}

impl<S> Resource<S> {
    pub fn new(kind: impl Into<String>, name: ResourceName, spec: S) -> Self {
        Self {
            api_version: API_VERSION_V1.to_string(),
            kind: kind.into(),
            metadata: ResourceMetadata {
                name,
                uid: Uuid::new_v4(),
                resource_version: 1,
            },
            spec,
        }
    }

    pub fn name(&self) -> &ResourceName {
        &self.metadata.name
    }
}
