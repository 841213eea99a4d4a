//! Security group handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use anneal_core::{Job, OrchestrationRequest, ResourceHandler, Result};

use crate::clients::CloudDriver;
use crate::diff::{self, SecurityGroupDiff};
use crate::model::{SecurityGroup, SECURITY_GROUP_KIND};
use crate::network::NetworkLookup;
use crate::normalizer::{NormalizedSpec, Normalizer, NormalizerConfig};
use crate::planner::{self, Operation};

pub struct SecurityGroupHandler {
    driver: Arc<dyn CloudDriver>,
    normalizer: Normalizer,
}

impl SecurityGroupHandler {
    pub fn new(
        driver: Arc<dyn CloudDriver>,
        networks: Arc<dyn NetworkLookup>,
        config: NormalizerConfig,
    ) -> Self {
        Self {
            driver,
            normalizer: Normalizer::new(networks, config),
        }
    }
}

#[async_trait]
impl ResourceHandler for SecurityGroupHandler {
    type Spec = SecurityGroup;
    type Desired = NormalizedSpec;
    type Current = SecurityGroup;
    type Diff = SecurityGroupDiff;
    type Operation = Operation;

    fn kind(&self) -> &'static str {
        SECURITY_GROUP_KIND
    }

    fn normalize(&self, spec: &SecurityGroup) -> Result<NormalizedSpec> {
        self.normalizer.normalize_spec(spec)
    }

    async fn current(&self, desired: &NormalizedSpec) -> Result<Option<SecurityGroup>> {
        let spec = &desired.spec;
        let observed = self
            .driver
            .get_security_group(
                &spec.account_name,
                &spec.name,
                &spec.region,
                desired.vpc_id.as_deref(),
            )
            .await?;

        match observed {
            Some(observed) => Ok(Some(self.normalizer.normalize_observed(&observed)?)),
            None => {
                debug!(group = %spec.name, account = %spec.account_name, "Security group does not exist");
                Ok(None)
            }
        }
    }

    fn diff(&self, desired: &NormalizedSpec, current: Option<&SecurityGroup>) -> SecurityGroupDiff {
        diff::diff(desired, current)
    }

    fn plan(&self, diff: &SecurityGroupDiff) -> Vec<Operation> {
        planner::plan(diff)
    }

    fn plan_delete(&self, spec: &SecurityGroup) -> Operation {
        let vpc_id = match self.normalizer.vpc_id(spec) {
            Ok(vpc_id) => vpc_id,
            Err(e) => {
                warn!(group = %spec.name, error = %e, "Deleting without a network id");
                None
            }
        };
        planner::plan_delete(spec, vpc_id)
    }

    fn request(&self, spec: &SecurityGroup, operations: Vec<Operation>) -> OrchestrationRequest {
        let description = operations
            .iter()
            .map(Operation::describe)
            .collect::<Vec<_>>()
            .join(", ");
        OrchestrationRequest {
            application: spec.application.clone(),
            description,
            job: operations.into_iter().map(Job::from).collect(),
        }
    }
}
