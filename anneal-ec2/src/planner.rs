//! Operation planning: turns a diff into orchestration jobs.

use serde::Serialize;
use serde_json::{json, Value};

use anneal_core::{Divergence, Job};

use crate::diff::SecurityGroupDiff;
use crate::model::{Protocol, SecurityGroup, SecurityGroupRule, CLOUD_PROVIDER};

pub const UPSERT_JOB: &str = "upsertSecurityGroup";
pub const DELETE_JOB: &str = "deleteSecurityGroup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum Operation {
    Create(UpsertSecurityGroup),
    Update(UpsertSecurityGroup),
    Delete(DeleteSecurityGroup),
}

impl Operation {
    pub fn describe(&self) -> String {
        match self {
            Operation::Create(op) => format!(
                "Create security group {} in {}/{}",
                op.name, op.account_name, op.region
            ),
            Operation::Update(op) => format!(
                "Update security group {} in {}/{}",
                op.name, op.account_name, op.region
            ),
            Operation::Delete(op) => format!(
                "Delete security group {} in {}/{}",
                op.name, op.account_name, op.region
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSecurityGroup {
    pub application: String,
    pub name: String,
    pub account_name: String,
    pub region: String,
    pub vpc_id: Option<String>,
    pub description: Option<String>,
    pub security_group_ingress: Vec<ReferenceIngress>,
    pub ip_ingress: Vec<IpIngress>,
}

/// Ingress from a named group (including the group itself).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceIngress {
    pub name: String,
    pub protocol: Protocol,
    pub start_port: u16,
    pub end_port: u16,
    pub account_name: String,
    pub cross_account_enabled: bool,
    pub vpc_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpIngress {
    pub cidr: String,
    pub protocol: Protocol,
    pub start_port: u16,
    pub end_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSecurityGroup {
    pub application: String,
    pub name: String,
    pub account_name: String,
    pub region: String,
    pub vpc_id: Option<String>,
}

/// Plan the operations converging the current group towards the desired one.
///
/// A missing group is created without its self-reference rules, since the
/// group cannot reference itself before it exists. An existing group is
/// updated with its full desired rule set.
pub fn plan(diff: &SecurityGroupDiff) -> Vec<Operation> {
    if diff.resource_missing {
        vec![Operation::Create(upsert(diff, false))]
    } else if diff.is_empty() {
        vec![]
    } else {
        vec![Operation::Update(upsert(diff, true))]
    }
}

/// Plan the removal of a group. Independent of any diff.
pub fn plan_delete(spec: &SecurityGroup, vpc_id: Option<String>) -> Operation {
    Operation::Delete(DeleteSecurityGroup {
        application: spec.application.clone(),
        name: spec.name.clone(),
        account_name: spec.account_name.clone(),
        region: spec.region.clone(),
        vpc_id,
    })
}

fn upsert(diff: &SecurityGroupDiff, include_self_references: bool) -> UpsertSecurityGroup {
    let desired = &diff.desired;
    let spec = &desired.spec;
    let mut security_group_ingress = Vec::new();
    let mut ip_ingress = Vec::new();

    for rule in &spec.inbound_rules {
        if desired.implicit.as_ref() == Some(rule) {
            continue;
        }
        let ports = rule.port_range();
        match rule {
            SecurityGroupRule::Cidr {
                protocol,
                block_range,
                ..
            } => ip_ingress.push(IpIngress {
                cidr: block_range.clone(),
                protocol: *protocol,
                start_port: ports.start_port,
                end_port: ports.end_port,
            }),
            SecurityGroupRule::CrossAccountReference {
                protocol,
                account,
                name,
                vpc_name,
                ..
            } => security_group_ingress.push(ReferenceIngress {
                name: name.clone(),
                protocol: *protocol,
                start_port: ports.start_port,
                end_port: ports.end_port,
                account_name: account.clone(),
                cross_account_enabled: *account != spec.account_name,
                vpc_id: desired.reference_vpc_id(account, vpc_name).map(str::to_string),
            }),
            SecurityGroupRule::SelfReference { protocol, .. } => {
                if include_self_references {
                    security_group_ingress.push(ReferenceIngress {
                        name: spec.name.clone(),
                        protocol: *protocol,
                        start_port: ports.start_port,
                        end_port: ports.end_port,
                        account_name: spec.account_name.clone(),
                        cross_account_enabled: false,
                        vpc_id: desired.vpc_id.clone(),
                    });
                }
            }
        }
    }

    UpsertSecurityGroup {
        application: spec.application.clone(),
        name: spec.name.clone(),
        account_name: spec.account_name.clone(),
        region: spec.region.clone(),
        vpc_id: desired.vpc_id.clone(),
        description: spec.description.clone(),
        security_group_ingress,
        ip_ingress,
    }
}

impl From<Operation> for Job {
    fn from(operation: Operation) -> Job {
        match operation {
            Operation::Create(op) | Operation::Update(op) => op.into(),
            Operation::Delete(op) => op.into(),
        }
    }
}

impl From<UpsertSecurityGroup> for Job {
    fn from(op: UpsertSecurityGroup) -> Job {
        let security_group_ingress: Vec<Value> = op
            .security_group_ingress
            .iter()
            .map(|i| {
                json!({
                    "name": i.name,
                    "type": i.protocol.as_str(),
                    "startPort": i.start_port,
                    "endPort": i.end_port,
                    "accountName": i.account_name,
                    "crossAccountEnabled": i.cross_account_enabled,
                    "vpcId": i.vpc_id,
                })
            })
            .collect();
        let ip_ingress: Vec<Value> = op
            .ip_ingress
            .iter()
            .map(|i| {
                json!({
                    "cidr": i.cidr,
                    "type": i.protocol.name(),
                    "startPort": i.start_port,
                    "endPort": i.end_port,
                })
            })
            .collect();

        Job::new(UPSERT_JOB)
            .with("application", op.application)
            .with("credentials", op.account_name.clone())
            .with("cloudProvider", CLOUD_PROVIDER)
            .with("name", op.name)
            .with("regions", vec![op.region])
            .with("vpcId", op.vpc_id)
            .with("description", op.description)
            .with("securityGroupIngress", security_group_ingress)
            .with("ipIngress", ip_ingress)
            .with("accountName", op.account_name)
    }
}

impl From<DeleteSecurityGroup> for Job {
    fn from(op: DeleteSecurityGroup) -> Job {
        Job::new(DELETE_JOB)
            .with("application", op.application)
            .with("credentials", op.account_name.clone())
            .with("cloudProvider", CLOUD_PROVIDER)
            .with("securityGroupName", op.name)
            .with("regions", vec![op.region])
            .with("vpcId", op.vpc_id)
            .with("accountName", op.account_name)
    }
}
