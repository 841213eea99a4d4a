//! State normalization.
//!
//! Desired and observed security groups are brought into the same canonical
//! [`SecurityGroup`] form before diffing:
//!
//! - network names and ids are resolved through a [`NetworkLookup`]
//! - CIDR blocks are truncated to their network address
//! - observed rules carrying several port ranges become one rule per range
//! - references to the group itself become [`SecurityGroupRule::SelfReference`]
//!
//! Nothing here performs I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use serde::Serialize;
use tracing::debug;

use anneal_core::{Error, Result};

use crate::clients::{ObservedReference, ObservedRule, ObservedSecurityGroup};
use crate::model::{PortRange, Protocol, SecurityGroup, SecurityGroupRule, SelfReferenceGrant};
use crate::network::NetworkLookup;

#[derive(Debug, Clone, Default)]
pub struct NormalizerConfig {
    /// Self-reference grant the provider applies to every group without
    /// listing it. Added to both sides so it never shows up as drift.
    pub implicit_self_reference: Option<SelfReferenceGrant>,
}

/// A desired security group with its references resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSpec {
    pub spec: SecurityGroup,
    /// Id of the group's own network.
    pub vpc_id: Option<String>,
    /// Network ids of referenced groups, keyed by `account:vpcName`.
    pub reference_vpc_ids: BTreeMap<String, String>,
    /// Rule the provider grants on its own; part of `spec` but never
    /// submitted.
    pub implicit: Option<SecurityGroupRule>,
}

impl NormalizedSpec {
    pub fn reference_vpc_id(&self, account: &str, vpc_name: &str) -> Option<&str> {
        self.reference_vpc_ids
            .get(&reference_key(account, vpc_name))
            .map(String::as_str)
    }
}

fn reference_key(account: &str, vpc_name: &str) -> String {
    format!("{}:{}", account, vpc_name)
}

#[derive(Clone)]
pub struct Normalizer {
    networks: Arc<dyn NetworkLookup>,
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(networks: Arc<dyn NetworkLookup>, config: NormalizerConfig) -> Self {
        Self { networks, config }
    }

    /// Id of the group's own network, if it names one.
    pub fn vpc_id(&self, spec: &SecurityGroup) -> Result<Option<String>> {
        match &spec.vpc_name {
            Some(vpc_name) => Ok(Some(self.resolve_network(vpc_name, &spec.account_name, &spec.region)?)),
            None => Ok(None),
        }
    }

    pub fn normalize_spec(&self, spec: &SecurityGroup) -> Result<NormalizedSpec> {
        let vpc_id = self.vpc_id(spec)?;

        let mut rules = BTreeSet::new();
        let mut reference_vpc_ids = BTreeMap::new();

        for rule in &spec.inbound_rules {
            check_port_range(rule.port_range())?;
            let rule = match rule {
                SecurityGroupRule::Cidr {
                    protocol,
                    block_range,
                    port_range,
                } => SecurityGroupRule::Cidr {
                    protocol: *protocol,
                    block_range: canonical_cidr(block_range)?,
                    port_range: *port_range,
                },
                SecurityGroupRule::CrossAccountReference {
                    protocol,
                    account,
                    name,
                    vpc_name,
                    port_range,
                } => {
                    if *account == spec.account_name
                        && *name == spec.name
                        && spec.vpc_name.as_deref() == Some(vpc_name.as_str())
                    {
                        SecurityGroupRule::SelfReference {
                            protocol: *protocol,
                            port_range: *port_range,
                        }
                    } else {
                        let id = self.resolve_network(vpc_name, account, &spec.region)?;
                        reference_vpc_ids.insert(reference_key(account, vpc_name), id);
                        rule.clone()
                    }
                }
                SecurityGroupRule::SelfReference { .. } => rule.clone(),
            };
            rules.insert(rule);
        }

        let implicit = self.config.implicit_self_reference.as_ref().map(SelfReferenceGrant::rule);
        if let Some(rule) = &implicit {
            rules.insert(rule.clone());
        }

        Ok(NormalizedSpec {
            spec: SecurityGroup {
                inbound_rules: rules,
                ..spec.clone()
            },
            vpc_id,
            reference_vpc_ids,
            implicit,
        })
    }

    pub fn normalize_observed(&self, observed: &ObservedSecurityGroup) -> Result<SecurityGroup> {
        let vpc_name = match &observed.vpc_id {
            Some(id) => Some(self.network_name(id)?),
            None => None,
        };

        let mut rules = BTreeSet::new();
        for rule in &observed.inbound_rules {
            self.split_rule(observed, vpc_name.as_deref(), rule, &mut rules)?;
        }

        if let Some(grant) = &self.config.implicit_self_reference {
            rules.insert(grant.rule());
        }

        let application = match &observed.moniker {
            Some(moniker) => moniker.app.clone(),
            None => observed
                .name
                .split('-')
                .next()
                .unwrap_or(&observed.name)
                .to_string(),
        };

        debug!(
            group = %observed.name,
            id = %observed.id,
            rules = rules.len(),
            "Normalized observed security group"
        );

        Ok(SecurityGroup {
            application,
            name: observed.name.clone(),
            account_name: observed.account_name.clone(),
            region: observed.region.clone(),
            vpc_name,
            description: observed.description.clone(),
            inbound_rules: rules,
        })
    }

    /// One rule per observed port range.
    fn split_rule(
        &self,
        group: &ObservedSecurityGroup,
        vpc_name: Option<&str>,
        rule: &ObservedRule,
        rules: &mut BTreeSet<SecurityGroupRule>,
    ) -> Result<()> {
        let protocol = Protocol::parse(&rule.protocol)
            .ok_or_else(|| Error::InvalidSpec(format!("unknown protocol {:?}", rule.protocol)))?;

        let port_ranges: Vec<PortRange> = if rule.port_ranges.is_empty() {
            vec![PortRange::ALL]
        } else {
            rule.port_ranges
                .iter()
                .map(|r| PortRange::new(r.start_port, r.end_port))
                .collect()
        };

        let source = match (&rule.security_group, &rule.range) {
            (Some(reference), _) if is_self(group, reference) => Source::SelfReference,
            (Some(reference), _) => {
                let vpc_name = match &reference.vpc_id {
                    Some(id) => self.network_name(id)?,
                    None => vpc_name
                        .ok_or_else(|| Error::reference("network", format!("{}/{}", reference.account_name, reference.name)))?
                        .to_string(),
                };
                Source::Reference {
                    account: reference.account_name.clone(),
                    name: reference.name.clone(),
                    vpc_name,
                }
            }
            (None, Some(range)) => {
                let block = if range.cidr.is_empty() || range.cidr.starts_with('/') {
                    format!("{}{}", range.ip, range.cidr)
                } else {
                    format!("{}/{}", range.ip, range.cidr)
                };
                Source::Cidr(canonical_cidr(&block)?)
            }
            (None, None) => {
                return Err(Error::InvalidSpec(format!(
                    "rule on {} has neither a group reference nor an IP range",
                    group.name
                )))
            }
        };

        for port_range in port_ranges {
            check_port_range(port_range)?;
            let rule = match &source {
                Source::SelfReference => SecurityGroupRule::SelfReference {
                    protocol,
                    port_range,
                },
                Source::Reference {
                    account,
                    name,
                    vpc_name,
                } => SecurityGroupRule::CrossAccountReference {
                    protocol,
                    account: account.clone(),
                    name: name.clone(),
                    vpc_name: vpc_name.clone(),
                    port_range,
                },
                Source::Cidr(block_range) => SecurityGroupRule::Cidr {
                    protocol,
                    block_range: block_range.clone(),
                    port_range,
                },
            };
            rules.insert(rule);
        }
        Ok(())
    }

    fn resolve_network(&self, name: &str, account: &str, region: &str) -> Result<String> {
        self.networks
            .network_by_name(name, account, region)
            .map(|n| n.id)
            .ok_or_else(|| Error::reference("network", format!("{}/{}/{}", name, account, region)))
    }

    fn network_name(&self, id: &str) -> Result<String> {
        self.networks
            .network_by_id(id)
            .map(|n| n.name)
            .ok_or_else(|| Error::reference("network", id))
    }
}

enum Source {
    SelfReference,
    Reference {
        account: String,
        name: String,
        vpc_name: String,
    },
    Cidr(String),
}

fn is_self(group: &ObservedSecurityGroup, reference: &ObservedReference) -> bool {
    reference.name == group.name
        && reference.account_name == group.account_name
        && reference.region == group.region
        && reference.vpc_id == group.vpc_id
}

fn check_port_range(range: PortRange) -> Result<()> {
    if range.is_valid() {
        Ok(())
    } else {
        Err(Error::InvalidSpec(format!("invalid port range {}-{}", range.start_port, range.end_port)))
    }
}

/// `10.0.0.1/16` -> `10.0.0.0/16`. A bare address is a host route.
pub fn canonical_cidr(block: &str) -> Result<String> {
    let net = match block.parse::<IpNet>() {
        Ok(net) => net,
        Err(_) => block
            .parse::<IpAddr>()
            .map(IpNet::from)
            .map_err(|_| Error::InvalidSpec(format!("invalid CIDR block {:?}", block)))?,
    };
    Ok(net.trunc().to_string())
}
