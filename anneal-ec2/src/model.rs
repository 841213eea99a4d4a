//! Declared security group model.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anneal_core::ResourceName;
use serde::{Deserialize, Serialize};

/// Resource kind served by this plugin.
pub const SECURITY_GROUP_KIND: &str = "ec2.SecurityGroup";

/// Cloud provider name used by the cloud driver and in jobs.
pub const CLOUD_PROVIDER: &str = "aws";

/// Desired state of one security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroup {
    pub application: String,
    pub name: String,
    pub account_name: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub inbound_rules: BTreeSet<SecurityGroupRule>,
}

impl SecurityGroup {
    /// `ec2.SecurityGroup:<application>:<account>:<region>:<name>`
    pub fn resource_name(&self) -> ResourceName {
        ResourceName::new(format!(
            "{}:{}:{}:{}:{}",
            SECURITY_GROUP_KIND, self.application, self.account_name, self.region, self.name
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    All,
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    /// Lowercase name, as used by reference ingress entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::All => "all",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }

    /// Uppercase name, as used by CIDR ingress entries.
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::All => "ALL",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
        }
    }

    /// Parse a provider protocol string; `-1` means all protocols.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" | "-1" => Some(Protocol::All),
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            "icmp" => Some(Protocol::Icmp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRange {
    pub start_port: u16,
    pub end_port: u16,
}

impl PortRange {
    /// Every port.
    pub const ALL: PortRange = PortRange {
        start_port: 0,
        end_port: 65535,
    };

    pub fn new(start_port: u16, end_port: u16) -> Self {
        Self {
            start_port,
            end_port,
        }
    }

    pub fn single(port: u16) -> Self {
        Self::new(port, port)
    }

    pub fn is_valid(&self) -> bool {
        self.start_port <= self.end_port
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_port == self.end_port {
            write!(f, "{}", self.start_port)
        } else {
            write!(f, "{}-{}", self.start_port, self.end_port)
        }
    }
}

/// One ingress rule. Rules are compared by value and are atomic: two rules
/// differing in any field are different rules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SecurityGroupRule {
    /// Traffic from an IP block.
    #[serde(rename_all = "camelCase")]
    Cidr {
        protocol: Protocol,
        block_range: String,
        port_range: PortRange,
    },
    /// Traffic from a named group, possibly in another account.
    #[serde(rename_all = "camelCase")]
    CrossAccountReference {
        protocol: Protocol,
        account: String,
        name: String,
        vpc_name: String,
        port_range: PortRange,
    },
    /// Traffic from members of the group itself.
    #[serde(rename_all = "camelCase")]
    SelfReference {
        protocol: Protocol,
        port_range: PortRange,
    },
}

impl SecurityGroupRule {
    pub fn protocol(&self) -> Protocol {
        match self {
            SecurityGroupRule::Cidr { protocol, .. }
            | SecurityGroupRule::CrossAccountReference { protocol, .. }
            | SecurityGroupRule::SelfReference { protocol, .. } => *protocol,
        }
    }

    pub fn port_range(&self) -> PortRange {
        match self {
            SecurityGroupRule::Cidr { port_range, .. }
            | SecurityGroupRule::CrossAccountReference { port_range, .. }
            | SecurityGroupRule::SelfReference { port_range, .. } => *port_range,
        }
    }

    pub fn is_self_reference(&self) -> bool {
        matches!(self, SecurityGroupRule::SelfReference { .. })
    }
}

/// A self-referencing grant the provider applies without listing it,
/// written `protocol:start-end` (e.g. `tcp:0-65535`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfReferenceGrant {
    pub protocol: Protocol,
    pub port_range: PortRange,
}

impl SelfReferenceGrant {
    pub fn rule(&self) -> SecurityGroupRule {
        SecurityGroupRule::SelfReference {
            protocol: self.protocol,
            port_range: self.port_range,
        }
    }
}

impl FromStr for SelfReferenceGrant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, ports) = s
            .split_once(':')
            .ok_or_else(|| format!("expected protocol:start-end, got {:?}", s))?;
        let protocol =
            Protocol::parse(protocol).ok_or_else(|| format!("unknown protocol {:?}", protocol))?;
        let (start, end) = ports.split_once('-').unwrap_or((ports, ports));
        let port = |p: &str| {
            p.parse::<u16>()
                .map_err(|e| format!("invalid port {:?}: {}", p, e))
        };
        let port_range = PortRange::new(port(start)?, port(end)?);
        if !port_range.is_valid() {
            return Err(format!("invalid port range {}", ports));
        }
        Ok(Self {
            protocol,
            port_range,
        })
    }
}
