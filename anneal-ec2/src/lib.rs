//! anneal-ec2: converges EC2 security groups towards their declared spec.

pub mod clients;
pub mod diff;
pub mod handler;
pub mod model;
pub mod network;
pub mod normalizer;
pub mod planner;

pub use clients::{CloudDriver, HttpCloudDriver, Network, ObservedSecurityGroup};
pub use diff::{diff, SecurityGroupDiff};
pub use handler::SecurityGroupHandler;
pub use model::{
    PortRange, Protocol, SecurityGroup, SecurityGroupRule, SelfReferenceGrant, SECURITY_GROUP_KIND,
};
pub use network::{NetworkCache, NetworkLookup};
pub use normalizer::{NormalizedSpec, Normalizer, NormalizerConfig};
pub use planner::{plan, plan_delete, Operation};
