//! Clients for external services.

pub mod clouddriver;

pub use clouddriver::{
    CloudDriver, HttpCloudDriver, Moniker, Network, ObservedCidr, ObservedPortRange,
    ObservedReference, ObservedRule, ObservedSecurityGroup,
};
