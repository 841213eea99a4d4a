//! Structural diff between a normalized desired group and its current state.

use std::collections::BTreeSet;

use serde::Serialize;

use anneal_core::Divergence;

use crate::model::{SecurityGroup, SecurityGroupRule};
use crate::normalizer::NormalizedSpec;

/// How one rule differs between desired and current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleChange {
    Unchanged,
    Added,
    Removed,
}

/// A top-level attribute whose value drifted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeChange {
    pub attribute: String,
    pub desired: Option<String>,
    pub current: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupDiff {
    pub desired: NormalizedSpec,
    pub resource_missing: bool,
    pub added: BTreeSet<SecurityGroupRule>,
    pub removed: BTreeSet<SecurityGroupRule>,
    pub unchanged: BTreeSet<SecurityGroupRule>,
    pub modified: Vec<AttributeChange>,
}

impl SecurityGroupDiff {
    /// Every rule on either side with its change, in rule order.
    pub fn rules(&self) -> Vec<(&SecurityGroupRule, RuleChange)> {
        let mut rules: Vec<_> = self
            .unchanged
            .iter()
            .map(|r| (r, RuleChange::Unchanged))
            .chain(self.added.iter().map(|r| (r, RuleChange::Added)))
            .chain(self.removed.iter().map(|r| (r, RuleChange::Removed)))
            .collect();
        rules.sort();
        rules
    }
}

impl Divergence for SecurityGroupDiff {
    fn is_empty(&self) -> bool {
        !self.resource_missing
            && self.added.is_empty()
            && self.removed.is_empty()
            && self.modified.is_empty()
    }
}

pub fn diff(desired: &NormalizedSpec, current: Option<&SecurityGroup>) -> SecurityGroupDiff {
    let wanted = &desired.spec.inbound_rules;

    let Some(current) = current else {
        return SecurityGroupDiff {
            desired: desired.clone(),
            resource_missing: true,
            added: wanted.clone(),
            removed: BTreeSet::new(),
            unchanged: BTreeSet::new(),
            modified: Vec::new(),
        };
    };

    let have = &current.inbound_rules;
    let mut modified = Vec::new();

    // An unset description is left alone.
    if let Some(description) = &desired.spec.description {
        if current.description.as_ref() != Some(description) {
            modified.push(AttributeChange {
                attribute: "description".to_string(),
                desired: Some(description.clone()),
                current: current.description.clone(),
            });
        }
    }

    SecurityGroupDiff {
        desired: desired.clone(),
        resource_missing: false,
        added: wanted.difference(have).cloned().collect(),
        removed: have.difference(wanted).cloned().collect(),
        unchanged: wanted.intersection(have).cloned().collect(),
        modified,
    }
}
