use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::configurator::{select_rule, RuleMatchPolicy};
use crate::errors::ServiceError;
use crate::models::{BomNode, BomTree, ManufacturingRule, NodeId, Product, ProductFeature};

/// Why a candidate was refused. The tree is left untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubstitutionRejection {
    RootNode,
    SameProduct,
    /// No effective rule allows the candidate for this component.
    NoMatchingRule,
    /// Rules exist but none is satisfied by the selected features.
    FeatureMismatch,
    IncompatibleQuantity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubstitutionOutcome {
    /// `node` now holds the position; `replaced` is kept detached.
    Applied { node: NodeId, replaced: NodeId },
    /// The candidate was the product the position originally held: that node
    /// is back in place and the substitute `removed` from the arena.
    Restored { node: NodeId, removed: NodeId },
    Rejected(SubstitutionRejection),
}

/// Checks `candidate` as a replacement for `original` and returns the rule
/// that allows it.
pub fn validate_substitute(
    original: &BomNode,
    candidate: &Product,
    features: &[ProductFeature],
    rules: &[ManufacturingRule],
    at: DateTime<Utc>,
    policy: RuleMatchPolicy,
) -> Result<ManufacturingRule, SubstitutionRejection> {
    if original.parent.is_none() {
        return Err(SubstitutionRejection::RootNode);
    }
    if candidate.product_id == original.product_id() {
        return Err(SubstitutionRejection::SameProduct);
    }

    let applicable: Vec<ManufacturingRule> = rules
        .iter()
        .filter(|rule| {
            rule.is_effective(at)
                && rule.product_id_in == original.product_id()
                && rule.product_id_in_subst.as_deref() == Some(candidate.product_id.as_str())
        })
        .cloned()
        .collect();
    if applicable.is_empty() {
        return Err(SubstitutionRejection::NoMatchingRule);
    }

    let selected = select_rule(&applicable, features, at, policy)
        .ok_or(SubstitutionRejection::FeatureMismatch)?;
    if selected.quantity.map_or(false, |q| q.is_sign_negative()) {
        return Err(SubstitutionRejection::IncompatibleQuantity);
    }
    Ok(selected.clone())
}

/// Replaces the component at `node_id` with `candidate` when a rule allows it.
///
/// The replacement keeps the original's association and scrap factor, so its
/// quantity is derived from the same parent-relative quantity and nothing
/// else in the tree changes. Children of the replacement are not loaded.
#[instrument(skip(tree, candidate, features, rules), fields(candidate = %candidate.product_id))]
pub fn substitute_node(
    tree: &mut BomTree,
    node_id: NodeId,
    candidate: Product,
    features: &[ProductFeature],
    rules: &[ManufacturingRule],
    policy: RuleMatchPolicy,
) -> Result<SubstitutionOutcome, ServiceError> {
    let original = tree.require(node_id)?.clone();

    let restorable = original
        .substituted_from
        .filter(|id| tree.node(*id).map_or(false, |n| n.product_id() == candidate.product_id));
    if let (Some(previous), Some(_)) = (restorable, original.parent) {
        tree.replace_child(node_id, previous)?;
        tree.remove_subtree(node_id);
        info!(product_id = %candidate.product_id, "Substitution reverted");
        return Ok(SubstitutionOutcome::Restored {
            node: previous,
            removed: node_id,
        });
    }

    let rule = match validate_substitute(&original, &candidate, features, rules, tree.in_date(), policy) {
        Ok(rule) => rule,
        Err(reason) => {
            warn!(product_id = %original.product_id(), %reason, "Substitute rejected");
            counter!("bom.substitutions.rejected", 1);
            return Ok(SubstitutionOutcome::Rejected(reason));
        }
    };

    let replacement = original.replacement(candidate, Some(rule));
    let node = tree.replace_with(node_id, replacement)?;
    counter!("bom.substitutions.applied", 1);
    Ok(SubstitutionOutcome::Applied {
        node,
        replaced: node_id,
    })
}
