//! Resolution of virtual tree positions into concrete products.
//!
//! Rule selection itself ([`select_rule`]) is a pure function over the rules
//! and the selected features; [`Configurator`] only fetches the candidate
//! rules scope by scope and applies the winner to the tree.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::errors::ServiceError;
use crate::models::{
    BomNode, BomTree, ManufacturingRule, NodeId, Product, ProductFeature, RuleScope,
};
use crate::repositories::{FeatureRuleResolver, ProductLookup};

/// Tie-break applied when more than one rule of a scope is satisfied.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RuleMatchPolicy {
    /// First satisfied rule in resolver order.
    #[default]
    FirstMatch,
    /// Satisfied rule with the lowest `priority`; ties keep resolver order.
    Priority,
}

/// Picks the rule to apply among `rules`, or `None` when no effective rule is
/// satisfied by `features`.
pub fn select_rule<'r>(
    rules: &'r [ManufacturingRule],
    features: &[ProductFeature],
    at: DateTime<Utc>,
    policy: RuleMatchPolicy,
) -> Option<&'r ManufacturingRule> {
    let mut satisfied = rules
        .iter()
        .filter(|rule| rule.is_effective(at) && rule.is_satisfied_by(features));
    match policy {
        RuleMatchPolicy::FirstMatch => satisfied.next(),
        RuleMatchPolicy::Priority => satisfied.min_by_key(|rule| rule.priority),
    }
}

/// Rule scopes for `node`, most specific first.
///
/// A parent that is itself a substitute also contributes the product it
/// replaced, so rules written against the original parent keep applying.
pub fn rule_scopes(tree: &BomTree, node: &BomNode, product_for_rules: Option<&str>) -> Vec<RuleScope> {
    let product_id_in = node.product_id().to_string();
    let mut parents: Vec<String> = Vec::new();
    if let Some(parent) = node.parent.and_then(|id| tree.node(id)) {
        parents.push(parent.product_id().to_string());
        if let Some(original) = parent.substituted_from.and_then(|id| tree.node(id)) {
            if original.product_id() != parent.product_id() {
                parents.push(original.product_id().to_string());
            }
        }
    }

    let mut scopes = Vec::with_capacity(parents.len() * 2 + 1);
    if let Some(product_for_rules) = product_for_rules {
        scopes.extend(parents.iter().map(|parent| RuleScope::Specific {
            product_for_rules: product_for_rules.to_string(),
            product_id_for: parent.clone(),
            product_id_in: product_id_in.clone(),
        }));
    }
    scopes.extend(parents.iter().map(|parent| RuleScope::Link {
        product_id_for: parent.clone(),
        product_id_in: product_id_in.clone(),
    }));
    scopes.push(RuleScope::Node { product_id_in });
    scopes
}

/// Result of configuring one position.
#[derive(Debug, Clone, PartialEq)]
pub enum Configured {
    /// The node was already concrete, or nothing resolved it.
    Unchanged,
    /// A concrete node now holds the position. `rule` is `None` when the
    /// variant was picked directly from the selected features.
    Replaced {
        node: NodeId,
        rule: Option<ManufacturingRule>,
    },
    /// A satisfied rule without replacement removed the position.
    Discarded { rule: ManufacturingRule },
}

pub struct Configurator<'a> {
    rules: &'a dyn FeatureRuleResolver,
    products: &'a dyn ProductLookup,
    policy: RuleMatchPolicy,
}

impl<'a> Configurator<'a> {
    pub fn new(
        rules: &'a dyn FeatureRuleResolver,
        products: &'a dyn ProductLookup,
        policy: RuleMatchPolicy,
    ) -> Self {
        Self {
            rules,
            products,
            policy,
        }
    }

    /// Resolves the virtual product at `node_id` for the selected features.
    ///
    /// A replacement node has no children; loading them is up to the caller.
    #[instrument(skip(self, tree, features), fields(node = ?node_id))]
    pub fn configure(
        &self,
        tree: &mut BomTree,
        node_id: NodeId,
        features: &[ProductFeature],
        product_id_for_rules: Option<&str>,
    ) -> Result<Configured, ServiceError> {
        let node = tree.require(node_id)?;
        if node.is_configured() {
            return Ok(Configured::Unchanged);
        }
        let at = tree.in_date();

        if node.parent.is_some() {
            let product_for_rules = product_id_for_rules
                .map(str::to_string)
                .or_else(|| node.product_for_rules.clone());
            for scope in rule_scopes(tree, node, product_for_rules.as_deref()) {
                let rules = self.rules.get_feature_rules(&scope, features, at)?;
                if let Some(rule) = select_rule(&rules, features, at, self.policy) {
                    debug!(rule_id = %rule.rule_id, ?scope, "Manufacturing rule matched");
                    return self.apply_rule(tree, node_id, rule.clone());
                }
            }
        }

        self.select_variant(tree, node_id, features)
    }

    fn apply_rule(
        &self,
        tree: &mut BomTree,
        node_id: NodeId,
        rule: ManufacturingRule,
    ) -> Result<Configured, ServiceError> {
        let replacement_id = match rule.product_id_in_subst.as_deref() {
            Some(id) if !rule.discards_component() => id.to_string(),
            _ => {
                debug!(rule_id = %rule.rule_id, "Rule removes the component");
                tree.remove_subtree(node_id);
                return Ok(Configured::Discarded { rule });
            }
        };
        let product = self.load_product(&replacement_id)?;
        let replacement = tree.require(node_id)?.replacement(product, Some(rule.clone()));
        let node = tree.replace_with(node_id, replacement)?;
        counter!("bom.nodes.configured", 1);
        Ok(Configured::Replaced {
            node,
            rule: Some(rule),
        })
    }

    fn select_variant(
        &self,
        tree: &mut BomTree,
        node_id: NodeId,
        features: &[ProductFeature],
    ) -> Result<Configured, ServiceError> {
        let (product_id, is_root) = {
            let node = tree.require(node_id)?;
            (node.product_id().to_string(), node.parent.is_none())
        };
        let variants = self.products.find_variants(&product_id, features)?;
        let variant_id = match variants.as_slice() {
            [single] => single,
            [] => {
                debug!(%product_id, "No variant matches the selected features");
                return Ok(Configured::Unchanged);
            }
            many => {
                warn!(%product_id, candidates = many.len(), "Ambiguous variant selection");
                return Ok(Configured::Unchanged);
            }
        };
        let product = self.load_product(variant_id)?;

        let node = if is_root {
            // The root keeps its place and its components; the virtual
            // product is kept as a detached record.
            let mut original = tree.require(node_id)?.clone();
            original.children.clear();
            let original_id = tree.insert_detached(original);
            tree.set_manufactured_product(product.product_id.clone());
            if let Some(root) = tree.node_mut(node_id) {
                root.product = product;
                root.substituted_from = Some(original_id);
            }
            node_id
        } else {
            let replacement = tree.require(node_id)?.replacement(product, None);
            tree.replace_with(node_id, replacement)?
        };
        counter!("bom.nodes.configured", 1);
        Ok(Configured::Replaced { node, rule: None })
    }

    fn load_product(&self, product_id: &str) -> Result<Product, ServiceError> {
        self.products.get_product(product_id)?.ok_or_else(|| {
            ServiceError::db_error(format!("Product {} not found", product_id))
        })
    }
}
