use chrono::{DateTime, Utc};
use generational_arena::Arena;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::instrument;

use super::bom_node::{BomNode, NodeId};
use super::product::{ProductFeature, ProductId};
use super::product_association::AssociationType;
use super::routing::RoutingId;
use crate::errors::ServiceError;

/// Direction and reach of a tree expansion.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ExpansionType {
    /// Components, all levels.
    Explosion,
    /// Direct components only.
    ExplosionSingleLevel,
    /// Components, without expanding warehouse-managed ones.
    ExplosionManufacturing,
    /// Products that use the root (where-used).
    Implosion,
}

/// Tree-wide context of one BOM request.
#[derive(Debug, Clone)]
pub struct BomTreeHeader {
    /// The product originally requested.
    pub input_product: ProductId,
    /// The product actually built; differs when manufactured as another
    /// product or resolved through its virtual parent.
    pub manufactured_product: ProductId,
    pub routing_id: Option<RoutingId>,
    /// As-of date selecting the effective associations.
    pub in_date: DateTime<Utc>,
    pub bom_type: AssociationType,
    pub expansion: ExpansionType,
    pub root_amount: Decimal,
    pub features: Vec<ProductFeature>,
}

/// Arena-backed bill-of-materials tree.
///
/// The arena may also hold detached nodes: originals kept as the audit
/// trail of a substitution. Traversals start at the root and never see them.
#[derive(Debug)]
pub struct BomTree {
    arena: Arena<BomNode>,
    root: NodeId,
    header: BomTreeHeader,
}

impl BomTree {
    pub fn new(mut root: BomNode, header: BomTreeHeader) -> Self {
        root.parent = None;
        root.depth = 0;
        root.children.clear();
        let mut arena = Arena::new();
        let root = arena.insert(root);
        Self {
            arena,
            root,
            header,
        }
    }

    pub fn header(&self) -> &BomTreeHeader {
        &self.header
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_node(&self) -> &BomNode {
        &self.arena[self.root]
    }

    pub fn root_quantity(&self) -> Decimal {
        self.root_node().quantity
    }

    pub fn in_date(&self) -> DateTime<Utc> {
        self.header.in_date
    }

    pub fn bom_type(&self) -> &AssociationType {
        &self.header.bom_type
    }

    pub fn expansion(&self) -> ExpansionType {
        self.header.expansion
    }

    /// Records the product the root now builds, after a virtual root is resolved.
    pub(crate) fn set_manufactured_product(&mut self, product_id: impl Into<ProductId>) {
        self.header.manufactured_product = product_id.into();
    }

    pub fn node(&self, id: NodeId) -> Option<&BomNode> {
        self.arena.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut BomNode> {
        self.arena.get_mut(id)
    }

    pub fn require(&self, id: NodeId) -> Result<&BomNode, ServiceError> {
        self.arena
            .get(id)
            .ok_or_else(|| ServiceError::NotFound(format!("BOM node {:?} not found", id)))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.arena.get(id).map_or(&[], |node| node.children.as_slice())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena.get(id).and_then(|node| node.parent)
    }

    /// Top of the chain of parent links starting at `id`.
    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut ancestors = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.parent(parent);
        }
        ancestors
    }

    /// Appends `node` as the last child of `parent`, deriving its depth and quantity.
    #[instrument(level = "trace", skip(self, node), fields(product_id = %node.product.product_id))]
    pub fn add_child(&mut self, parent: NodeId, mut node: BomNode) -> Result<NodeId, ServiceError> {
        let (parent_depth, parent_quantity) = {
            let parent_node = self.require(parent)?;
            (parent_node.depth, parent_node.quantity)
        };
        node.parent = Some(parent);
        node.depth = parent_depth + 1;
        node.quantity = node.derive_quantity(parent_quantity)?;
        let id = self.arena.insert(node);
        if let Some(parent_node) = self.arena.get_mut(parent) {
            parent_node.children.push(id);
        }
        Ok(id)
    }

    /// Stores a node that is not part of the tree structure.
    pub fn insert_detached(&mut self, mut node: BomNode) -> NodeId {
        node.parent = None;
        self.arena.insert(node)
    }

    /// Puts `new` in the place of `old` among the children of `old`'s parent.
    ///
    /// `old` and its sub-tree stay in the arena, detached.
    pub fn replace_child(&mut self, old: NodeId, new: NodeId) -> Result<NodeId, ServiceError> {
        let parent = self.require(old)?.parent.ok_or_else(|| {
            ServiceError::InvalidOperation("The root node has no parent to replace it in".into())
        })?;
        self.require(new)?;
        let position = self
            .children(parent)
            .iter()
            .position(|child| *child == old)
            .ok_or_else(|| {
                ServiceError::InvalidOperation(format!(
                    "Node {:?} is not a child of {:?}",
                    old, parent
                ))
            })?;

        if let Some(parent_node) = self.arena.get_mut(parent) {
            parent_node.children[position] = new;
        }
        if let Some(old_node) = self.arena.get_mut(old) {
            old_node.parent = None;
        }
        if let Some(new_node) = self.arena.get_mut(new) {
            new_node.parent = Some(parent);
        }
        self.recompute_subtree(new)?;
        Ok(parent)
    }

    /// Attaches `replacement` in the place of `original`, recording `original`
    /// as its `substituted_from`.
    pub fn replace_with(
        &mut self,
        original: NodeId,
        mut replacement: BomNode,
    ) -> Result<NodeId, ServiceError> {
        replacement.substituted_from = Some(original);
        replacement.children.clear();
        let id = self.insert_detached(replacement);
        if let Err(e) = self.replace_child(original, id) {
            self.arena.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Removes `id` from its parent's children; the node stays in the arena.
    pub fn detach(&mut self, id: NodeId) -> Result<(), ServiceError> {
        let parent = self.require(id)?.parent;
        if let Some(parent) = parent {
            if let Some(parent_node) = self.arena.get_mut(parent) {
                parent_node.children.retain(|child| *child != id);
            }
        }
        if let Some(node) = self.arena.get_mut(id) {
            node.parent = None;
        }
        Ok(())
    }

    /// Drops a detached node and everything below it from the arena.
    pub fn remove_subtree(&mut self, id: NodeId) {
        if id == self.root {
            return;
        }
        let _ = self.detach(id);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.arena.remove(current) {
                stack.extend(node.children);
            }
        }
    }

    /// Sets the root quantity and re-derives every quantity below it.
    #[instrument(skip(self))]
    pub fn set_root_quantity(&mut self, quantity: Decimal) -> Result<(), ServiceError> {
        let root = self.root;
        if let Some(node) = self.arena.get_mut(root) {
            node.quantity = quantity;
        }
        self.recompute_subtree(root)
    }

    /// Re-derives depth and quantity of `id` (from its parent) and of its descendants.
    pub fn recompute_subtree(&mut self, id: NodeId) -> Result<(), ServiceError> {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let parent_values = self
                .parent(current)
                .and_then(|parent| self.arena.get(parent))
                .map(|parent| (parent.depth, parent.quantity));
            if let Some(node) = self.arena.get_mut(current) {
                if let Some((depth, quantity)) = parent_values {
                    node.depth = depth + 1;
                    node.quantity = node.derive_quantity(quantity)?;
                }
                stack.extend(node.children.iter().copied());
            }
        }
        Ok(())
    }

    /// Pre-order traversal from the root.
    pub fn iter(&self) -> TreeIterator<'_> {
        self.iter_from(self.root)
    }

    /// Pre-order traversal of the sub-tree rooted at `id`.
    pub fn iter_from(&self, id: NodeId) -> TreeIterator<'_> {
        TreeIterator {
            tree: self,
            stack: vec![id],
        }
    }

    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Virtual positions that have not been resolved to a concrete product.
    pub fn unconfigured_nodes(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| !node.is_configured())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn is_configured(&self) -> bool {
        self.iter().all(|(_, node)| node.is_configured())
    }

    /// Distinct product ids in pre-order of first appearance.
    pub fn all_product_ids(&self) -> Vec<ProductId> {
        let mut seen = HashSet::new();
        self.iter()
            .filter(|(_, node)| seen.insert(node.product_id().to_string()))
            .map(|(_, node)| node.product_id().to_string())
            .collect()
    }

    pub fn max_depth(&self) -> u32 {
        self.iter().map(|(_, node)| node.depth).max().unwrap_or(0)
    }
}

impl fmt::Display for BomTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, node) in self.iter() {
            writeln!(
                f,
                "{:indent$}{} x {}{}",
                "",
                node.product_id(),
                node.quantity.normalize(),
                if node.is_virtual() { " (virtual)" } else { "" },
                indent = node.depth as usize * 2
            )?;
        }
        Ok(())
    }
}

pub struct TreeIterator<'a> {
    tree: &'a BomTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for TreeIterator<'a> {
    type Item = (NodeId, &'a BomNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(current) = self.stack.pop() {
            if let Some(node) = self.tree.arena.get(current) {
                // Reverse push keeps children in left-to-right order
                self.stack.extend(node.children.iter().rev().copied());
                return Some((current, node));
            }
        }
        None
    }
}
