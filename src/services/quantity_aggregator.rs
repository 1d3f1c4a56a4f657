//! MRP-style rollups over a built tree.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::errors::ServiceError;
use crate::models::{BomNode, BomTree, NodeId, ProductId, ProductType};

/// Total requirement for one product across every position it occupies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedComponent {
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub quantity: Decimal,
    /// Number of tree positions that contributed.
    pub occurrences: usize,
    /// Shallowest level the product appears at.
    pub min_depth: u32,
}

/// Rollup keyed by product id. Ordered so output is stable.
pub type QuantityMap = BTreeMap<ProductId, AggregatedComponent>;

/// Adds the quantity of `node` to its product's entry.
pub fn accumulate(acc: &mut QuantityMap, node: &BomNode) -> Result<(), ServiceError> {
    match acc.get_mut(node.product_id()) {
        Some(entry) => {
            entry.quantity = entry.quantity.checked_add(node.quantity).ok_or_else(|| {
                ServiceError::InvalidInput(format!(
                    "Total quantity of {} overflows",
                    node.product_id()
                ))
            })?;
            entry.occurrences += 1;
            entry.min_depth = entry.min_depth.min(node.depth);
        }
        None => {
            acc.insert(
                node.product_id().to_string(),
                AggregatedComponent {
                    product_id: node.product_id().to_string(),
                    product_type: node.product.product_type.clone(),
                    quantity: node.quantity,
                    occurrences: 1,
                    min_depth: node.depth,
                },
            );
        }
    }
    Ok(())
}

/// Adds `node_id` and every node below it to `acc`.
pub fn sum_quantity(
    tree: &BomTree,
    node_id: NodeId,
    acc: &mut QuantityMap,
) -> Result<(), ServiceError> {
    for (_, node) in tree.iter_from(node_id) {
        accumulate(acc, node)?;
    }
    Ok(())
}

/// Rollup of the whole tree, root included.
pub fn sum_quantities(tree: &BomTree) -> Result<QuantityMap, ServiceError> {
    let mut acc = QuantityMap::new();
    sum_quantity(tree, tree.root(), &mut acc)?;
    Ok(acc)
}

/// One row of the indented bill of materials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownLine {
    pub depth: u32,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub is_virtual: bool,
    #[serde(skip)]
    pub node: NodeId,
}

/// Pre-order listing of the tree. With `exclude_wips`, work-in-progress
/// components are left out together with everything below them.
pub fn breakdown(tree: &BomTree, exclude_wips: bool) -> Vec<BreakdownLine> {
    let mut lines = Vec::new();
    let mut stack = vec![tree.root()];
    while let Some(id) = stack.pop() {
        let node = match tree.node(id) {
            Some(node) => node,
            None => continue,
        };
        if exclude_wips && id != tree.root() && node.product.is_wip() {
            continue;
        }
        lines.push(BreakdownLine {
            depth: node.depth,
            product_id: node.product_id().to_string(),
            quantity: node.quantity,
            is_virtual: node.is_virtual(),
            node: id,
        });
        stack.extend(node.children.iter().rev().copied());
    }
    lines
}
