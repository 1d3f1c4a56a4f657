use generational_arena::Index;
use rust_decimal::Decimal;

use super::manufacturing_rule::ManufacturingRule;
use super::product::{Product, ProductId};
use super::product_association::{AssociationType, ProductAssociation};
use crate::errors::ServiceError;

/// Arena index of a node inside its [`BomTree`](super::BomTree).
pub type NodeId = Index;

/// One position of a bill-of-materials tree.
///
/// `children` are owned by this node; `parent` and `substituted_from` are
/// lookups only. Quantities are kept consistent by the owning tree.
#[derive(Debug, Clone)]
pub struct BomNode {
    pub product: Product,
    /// Quantity required at this position for the tree's root quantity.
    pub quantity: Decimal,
    pub quantity_multiplier: Decimal,
    pub scrap_factor: Decimal,
    pub depth: u32,
    pub bom_type: AssociationType,
    /// Association row this position was expanded from; `None` for the root.
    pub association: Option<ProductAssociation>,
    pub applied_rule: Option<ManufacturingRule>,
    pub parent: Option<NodeId>,
    pub substituted_from: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Product whose rule set configures this position.
    pub product_for_rules: Option<ProductId>,
}

impl BomNode {
    pub fn root(product: Product, bom_type: AssociationType, quantity: Decimal) -> Self {
        Self {
            product,
            quantity,
            quantity_multiplier: Decimal::ONE,
            scrap_factor: Decimal::ONE,
            depth: 0,
            bom_type,
            association: None,
            applied_rule: None,
            parent: None,
            substituted_from: None,
            children: Vec::new(),
            product_for_rules: None,
        }
    }

    /// Unattached node for the component of `association`.
    pub fn from_association(
        product: Product,
        association: ProductAssociation,
        bom_type: AssociationType,
    ) -> Self {
        let scrap_factor = association.scrap_factor();
        Self {
            product,
            quantity: Decimal::ZERO,
            quantity_multiplier: Decimal::ONE,
            scrap_factor,
            depth: 0,
            bom_type,
            association: Some(association),
            applied_rule: None,
            parent: None,
            substituted_from: None,
            children: Vec::new(),
            product_for_rules: None,
        }
    }

    /// Replacement for `self` made of `product`, inheriting its association,
    /// scrap factor and position. Tree links are left empty.
    pub fn replacement(
        &self,
        product: Product,
        rule: Option<ManufacturingRule>,
    ) -> Self {
        let quantity_multiplier = rule
            .as_ref()
            .and_then(ManufacturingRule::multiplier_override)
            .unwrap_or(self.quantity_multiplier);
        Self {
            product,
            quantity: Decimal::ZERO,
            quantity_multiplier,
            scrap_factor: self.scrap_factor,
            depth: self.depth,
            bom_type: self.bom_type.clone(),
            association: self.association.clone(),
            applied_rule: rule,
            parent: None,
            substituted_from: None,
            children: Vec::new(),
            product_for_rules: self.product_for_rules.clone(),
        }
    }

    pub fn product_id(&self) -> &str {
        &self.product.product_id
    }

    pub fn is_virtual(&self) -> bool {
        self.product.is_virtual
    }

    /// A virtual product at this position still awaits feature selection.
    pub fn is_configured(&self) -> bool {
        !self.is_virtual()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn association_quantity(&self) -> Decimal {
        self.association
            .as_ref()
            .map_or(Decimal::ONE, |assoc| assoc.quantity)
    }

    /// `parent × association.quantity × multiplier × scrap`.
    pub fn derive_quantity(&self, parent_quantity: Decimal) -> Result<Decimal, ServiceError> {
        parent_quantity
            .checked_mul(self.association_quantity())
            .and_then(|q| q.checked_mul(self.quantity_multiplier))
            .and_then(|q| q.checked_mul(self.scrap_factor))
            .ok_or_else(|| {
                ServiceError::InvalidInput(format!(
                    "Quantity of {} overflows below a parent quantity of {}",
                    self.product_id(),
                    parent_quantity
                ))
            })
    }
}
