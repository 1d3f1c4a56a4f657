use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::configurator::{Configured, Configurator};
use super::quantity_aggregator::{accumulate, QuantityMap};
use super::substitution::{self, SubstitutionOutcome};
use crate::{
    config::EngineConfig,
    errors::ServiceError,
    models::{
        AssociationType, BomNode, BomTree, BomTreeHeader, ExpansionType, ManufacturingRule,
        NodeId, Product, ProductAssociation, ProductFeature, ProductId, RoutingId,
    },
    repositories::{AssociationLookup, FeatureRuleResolver, ProductLookup},
};

/// Parameters of one tree construction.
#[derive(Debug, Clone)]
pub struct BuildTreeRequest {
    pub product_id: ProductId,
    /// Falls back to the configured default association type.
    pub bom_type: Option<AssociationType>,
    /// Falls back to now.
    pub in_date: Option<DateTime<Utc>>,
    pub expansion: ExpansionType,
    pub quantity: Decimal,
    pub amount: Decimal,
    pub routing_id: Option<RoutingId>,
    /// Falls back to the product's standard features.
    pub features: Option<Vec<ProductFeature>>,
}

impl BuildTreeRequest {
    pub fn new(product_id: impl Into<ProductId>) -> Self {
        Self {
            product_id: product_id.into(),
            bom_type: None,
            in_date: None,
            expansion: ExpansionType::Explosion,
            quantity: Decimal::ONE,
            amount: Decimal::ZERO,
            routing_id: None,
            features: None,
        }
    }

    pub fn bom_type(mut self, bom_type: AssociationType) -> Self {
        self.bom_type = Some(bom_type);
        self
    }

    pub fn as_of(mut self, in_date: DateTime<Utc>) -> Self {
        self.in_date = Some(in_date);
        self
    }

    pub fn expansion(mut self, expansion: ExpansionType) -> Self {
        self.expansion = expansion;
        self
    }

    pub fn quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn amount(mut self, amount: Decimal) -> Self {
        self.amount = amount;
        self
    }

    pub fn routing(mut self, routing_id: impl Into<RoutingId>) -> Self {
        self.routing_id = Some(routing_id.into());
        self
    }

    pub fn features(mut self, features: Vec<ProductFeature>) -> Self {
        self.features = Some(features);
        self
    }
}

/// Result of [`BomService::configure_tree`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationReport {
    /// Nodes that now hold a concrete product.
    pub resolved: Vec<NodeId>,
    /// Positions removed by a rule without replacement.
    pub discarded: usize,
    /// Virtual positions still awaiting a feature selection.
    pub unresolved: Vec<NodeId>,
}

impl ConfigurationReport {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Builds and classifies bill-of-materials trees.
#[derive(Clone)]
pub struct BomService {
    associations: Arc<dyn AssociationLookup>,
    products: Arc<dyn ProductLookup>,
    rules: Arc<dyn FeatureRuleResolver>,
    config: EngineConfig,
}

impl BomService {
    pub fn new(
        associations: Arc<dyn AssociationLookup>,
        products: Arc<dyn ProductLookup>,
        rules: Arc<dyn FeatureRuleResolver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            associations,
            products,
            rules,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn configurator(&self) -> Configurator<'_> {
        Configurator::new(
            self.rules.as_ref(),
            self.products.as_ref(),
            self.config.rule_match_policy,
        )
    }

    /// Association type named by `default_bom_type`.
    pub fn default_bom_type(&self) -> Result<AssociationType, ServiceError> {
        AssociationType::from_str(&self.config.default_bom_type).map_err(|_| {
            ServiceError::InvalidInput(format!(
                "Unknown BOM type {}",
                self.config.default_bom_type
            ))
        })
    }

    /// Builds the tree of `request.product_id`.
    ///
    /// A product manufactured as another product yields the tree of the
    /// latter, with the requested product kept as the root's
    /// `substituted_from`. A variant without a BOM of its own is built from
    /// its virtual product's BOM; the virtual product then drives rule
    /// selection and takes the `substituted_from` slot instead.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, expansion = %request.expansion))]
    pub fn build_tree(&self, request: BuildTreeRequest) -> Result<BomTree, ServiceError> {
        let in_date = request.in_date.unwrap_or_else(Utc::now);
        let bom_type = match request.bom_type {
            Some(bom_type) => bom_type,
            None => self.default_bom_type()?,
        };
        let requested = self.products.get_product(&request.product_id)?.ok_or_else(|| {
            ServiceError::NotFound(format!("Product {} not found", request.product_id))
        })?;
        let features = match request.features {
            Some(features) => features,
            None => self.products.get_standard_features(&request.product_id)?,
        };

        if request.expansion == ExpansionType::Implosion {
            let mut root = BomNode::root(requested, bom_type.clone(), request.quantity);
            root.product_for_rules = Some(request.product_id.clone());
            let header = BomTreeHeader {
                input_product: request.product_id.clone(),
                manufactured_product: request.product_id.clone(),
                routing_id: request.routing_id,
                in_date,
                bom_type,
                expansion: request.expansion,
                root_amount: request.amount,
                features,
            };
            let mut tree = BomTree::new(root, header);
            let root = tree.root();
            self.load_parents(&mut tree, root)?;
            counter!("bom.trees.built", 1);
            info!(nodes = tree.node_count(), "Where-used tree built");
            return Ok(tree);
        }

        let built = match self
            .associations
            .get_manufactured_as(&request.product_id, in_date)?
            .filter(|id| *id != request.product_id)
        {
            Some(manufactured_id) => {
                debug!(%manufactured_id, "Product is manufactured as another product");
                self.load_product(&manufactured_id)?
            }
            None => requested.clone(),
        };

        // Product recorded as the root's `substituted_from`
        let mut original = (built.product_id != requested.product_id).then(|| requested.clone());
        let mut product_for_rules = built.product_id.clone();
        let mut rows = self.associations.get_associations(
            &built.product_id,
            &bom_type,
            request.routing_id.as_deref(),
            in_date,
        )?;
        if rows.is_empty() {
            if let Some(virtual_id) = self
                .associations
                .get_virtual_product(&built.product_id, in_date)?
            {
                let virtual_rows = self.associations.get_associations(
                    &virtual_id,
                    &bom_type,
                    request.routing_id.as_deref(),
                    in_date,
                )?;
                if !virtual_rows.is_empty() {
                    debug!(%virtual_id, "Using the BOM of the virtual product");
                    original = Some(self.load_product(&virtual_id)?);
                    product_for_rules = virtual_id;
                    rows = virtual_rows;
                }
            }
        }

        let header = BomTreeHeader {
            input_product: request.product_id.clone(),
            manufactured_product: built.product_id.clone(),
            routing_id: request.routing_id,
            in_date,
            bom_type: bom_type.clone(),
            expansion: request.expansion,
            root_amount: request.amount,
            features: features.clone(),
        };
        let mut root = BomNode::root(built, bom_type.clone(), request.quantity);
        root.product_for_rules = Some(product_for_rules);
        let mut tree = BomTree::new(root, header);
        let root = tree.root();

        if let Some(original) = original {
            let original = tree.insert_detached(BomNode::root(original, bom_type, request.quantity));
            if let Some(node) = tree.node_mut(root) {
                node.substituted_from = Some(original);
            }
        }

        self.attach_components(&mut tree, root, rows, &features)?;
        counter!("bom.trees.built", 1);
        info!(
            nodes = tree.node_count(),
            configured = tree.is_configured(),
            "BOM tree built"
        );
        Ok(tree)
    }

    /// Expands the components of `node_id` according to the tree's expansion type.
    pub fn load_children(
        &self,
        tree: &mut BomTree,
        node_id: NodeId,
        features: &[ProductFeature],
    ) -> Result<(), ServiceError> {
        let rows = self.component_rows(tree, node_id)?;
        self.attach_components(tree, node_id, rows, features)
    }

    /// Associations of the node's product; a substitute without any falls
    /// back to those of the product it replaced.
    fn component_rows(
        &self,
        tree: &BomTree,
        node_id: NodeId,
    ) -> Result<Vec<ProductAssociation>, ServiceError> {
        let node = tree.require(node_id)?;
        let routing_id = if node.parent.is_none() {
            tree.header().routing_id.as_deref()
        } else {
            None
        };
        let rows = self.associations.get_associations(
            node.product_id(),
            tree.bom_type(),
            routing_id,
            tree.in_date(),
        )?;
        if !rows.is_empty() {
            return Ok(rows);
        }
        match node.substituted_from.and_then(|id| tree.node(id)) {
            Some(original) if original.product_id() != node.product_id() => {
                self.associations.get_associations(
                    original.product_id(),
                    tree.bom_type(),
                    routing_id,
                    tree.in_date(),
                )
            }
            _ => Ok(rows),
        }
    }

    fn attach_components(
        &self,
        tree: &mut BomTree,
        parent_id: NodeId,
        mut rows: Vec<ProductAssociation>,
        features: &[ProductFeature],
    ) -> Result<(), ServiceError> {
        let (depth, product_for_rules) = {
            let parent = tree.require(parent_id)?;
            (parent.depth, parent.product_for_rules.clone())
        };
        if rows.is_empty() {
            return Ok(());
        }
        if depth >= self.config.max_depth {
            warn!(depth, max_depth = self.config.max_depth, "BOM expansion stopped at maximum depth");
            return Ok(());
        }

        rows.sort_by(|a, b| {
            a.sequence_num
                .cmp(&b.sequence_num)
                .then_with(|| a.product_id_to.cmp(&b.product_id_to))
        });
        let lineage = product_lineage(tree, parent_id);
        let bom_type = tree.bom_type().clone();

        for row in rows {
            if lineage.contains(row.product_id_to.as_str()) {
                warn!(
                    parent = %row.product_id,
                    component = %row.product_id_to,
                    "Component is its own ancestor; not expanded"
                );
                continue;
            }
            let product = self.load_product(&row.product_id_to)?;
            let mut child = BomNode::from_association(product, row, bom_type.clone());
            child.product_for_rules = product_for_rules.clone();
            let child_id = tree.add_child(parent_id, child)?;

            let child_id = match self.configurator().configure(tree, child_id, features, None)? {
                Configured::Replaced { node, .. } => node,
                Configured::Unchanged => child_id,
                Configured::Discarded { .. } => continue,
            };
            if self.should_expand(tree, child_id)? {
                self.load_children(tree, child_id, features)?;
            }
        }
        Ok(())
    }

    fn should_expand(&self, tree: &BomTree, node_id: NodeId) -> Result<bool, ServiceError> {
        let depth = tree.require(node_id)?.depth;
        Ok(match tree.expansion() {
            ExpansionType::Explosion => true,
            ExpansionType::ExplosionSingleLevel => depth == 0,
            ExpansionType::ExplosionManufacturing => {
                depth == 0 || !self.is_warehouse_managed(tree, node_id, None)?
            }
            ExpansionType::Implosion => false,
        })
    }

    /// Expands the products that use the product of `node_id`, recursively.
    pub fn load_parents(&self, tree: &mut BomTree, node_id: NodeId) -> Result<(), ServiceError> {
        let (product_id, depth) = {
            let node = tree.require(node_id)?;
            (node.product_id().to_string(), node.depth)
        };
        let mut rows = self
            .associations
            .get_where_used(&product_id, tree.bom_type(), tree.in_date())?;
        if rows.is_empty() {
            return Ok(());
        }
        if depth >= self.config.max_depth {
            warn!(depth, "Where-used expansion stopped at maximum depth");
            return Ok(());
        }

        rows.sort_by(|a, b| {
            a.product_id
                .cmp(&b.product_id)
                .then_with(|| a.sequence_num.cmp(&b.sequence_num))
        });
        let lineage = product_lineage(tree, node_id);
        let bom_type = tree.bom_type().clone();

        for row in rows {
            if lineage.contains(row.product_id.as_str()) {
                warn!(product = %row.product_id, "Cyclic where-used link; not expanded");
                continue;
            }
            let product = self.load_product(&row.product_id)?;
            let parent = BomNode::from_association(product, row, bom_type.clone());
            let parent_id = tree.add_child(node_id, parent)?;
            self.load_parents(tree, parent_id)?;
        }
        Ok(())
    }

    /// Re-runs the configurator over every unconfigured position with `features`.
    #[instrument(skip(self, tree, features))]
    pub fn configure_tree(
        &self,
        tree: &mut BomTree,
        features: &[ProductFeature],
    ) -> Result<ConfigurationReport, ServiceError> {
        let mut report = ConfigurationReport::default();
        let root = tree.root();

        for node_id in tree.unconfigured_nodes() {
            // An earlier resolution may have detached this position.
            if tree.root_of(node_id) != root {
                continue;
            }
            match self.configurator().configure(tree, node_id, features, None)? {
                Configured::Replaced { node, .. } => {
                    if node != node_id && self.should_expand(tree, node)? {
                        self.load_children(tree, node, features)?;
                    }
                    report.resolved.push(node);
                }
                Configured::Discarded { .. } => report.discarded += 1,
                Configured::Unchanged => {}
            }
        }

        report.unresolved = tree.unconfigured_nodes();
        info!(
            resolved = report.resolved.len(),
            discarded = report.discarded,
            unresolved = report.unresolved.len(),
            "Tree configured"
        );
        Ok(report)
    }

    /// Replaces the component at `node_id` by `candidate_id` when one of
    /// `rules` allows it, then expands the substitute's own components.
    #[instrument(skip(self, tree, features, rules))]
    pub fn substitute_node(
        &self,
        tree: &mut BomTree,
        node_id: NodeId,
        candidate_id: &str,
        features: &[ProductFeature],
        rules: &[ManufacturingRule],
    ) -> Result<SubstitutionOutcome, ServiceError> {
        let candidate = self.products.get_product(candidate_id)?.ok_or_else(|| {
            ServiceError::NotFound(format!("Product {} not found", candidate_id))
        })?;
        let outcome = substitution::substitute_node(
            tree,
            node_id,
            candidate,
            features,
            rules,
            self.config.rule_match_policy,
        )?;
        if let SubstitutionOutcome::Applied { node, .. } = outcome {
            if self.should_expand(tree, node)? {
                self.load_children(tree, node, features)?;
            }
        }
        Ok(outcome)
    }

    /// Whether the position is built rather than bought: it has components
    /// and, unless `ignore_supplier_products`, no supplier currently offers it.
    pub fn is_manufactured(
        &self,
        tree: &BomTree,
        node_id: NodeId,
        ignore_supplier_products: bool,
    ) -> Result<bool, ServiceError> {
        let node = tree.require(node_id)?;
        if node.is_leaf() {
            return Ok(false);
        }
        if ignore_supplier_products {
            return Ok(true);
        }
        let offers = self
            .products
            .get_supplier_products(node.product_id(), tree.in_date())?;
        Ok(offers.is_empty())
    }

    /// Whether the product is stocked, optionally at one facility. A
    /// substitute that is not stocked itself inherits the answer of the
    /// product it replaced.
    pub fn is_warehouse_managed(
        &self,
        tree: &BomTree,
        node_id: NodeId,
        facility_id: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let mut current = Some(node_id);
        while let Some(id) = current {
            let node = tree.require(id)?;
            if node.product.is_wip() {
                return Ok(false);
            }
            let stocked = self
                .products
                .get_facility_stock_targets(node.product_id())?
                .iter()
                .any(|target| {
                    target.is_active() && facility_id.map_or(true, |f| target.facility_id == f)
                });
            if stocked {
                return Ok(true);
            }
            current = node.substituted_from;
        }
        Ok(false)
    }

    pub fn is_virtual(&self, tree: &BomTree, node_id: NodeId) -> Result<bool, ServiceError> {
        Ok(tree.require(node_id)?.is_virtual())
    }

    /// Rollup of the positions that are bought rather than built.
    #[instrument(skip(self, tree))]
    pub fn components_to_purchase(&self, tree: &BomTree) -> Result<QuantityMap, ServiceError> {
        let mut acc = QuantityMap::new();
        for (id, node) in tree.iter() {
            if id == tree.root() {
                continue;
            }
            if !self.is_manufactured(tree, id, false)? {
                accumulate(&mut acc, node)?;
            }
        }
        Ok(acc)
    }

    /// Deepest level at which `product_id` is used (its low-level code).
    #[instrument(skip(self))]
    pub fn max_depth(
        &self,
        product_id: &str,
        bom_type: AssociationType,
        in_date: DateTime<Utc>,
    ) -> Result<u32, ServiceError> {
        let tree = self.build_tree(
            BuildTreeRequest::new(product_id)
                .bom_type(bom_type)
                .as_of(in_date)
                .expansion(ExpansionType::Implosion)
                .features(Vec::new()),
        )?;
        Ok(tree.max_depth())
    }

    /// Whether adding `component_id` under `parent_id` would close a cycle,
    /// i.e. the component already uses the parent somewhere above it.
    #[instrument(skip(self))]
    pub fn search_duplicated_ancestor(
        &self,
        parent_id: &str,
        component_id: &str,
        bom_type: AssociationType,
        in_date: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        if parent_id == component_id {
            return Ok(true);
        }
        let where_used = self.build_tree(
            BuildTreeRequest::new(parent_id)
                .bom_type(bom_type)
                .as_of(in_date)
                .expansion(ExpansionType::Implosion)
                .features(Vec::new()),
        )?;
        Ok(where_used
            .all_product_ids()
            .iter()
            .any(|id| id == component_id))
    }

    fn load_product(&self, product_id: &str) -> Result<Product, ServiceError> {
        self.products.get_product(product_id)?.ok_or_else(|| {
            ServiceError::db_error(format!("Referenced product {} not found", product_id))
        })
    }
}

/// Product ids of `node_id` and all of its ancestors.
fn product_lineage(tree: &BomTree, node_id: NodeId) -> HashSet<String> {
    std::iter::once(node_id)
        .chain(tree.ancestors(node_id))
        .filter_map(|id| tree.node(id))
        .map(|node| node.product_id().to_string())
        .collect()
}
