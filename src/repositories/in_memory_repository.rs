use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    AssociationLookup, FacilityLookup, FeatureRuleResolver, ProductLookup,
    ProductionRequestSink, RoutingLookup,
};
use crate::errors::ServiceError;
use crate::models::{
    AssociationType, FacilityId, FacilityStockTarget, FeatureId, ManufacturingRule,
    NewProductionRequest, Product, ProductAssociation, ProductFeature, ProductId,
    ProductRouting, ProductionRequest, Routing, RoutingId, RuleScope, SupplierProduct,
};

/// Variant of a virtual product and the features that distinguish it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub virtual_product_id: ProductId,
    pub variant_product_id: ProductId,
    #[serde(default)]
    pub features: Vec<FeatureId>,
}

/// Serializable snapshot of every record the engine reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BomFixture {
    pub products: Vec<Product>,
    pub standard_features: HashMap<ProductId, Vec<ProductFeature>>,
    pub associations: Vec<ProductAssociation>,
    pub variants: Vec<ProductVariant>,
    pub rules: Vec<ManufacturingRule>,
    pub supplier_products: Vec<SupplierProduct>,
    pub stock_targets: Vec<FacilityStockTarget>,
    pub routings: Vec<Routing>,
    pub product_routings: Vec<ProductRouting>,
    pub order_facilities: HashMap<String, FacilityId>,
    pub shipment_facilities: HashMap<String, FacilityId>,
}

/// Repository over an in-process [`BomFixture`]; also records the production
/// requests it receives.
#[derive(Debug, Default)]
pub struct InMemoryBomRepository {
    fixture: BomFixture,
    requests: Mutex<Vec<ProductionRequest>>,
}

impl InMemoryBomRepository {
    pub fn new(fixture: BomFixture) -> Self {
        Self {
            fixture,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ServiceError> {
        let fixture: BomFixture = serde_json::from_str(json)
            .map_err(|e| ServiceError::InvalidInput(format!("Invalid BOM fixture: {}", e)))?;
        info!(
            products = fixture.products.len(),
            associations = fixture.associations.len(),
            rules = fixture.rules.len(),
            "BOM fixture loaded"
        );
        Ok(Self::new(fixture))
    }

    pub fn from_path(path: &Path) -> Result<Self, ServiceError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::db_error(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn fixture(&self) -> &BomFixture {
        &self.fixture
    }

    /// Production requests received so far, in creation order.
    pub fn production_requests(&self) -> Vec<ProductionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn effective_associations<'a>(
        &'a self,
        association_type: &'a AssociationType,
        as_of: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a ProductAssociation> + 'a {
        self.fixture
            .associations
            .iter()
            .filter(move |a| a.association_type == *association_type && a.is_effective(as_of))
    }
}

impl AssociationLookup for InMemoryBomRepository {
    fn get_associations(
        &self,
        product_id: &str,
        bom_type: &AssociationType,
        routing_id: Option<&str>,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<ProductAssociation>, ServiceError> {
        Ok(self
            .effective_associations(bom_type, as_of)
            .filter(|a| a.product_id == product_id)
            .filter(|a| match (routing_id, a.routing_override.as_deref()) {
                (Some(wanted), Some(linked)) => wanted == linked,
                _ => true,
            })
            .cloned()
            .collect())
    }

    fn get_where_used(
        &self,
        product_id: &str,
        bom_type: &AssociationType,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<ProductAssociation>, ServiceError> {
        Ok(self
            .effective_associations(bom_type, as_of)
            .filter(|a| a.product_id_to == product_id)
            .cloned()
            .collect())
    }

    fn get_manufactured_as(
        &self,
        product_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Option<ProductId>, ServiceError> {
        Ok(self
            .effective_associations(&AssociationType::ProductManufactured, as_of)
            .find(|a| a.product_id == product_id)
            .map(|a| a.product_id_to.clone()))
    }

    fn get_virtual_product(
        &self,
        variant_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Option<ProductId>, ServiceError> {
        let by_association = self
            .effective_associations(&AssociationType::ProductVariant, as_of)
            .find(|a| a.product_id_to == variant_id)
            .map(|a| a.product_id.clone());
        Ok(by_association.or_else(|| {
            self.fixture
                .variants
                .iter()
                .find(|v| v.variant_product_id == variant_id)
                .map(|v| v.virtual_product_id.clone())
        }))
    }
}

impl ProductLookup for InMemoryBomRepository {
    fn get_product(&self, product_id: &str) -> Result<Option<Product>, ServiceError> {
        Ok(self
            .fixture
            .products
            .iter()
            .find(|p| p.product_id == product_id)
            .cloned())
    }

    fn get_standard_features(&self, product_id: &str) -> Result<Vec<ProductFeature>, ServiceError> {
        Ok(self
            .fixture
            .standard_features
            .get(product_id)
            .cloned()
            .unwrap_or_default())
    }

    fn find_variants(
        &self,
        virtual_product_id: &str,
        features: &[ProductFeature],
    ) -> Result<Vec<ProductId>, ServiceError> {
        let selected: HashSet<&str> = features.iter().map(|f| f.feature_id.as_str()).collect();
        Ok(self
            .fixture
            .variants
            .iter()
            .filter(|v| v.virtual_product_id == virtual_product_id)
            .filter(|v| {
                !v.features.is_empty() && v.features.iter().all(|f| selected.contains(f.as_str()))
            })
            .map(|v| v.variant_product_id.clone())
            .collect())
    }

    fn get_supplier_products(
        &self,
        product_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<SupplierProduct>, ServiceError> {
        Ok(self
            .fixture
            .supplier_products
            .iter()
            .filter(|s| s.product_id == product_id && s.is_available(as_of))
            .cloned()
            .collect())
    }

    fn get_facility_stock_targets(
        &self,
        product_id: &str,
    ) -> Result<Vec<FacilityStockTarget>, ServiceError> {
        Ok(self
            .fixture
            .stock_targets
            .iter()
            .filter(|t| t.product_id == product_id)
            .cloned()
            .collect())
    }
}

impl FeatureRuleResolver for InMemoryBomRepository {
    fn get_feature_rules(
        &self,
        scope: &RuleScope,
        _features: &[ProductFeature],
        as_of: DateTime<Utc>,
    ) -> Result<Vec<ManufacturingRule>, ServiceError> {
        Ok(self
            .fixture
            .rules
            .iter()
            .filter(|r| scope.contains(r) && r.is_effective(as_of))
            .cloned()
            .collect())
    }
}

impl RoutingLookup for InMemoryBomRepository {
    fn get_product_routing(
        &self,
        product_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Option<RoutingId>, ServiceError> {
        Ok(self
            .fixture
            .product_routings
            .iter()
            .find(|r| r.product_id == product_id && r.is_effective(as_of))
            .map(|r| r.routing_id.clone()))
    }

    fn get_routing_lead_time(&self, routing_id: &str) -> Result<Duration, ServiceError> {
        self.fixture
            .routings
            .iter()
            .find(|r| r.routing_id == routing_id)
            .ok_or_else(|| ServiceError::db_error(format!("Routing {} not found", routing_id)))?
            .lead_time()
    }
}

impl FacilityLookup for InMemoryBomRepository {
    fn facility_for_order(&self, order_id: &str) -> Result<Option<FacilityId>, ServiceError> {
        Ok(self.fixture.order_facilities.get(order_id).cloned())
    }

    fn facility_for_shipment(
        &self,
        shipment_id: &str,
    ) -> Result<Option<FacilityId>, ServiceError> {
        Ok(self.fixture.shipment_facilities.get(shipment_id).cloned())
    }
}

impl ProductionRequestSink for InMemoryBomRepository {
    fn create_production_request(
        &self,
        request: &NewProductionRequest,
    ) -> Result<Uuid, ServiceError> {
        let id = Uuid::new_v4();
        let mut requests = self
            .requests
            .lock()
            .map_err(|_| ServiceError::db_error("Production request store is poisoned"))?;
        requests.push(ProductionRequest {
            id,
            request: request.clone(),
        });
        debug!(%id, product_id = %request.product_id, "Production request recorded");
        Ok(id)
    }
}
