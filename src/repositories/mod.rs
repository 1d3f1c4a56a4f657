//! Boundary between the BOM engine and the systems that own its data.
//!
//! Implementations translate their own storage failures into
//! [`ServiceError::DatabaseError`] (see [`ServiceError::db_error`]).

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{
    AssociationType, FacilityId, FacilityStockTarget, ManufacturingRule, NewProductionRequest,
    Product, ProductAssociation, ProductFeature, ProductId, RoutingId, RuleScope, SupplierProduct,
};

pub mod in_memory_repository;

pub use in_memory_repository::{BomFixture, InMemoryBomRepository, ProductVariant};

/// Effective-dated component associations.
pub trait AssociationLookup: Send + Sync {
    /// Components of `product_id`, optionally restricted to one routing.
    fn get_associations(
        &self,
        product_id: &str,
        bom_type: &AssociationType,
        routing_id: Option<&str>,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<ProductAssociation>, ServiceError>;

    /// Associations in which `product_id` is the component.
    fn get_where_used(
        &self,
        product_id: &str,
        bom_type: &AssociationType,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<ProductAssociation>, ServiceError>;

    /// Product that is actually built when `product_id` is ordered.
    fn get_manufactured_as(
        &self,
        product_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Option<ProductId>, ServiceError>;

    /// Virtual product `variant_id` is a variant of.
    fn get_virtual_product(
        &self,
        variant_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Option<ProductId>, ServiceError>;
}

/// Product master data and the records that classify a product.
pub trait ProductLookup: Send + Sync {
    fn get_product(&self, product_id: &str) -> Result<Option<Product>, ServiceError>;

    fn get_standard_features(&self, product_id: &str) -> Result<Vec<ProductFeature>, ServiceError>;

    /// Variants of `virtual_product_id` matching the selected features.
    fn find_variants(
        &self,
        virtual_product_id: &str,
        features: &[ProductFeature],
    ) -> Result<Vec<ProductId>, ServiceError>;

    /// Supplier offers that are unexpired as of `as_of`.
    fn get_supplier_products(
        &self,
        product_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<SupplierProduct>, ServiceError>;

    fn get_facility_stock_targets(
        &self,
        product_id: &str,
    ) -> Result<Vec<FacilityStockTarget>, ServiceError>;
}

/// Source of configuration and substitution rules.
pub trait FeatureRuleResolver: Send + Sync {
    /// Rules of `scope` effective at `as_of`, in the order they should be tried.
    fn get_feature_rules(
        &self,
        scope: &RuleScope,
        features: &[ProductFeature],
        as_of: DateTime<Utc>,
    ) -> Result<Vec<ManufacturingRule>, ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait RoutingLookup: Send + Sync {
    fn get_product_routing(
        &self,
        product_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Option<RoutingId>, ServiceError>;

    fn get_routing_lead_time(&self, routing_id: &str) -> Result<Duration, ServiceError>;
}

/// Facility inference for production requests raised from orders or shipments.
#[cfg_attr(test, mockall::automock)]
pub trait FacilityLookup: Send + Sync {
    fn facility_for_order(&self, order_id: &str) -> Result<Option<FacilityId>, ServiceError>;

    fn facility_for_shipment(&self, shipment_id: &str)
        -> Result<Option<FacilityId>, ServiceError>;
}

/// Outbound command interface of the manufacturing order generator.
#[cfg_attr(test, mockall::automock)]
pub trait ProductionRequestSink: Send + Sync {
    fn create_production_request(
        &self,
        request: &NewProductionRequest,
    ) -> Result<Uuid, ServiceError>;
}
