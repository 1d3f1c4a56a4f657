use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::product::{FacilityId, ProductId};

/// Stocking policy of a product at a facility.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FacilityStockTarget {
    pub product_id: ProductId,
    pub facility_id: FacilityId,
    #[serde(default)]
    pub minimum_stock: Option<Decimal>,
    #[serde(default)]
    pub reorder_quantity: Option<Decimal>,
}

impl FacilityStockTarget {
    pub fn new(
        product_id: impl Into<ProductId>,
        facility_id: impl Into<FacilityId>,
        minimum_stock: Decimal,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            facility_id: facility_id.into(),
            minimum_stock: Some(minimum_stock),
            reorder_quantity: None,
        }
    }

    /// Only a positive minimum stock keeps the product warehouse managed.
    pub fn is_active(&self) -> bool {
        self.minimum_stock.map_or(false, |min| min > Decimal::ZERO)
    }
}
