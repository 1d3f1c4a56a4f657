use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::product::ProductId;

/// A supplier offering for a product; its presence marks the product as purchasable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplierProduct {
    pub product_id: ProductId,
    pub supplier_id: String,
    pub available_from: DateTime<Utc>,
    #[serde(default)]
    pub available_thru: Option<DateTime<Utc>>,
    #[serde(default)]
    pub minimum_order_quantity: Option<Decimal>,
    #[serde(default)]
    pub last_price: Option<Decimal>,
}

impl SupplierProduct {
    pub fn new(
        product_id: impl Into<ProductId>,
        supplier_id: impl Into<String>,
        available_from: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            supplier_id: supplier_id.into(),
            available_from,
            available_thru: None,
            minimum_order_quantity: None,
            last_price: None,
        }
    }

    pub fn with_available_thru(mut self, thru: DateTime<Utc>) -> Self {
        self.available_thru = Some(thru);
        self
    }

    /// Unexpired as of `at`.
    pub fn is_available(&self, at: DateTime<Utc>) -> bool {
        self.available_from <= at && self.available_thru.map_or(true, |thru| at < thru)
    }
}
