use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::product::ProductId;
use super::routing::RoutingId;

/// Kind of product-to-product association.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AssociationType {
    /// Manufacturing bill of materials
    ManufComponent,
    /// Engineering bill of materials
    EngineerComponent,
    /// The product is built as another product
    ProductManufactured,
    /// Links a virtual product to one of its variants
    ProductVariant,
}

/// One effective-dated component line: `product_id` uses `quantity` of `product_id_to`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductAssociation {
    pub product_id: ProductId,
    pub product_id_to: ProductId,
    pub association_type: AssociationType,
    pub quantity: Decimal,
    /// Expected loss as a percentage; negative values are salvage.
    #[serde(default)]
    pub scrap_percent: Option<Decimal>,
    #[serde(default)]
    pub sequence_num: i32,
    pub from_date: DateTime<Utc>,
    #[serde(default)]
    pub thru_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub routing_override: Option<RoutingId>,
}

impl ProductAssociation {
    pub fn new(
        product_id: impl Into<ProductId>,
        product_id_to: impl Into<ProductId>,
        association_type: AssociationType,
        quantity: Decimal,
        from_date: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_id_to: product_id_to.into(),
            association_type,
            quantity,
            scrap_percent: None,
            sequence_num: 0,
            from_date,
            thru_date: None,
            routing_override: None,
        }
    }

    pub fn with_scrap_percent(mut self, percent: Decimal) -> Self {
        self.scrap_percent = Some(percent);
        self
    }

    pub fn with_sequence(mut self, sequence_num: i32) -> Self {
        self.sequence_num = sequence_num;
        self
    }

    pub fn with_thru_date(mut self, thru_date: DateTime<Utc>) -> Self {
        self.thru_date = Some(thru_date);
        self
    }

    pub fn with_routing_override(mut self, routing_id: impl Into<RoutingId>) -> Self {
        self.routing_override = Some(routing_id.into());
        self
    }

    /// `thru_date` is exclusive.
    pub fn is_effective(&self, at: DateTime<Utc>) -> bool {
        self.from_date <= at && self.thru_date.map_or(true, |thru| at < thru)
    }

    /// Multiplier derived from `scrap_percent`: `1 + pct / 100`.
    ///
    /// Percentages outside the open interval (-100, 100) are ignored.
    pub fn scrap_factor(&self) -> Decimal {
        match self.scrap_percent {
            None => Decimal::ONE,
            Some(pct) if pct > -Decimal::ONE_HUNDRED && pct < Decimal::ONE_HUNDRED => {
                Decimal::ONE + pct / Decimal::ONE_HUNDRED
            }
            Some(pct) => {
                warn!(
                    product_id = %self.product_id,
                    component = %self.product_id_to,
                    "A scrap factor of {} was ignored",
                    pct
                );
                Decimal::ONE
            }
        }
    }
}
