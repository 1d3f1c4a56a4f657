use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::product::{FacilityId, ProductId};
use super::routing::RoutingId;

/// Sales order line a production request fulfils.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOrderRef {
    pub order_id: String,
    #[serde(default)]
    pub order_item_seq_id: Option<String>,
    #[serde(default)]
    pub ship_group_seq_id: Option<String>,
}

impl SourceOrderRef {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            order_item_seq_id: None,
            ship_group_seq_id: None,
        }
    }
}

/// Command sent to the production system for one manufactured tree position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewProductionRequest {
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub facility_id: FacilityId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub routing_id: Option<RoutingId>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub source_order: Option<SourceOrderRef>,
    pub shipment_id: Option<String>,
    /// Requests that must complete before this one can start.
    pub predecessor_ids: Vec<Uuid>,
}

/// A production request as recorded by a sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductionRequest {
    pub id: Uuid,
    #[serde(flatten)]
    pub request: NewProductionRequest,
}
