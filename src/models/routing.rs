use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::product::ProductId;
use crate::errors::ServiceError;

pub type RoutingId = String;

/// A manufacturing routing and the lead time needed to run it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Routing {
    pub routing_id: RoutingId,
    #[serde(default)]
    pub name: Option<String>,
    pub lead_time_minutes: i64,
}

impl Routing {
    pub fn new(routing_id: impl Into<RoutingId>, lead_time: Duration) -> Self {
        Self {
            routing_id: routing_id.into(),
            name: None,
            lead_time_minutes: lead_time.num_minutes(),
        }
    }

    pub fn lead_time(&self) -> Result<Duration, ServiceError> {
        let max_minutes = Duration::max_value().num_minutes();
        if !(-max_minutes..=max_minutes).contains(&self.lead_time_minutes) {
            return Err(ServiceError::InvalidInput(format!(
                "Lead time of routing {} is out of range: {} minutes",
                self.routing_id, self.lead_time_minutes
            )));
        }
        Ok(Duration::minutes(self.lead_time_minutes))
    }
}

/// Default routing used to build a product during an effective window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductRouting {
    pub product_id: ProductId,
    pub routing_id: RoutingId,
    pub from_date: DateTime<Utc>,
    #[serde(default)]
    pub thru_date: Option<DateTime<Utc>>,
}

impl ProductRouting {
    pub fn is_effective(&self, at: DateTime<Utc>) -> bool {
        self.from_date <= at && self.thru_date.map_or(true, |thru| at < thru)
    }
}
