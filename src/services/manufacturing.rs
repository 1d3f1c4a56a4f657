use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    models::{BomTree, FacilityId, NewProductionRequest, NodeId, RoutingId, SourceOrderRef},
    repositories::{FacilityLookup, ProductionRequestSink, RoutingLookup},
    services::bom::BomService,
};

/// What to build for, and by when.
#[derive(Debug, Clone)]
pub struct ManufacturingOrderRequest {
    /// Falls back to the facility of the source order, then of the shipment,
    /// then to the configured default.
    pub facility_id: Option<FacilityId>,
    /// Completion date of the top-level request.
    pub required_by: DateTime<Utc>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Routing of the top-level request, instead of the product's own.
    pub routing_id: Option<RoutingId>,
    pub source_order: Option<SourceOrderRef>,
    pub shipment_id: Option<String>,
    /// When false, requests are raised for the products that substitutes replaced.
    pub use_substitute: bool,
    pub ignore_supplier_products: bool,
}

impl ManufacturingOrderRequest {
    pub fn new(required_by: DateTime<Utc>) -> Self {
        Self {
            facility_id: None,
            required_by,
            name: None,
            description: None,
            routing_id: None,
            source_order: None,
            shipment_id: None,
            use_substitute: true,
            ignore_supplier_products: false,
        }
    }

    pub fn facility(mut self, facility_id: impl Into<FacilityId>) -> Self {
        self.facility_id = Some(facility_id.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>, description: Option<String>) -> Self {
        self.name = Some(name.into());
        self.description = description;
        self
    }

    pub fn routing(mut self, routing_id: impl Into<RoutingId>) -> Self {
        self.routing_id = Some(routing_id.into());
        self
    }

    pub fn for_order(mut self, source_order: SourceOrderRef) -> Self {
        self.source_order = Some(source_order);
        self
    }

    pub fn for_shipment(mut self, shipment_id: impl Into<String>) -> Self {
        self.shipment_id = Some(shipment_id.into());
        self
    }

    pub fn use_substitute(mut self, use_substitute: bool) -> Self {
        self.use_substitute = use_substitute;
        self
    }

    pub fn ignore_supplier_products(mut self, ignore: bool) -> Self {
        self.ignore_supplier_products = ignore;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManufacturingOrderOutcome {
    /// Request of the top-level node; `None` when that node is not manufactured.
    pub production_request_id: Option<Uuid>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Every request created, components before the assemblies using them.
    pub created: Vec<Uuid>,
}

/// Turns a configured tree into production requests.
#[derive(Clone)]
pub struct ManufacturingOrderService {
    bom: Arc<BomService>,
    routings: Arc<dyn RoutingLookup>,
    facilities: Arc<dyn FacilityLookup>,
    sink: Arc<dyn ProductionRequestSink>,
}

impl ManufacturingOrderService {
    pub fn new(
        bom: Arc<BomService>,
        routings: Arc<dyn RoutingLookup>,
        facilities: Arc<dyn FacilityLookup>,
        sink: Arc<dyn ProductionRequestSink>,
    ) -> Self {
        Self {
            bom,
            routings,
            facilities,
            sink,
        }
    }

    /// Latest start that lets `node_id` finish by `request.required_by`.
    ///
    /// Components must be done when their assembly starts, so the result is
    /// the earliest start found anywhere below the node: the slowest branch
    /// governs. Routing and product choices are those of
    /// [`create_manufacturing_order`](Self::create_manufacturing_order), so
    /// the result equals the start date of its outcome.
    pub fn get_start_date(
        &self,
        tree: &BomTree,
        node_id: NodeId,
        request: &ManufacturingOrderRequest,
    ) -> Result<DateTime<Utc>, ServiceError> {
        self.start_date_below(tree, node_id, request, request.required_by, true)
    }

    fn start_date_below(
        &self,
        tree: &BomTree,
        node_id: NodeId,
        request: &ManufacturingOrderRequest,
        required_by: DateTime<Utc>,
        top_level: bool,
    ) -> Result<DateTime<Utc>, ServiceError> {
        if !self
            .bom
            .is_manufactured(tree, node_id, request.ignore_supplier_products)?
        {
            return Ok(required_by);
        }
        let product_id = requested_product(tree, node_id, request.use_substitute)?;
        let (_, lead_time) =
            self.routing_for(tree, node_id, &product_id, routing_override(request, top_level))?;
        let own_start = start_before(&product_id, required_by, lead_time)?;

        let mut earliest = own_start;
        for child in tree.children(node_id) {
            let child_start = self.start_date_below(tree, *child, request, own_start, false)?;
            earliest = earliest.min(child_start);
        }
        Ok(earliest)
    }

    /// Raises requests for `node_id` and every manufactured position below it.
    ///
    /// Requests already written when a failure occurs are not withdrawn; they
    /// are listed in the returned [`ServiceError::OrderCreation`].
    #[instrument(skip(self, tree, request), fields(required_by = %request.required_by))]
    pub fn create_manufacturing_order(
        &self,
        tree: &BomTree,
        node_id: NodeId,
        request: &ManufacturingOrderRequest,
    ) -> Result<ManufacturingOrderOutcome, ServiceError> {
        let facility_id = self.resolve_facility(request)?;
        let mut created = Vec::new();

        let result = self.create_for_node(
            tree,
            node_id,
            request,
            &facility_id,
            request.required_by,
            true,
            &mut created,
        );
        let top = match result {
            Ok(top) => top,
            Err(e) => {
                counter!("manufacturing.production_requests.failed", 1);
                error!(error = %e, created = created.len(), "Production request creation failed");
                return Err(match e {
                    ServiceError::OrderCreation {
                        product_id,
                        message,
                        ..
                    } => ServiceError::OrderCreation {
                        product_id,
                        message,
                        created,
                    },
                    other if created.is_empty() => other,
                    other => ServiceError::OrderCreation {
                        product_id: tree
                            .node(node_id)
                            .map(|n| n.product_id().to_string())
                            .unwrap_or_default(),
                        message: other.to_string(),
                        created,
                    },
                });
            }
        };

        let (production_request_id, start_date) = match top {
            Some((id, start_date)) => (Some(id), start_date),
            None => (None, request.required_by),
        };
        info!(
            created = created.len(),
            %facility_id,
            %start_date,
            "Manufacturing orders created"
        );
        Ok(ManufacturingOrderOutcome {
            production_request_id,
            start_date,
            end_date: request.required_by,
            created,
        })
    }

    /// Raises the requests of a whole tree. Every position must be configured.
    #[instrument(skip(self, tree, request))]
    pub fn create_manufacturing_orders(
        &self,
        tree: &BomTree,
        request: &ManufacturingOrderRequest,
    ) -> Result<ManufacturingOrderOutcome, ServiceError> {
        let unconfigured = tree.unconfigured_nodes();
        if !unconfigured.is_empty() {
            let products: Vec<&str> = unconfigured
                .iter()
                .filter_map(|id| tree.node(*id))
                .map(|node| node.product_id())
                .collect();
            return Err(ServiceError::InvalidOperation(format!(
                "Tree has unconfigured products: {}",
                products.join(", ")
            )));
        }
        self.create_manufacturing_order(tree, tree.root(), request)
    }

    #[allow(clippy::too_many_arguments)]
    fn create_for_node(
        &self,
        tree: &BomTree,
        node_id: NodeId,
        request: &ManufacturingOrderRequest,
        facility_id: &str,
        required_by: DateTime<Utc>,
        top_level: bool,
        created: &mut Vec<Uuid>,
    ) -> Result<Option<(Uuid, DateTime<Utc>)>, ServiceError> {
        if !self
            .bom
            .is_manufactured(tree, node_id, request.ignore_supplier_products)?
        {
            return Ok(None);
        }
        let node = tree.require(node_id)?;
        let product_id = requested_product(tree, node_id, request.use_substitute)?;
        let (routing_id, lead_time) =
            self.routing_for(tree, node_id, &product_id, routing_override(request, top_level))?;
        let own_start = start_before(&product_id, required_by, lead_time)?;

        let mut predecessor_ids = Vec::new();
        let mut start_date = own_start;
        for child in tree.children(node_id) {
            if let Some((id, child_start)) = self.create_for_node(
                tree,
                *child,
                request,
                facility_id,
                own_start,
                false,
                created,
            )? {
                predecessor_ids.push(id);
                start_date = start_date.min(child_start);
            }
        }

        let new_request = NewProductionRequest {
            product_id: product_id.clone(),
            quantity: node.quantity,
            facility_id: facility_id.to_string(),
            start_date,
            end_date: required_by,
            routing_id,
            name: request.name.clone().filter(|_| top_level),
            description: request.description.clone().filter(|_| top_level),
            source_order: request.source_order.clone().filter(|_| top_level),
            shipment_id: request.shipment_id.clone(),
            predecessor_ids,
        };

        let id = self
            .sink
            .create_production_request(&new_request)
            .map_err(|e| ServiceError::OrderCreation {
                product_id: product_id.clone(),
                message: e.to_string(),
                created: created.clone(),
            })?;
        created.push(id);
        counter!("manufacturing.production_requests.created", 1);
        histogram!(
            "manufacturing.production_requests.quantity",
            node.quantity.to_f64().unwrap_or(0.0)
        );
        info!(%id, %product_id, quantity = %node.quantity, "Production request created");
        Ok(Some((id, start_date)))
    }

    /// Routing used to build `product_id` at `node_id`, and its lead time.
    /// Without any routing the lead time is zero.
    fn routing_for(
        &self,
        tree: &BomTree,
        node_id: NodeId,
        product_id: &str,
        routing_override: Option<&str>,
    ) -> Result<(Option<RoutingId>, Duration), ServiceError> {
        let is_root = tree.require(node_id)?.parent.is_none();
        let routing_id = match routing_override {
            Some(routing_id) => Some(routing_id.to_string()),
            None => match tree.header().routing_id.clone().filter(|_| is_root) {
                Some(routing_id) => Some(routing_id),
                None => self
                    .routings
                    .get_product_routing(product_id, tree.in_date())?,
            },
        };
        let lead_time = match &routing_id {
            Some(routing_id) => self.routings.get_routing_lead_time(routing_id)?,
            None => Duration::zero(),
        };
        Ok((routing_id, lead_time))
    }

    fn resolve_facility(
        &self,
        request: &ManufacturingOrderRequest,
    ) -> Result<FacilityId, ServiceError> {
        if let Some(facility_id) = &request.facility_id {
            return Ok(facility_id.clone());
        }
        if let Some(order) = &request.source_order {
            if let Some(facility_id) = self.facilities.facility_for_order(&order.order_id)? {
                return Ok(facility_id);
            }
        }
        if let Some(shipment_id) = &request.shipment_id {
            if let Some(facility_id) = self.facilities.facility_for_shipment(shipment_id)? {
                return Ok(facility_id);
            }
        }
        self.bom
            .config()
            .default_facility_id
            .clone()
            .ok_or_else(|| {
                ServiceError::InvalidInput("No facility given or derivable for the request".into())
            })
    }
}

/// Product a request is raised for at `node_id`.
///
/// Without substitutes this is the product the position replaced, unless
/// that product is virtual and cannot be built.
fn requested_product(
    tree: &BomTree,
    node_id: NodeId,
    use_substitute: bool,
) -> Result<String, ServiceError> {
    let node = tree.require(node_id)?;
    let original = node
        .substituted_from
        .and_then(|id| tree.node(id))
        .filter(|original| !use_substitute && !original.is_virtual());
    Ok(original.unwrap_or(node).product_id().to_string())
}

fn routing_override(request: &ManufacturingOrderRequest, top_level: bool) -> Option<&str> {
    request.routing_id.as_deref().filter(|_| top_level)
}

fn start_before(
    product_id: &str,
    required_by: DateTime<Utc>,
    lead_time: Duration,
) -> Result<DateTime<Utc>, ServiceError> {
    required_by.checked_sub_signed(lead_time).ok_or_else(|| {
        ServiceError::InvalidInput(format!(
            "Lead time of {} ({} minutes) reaches past the earliest supported date",
            product_id,
            lead_time.num_minutes()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::{AssociationType, Product, ProductAssociation, ProductType};
    use crate::repositories::{
        BomFixture, InMemoryBomRepository, MockFacilityLookup, MockProductionRequestSink,
        MockRoutingLookup,
    };
    use crate::services::bom::BuildTreeRequest;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn required_by() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    /// BIKE x 2 -> FRAME x 1 -> TUBE x 3
    ///          -> WHEEL x 2 -> SPOKE x 32
    fn bike_service() -> Arc<BomService> {
        let fixture = BomFixture {
            products: vec![
                Product::new("BIKE", ProductType::FinishedGood),
                Product::new("FRAME", ProductType::Subassembly),
                Product::new("WHEEL", ProductType::Subassembly),
                Product::new("TUBE", ProductType::RawMaterial),
                Product::new("SPOKE", ProductType::RawMaterial),
            ],
            associations: vec![
                ProductAssociation::new("BIKE", "FRAME", AssociationType::ManufComponent, dec!(1), start()),
                ProductAssociation::new("BIKE", "WHEEL", AssociationType::ManufComponent, dec!(2), start()),
                ProductAssociation::new("FRAME", "TUBE", AssociationType::ManufComponent, dec!(3), start()),
                ProductAssociation::new("WHEEL", "SPOKE", AssociationType::ManufComponent, dec!(32), start()),
            ],
            ..BomFixture::default()
        };
        let repo = Arc::new(InMemoryBomRepository::new(fixture));
        Arc::new(BomService::new(
            repo.clone(),
            repo.clone(),
            repo,
            EngineConfig {
                default_facility_id: Some("DEFAULT".into()),
                ..EngineConfig::default()
            },
        ))
    }

    fn bike_tree(bom: &BomService) -> BomTree {
        bom.build_tree(
            BuildTreeRequest::new("BIKE")
                .as_of(start() + Duration::days(1))
                .quantity(dec!(2)),
        )
        .unwrap()
    }

    /// One day per product, except FRAME which takes five.
    fn routings() -> MockRoutingLookup {
        let mut routings = MockRoutingLookup::new();
        routings
            .expect_get_product_routing()
            .returning(|product_id, _| Ok(Some(format!("R-{}", product_id))));
        routings
            .expect_get_routing_lead_time()
            .returning(|routing_id| {
                Ok(if routing_id == "R-FRAME" {
                    Duration::days(5)
                } else {
                    Duration::days(1)
                })
            });
        routings
    }

    fn recording_sink(store: Arc<Mutex<Vec<NewProductionRequest>>>) -> MockProductionRequestSink {
        let mut sink = MockProductionRequestSink::new();
        sink.expect_create_production_request().returning(move |request| {
            store.lock().unwrap().push(request.clone());
            Ok(Uuid::new_v4())
        });
        sink
    }

    #[test]
    fn slowest_branch_governs_the_start_date() {
        let bom = bike_service();
        let tree = bike_tree(&bom);
        let service = ManufacturingOrderService::new(
            bom,
            Arc::new(routings()),
            Arc::new(MockFacilityLookup::new()),
            Arc::new(MockProductionRequestSink::new()),
        );

        let start_date = service
            .get_start_date(&tree, tree.root(), &ManufacturingOrderRequest::new(required_by()))
            .unwrap();

        assert_eq!(start_date, required_by() - Duration::days(6));
    }

    #[test]
    fn start_date_follows_the_request_routing() {
        let bom = bike_service();
        let tree = bike_tree(&bom);
        let store = Arc::new(Mutex::new(Vec::new()));
        let service = ManufacturingOrderService::new(
            bom,
            Arc::new(routings()),
            Arc::new(MockFacilityLookup::new()),
            Arc::new(recording_sink(store)),
        );
        let request = ManufacturingOrderRequest::new(required_by())
            .facility("PLANT-1")
            .routing("R-FRAME");

        let start_date = service.get_start_date(&tree, tree.root(), &request).unwrap();
        let outcome = service.create_manufacturing_orders(&tree, &request).unwrap();

        // BIKE takes five days on R-FRAME, then FRAME five more.
        assert_eq!(start_date, required_by() - Duration::days(10));
        assert_eq!(outcome.start_date, start_date);
    }

    #[test]
    fn lead_time_past_the_calendar_is_invalid_input() {
        let bom = bike_service();
        let tree = bike_tree(&bom);
        let mut routings = MockRoutingLookup::new();
        routings
            .expect_get_product_routing()
            .returning(|product_id, _| Ok(Some(format!("R-{}", product_id))));
        routings
            .expect_get_routing_lead_time()
            .returning(|routing_id| {
                Ok(if routing_id == "R-FRAME" {
                    Duration::days(100_000_000)
                } else {
                    Duration::days(1)
                })
            });
        let service = ManufacturingOrderService::new(
            bom,
            Arc::new(routings),
            Arc::new(MockFacilityLookup::new()),
            Arc::new(MockProductionRequestSink::new()),
        );
        let request = ManufacturingOrderRequest::new(required_by()).facility("PLANT-1");

        assert_matches!(
            service.get_start_date(&tree, tree.root(), &request),
            Err(ServiceError::InvalidInput(message)) if message.contains("FRAME")
        );
        assert_matches!(
            service.create_manufacturing_orders(&tree, &request),
            Err(ServiceError::InvalidInput(_))
        );
    }

    #[test]
    fn components_are_requested_before_their_assembly() {
        let bom = bike_service();
        let tree = bike_tree(&bom);
        let store = Arc::new(Mutex::new(Vec::new()));
        let service = ManufacturingOrderService::new(
            bom,
            Arc::new(routings()),
            Arc::new(MockFacilityLookup::new()),
            Arc::new(recording_sink(store.clone())),
        );
        let request = ManufacturingOrderRequest::new(required_by())
            .named("Spring batch", None)
            .for_order(SourceOrderRef::new("SO-1"))
            .facility("PLANT-1");

        let outcome = service.create_manufacturing_orders(&tree, &request).unwrap();

        let requests = store.lock().unwrap();
        let products: Vec<&str> = requests.iter().map(|r| r.product_id.as_str()).collect();
        assert_eq!(products, vec!["FRAME", "WHEEL", "BIKE"]);
        assert_eq!(outcome.created.len(), 3);
        assert_eq!(outcome.production_request_id, outcome.created.last().copied());
        assert_eq!(outcome.start_date, required_by() - Duration::days(6));
        assert_eq!(outcome.end_date, required_by());

        let bike = &requests[2];
        assert_eq!(bike.quantity, dec!(2));
        assert_eq!(bike.predecessor_ids, outcome.created[..2].to_vec());
        assert_eq!(bike.name.as_deref(), Some("Spring batch"));
        assert!(bike.source_order.is_some());

        let frame = &requests[0];
        assert_eq!(frame.end_date, required_by() - Duration::days(1));
        assert_eq!(frame.start_date, required_by() - Duration::days(6));
        assert!(frame.name.is_none());
        assert!(frame.source_order.is_none());
        assert!(requests.iter().all(|r| r.facility_id == "PLANT-1"));
    }

    #[test]
    fn facility_is_taken_from_the_source_order() {
        let bom = bike_service();
        let tree = bike_tree(&bom);
        let store = Arc::new(Mutex::new(Vec::new()));
        let mut facilities = MockFacilityLookup::new();
        facilities
            .expect_facility_for_order()
            .returning(|_| Ok(Some("ORDER-PLANT".into())));
        let service = ManufacturingOrderService::new(
            bom,
            Arc::new(routings()),
            Arc::new(facilities),
            Arc::new(recording_sink(store.clone())),
        );
        let request =
            ManufacturingOrderRequest::new(required_by()).for_order(SourceOrderRef::new("SO-9"));

        service.create_manufacturing_orders(&tree, &request).unwrap();

        assert!(store
            .lock()
            .unwrap()
            .iter()
            .all(|r| r.facility_id == "ORDER-PLANT"));
    }

    #[test]
    fn sink_failure_reports_the_requests_already_created() {
        let bom = bike_service();
        let tree = bike_tree(&bom);
        let mut sink = MockProductionRequestSink::new();
        let mut calls = 0;
        sink.expect_create_production_request().returning(move |_| {
            calls += 1;
            if calls == 2 {
                Err(ServiceError::db_error("connection reset"))
            } else {
                Ok(Uuid::new_v4())
            }
        });
        let service = ManufacturingOrderService::new(
            bom,
            Arc::new(routings()),
            Arc::new(MockFacilityLookup::new()),
            Arc::new(sink),
        );

        let err = service
            .create_manufacturing_orders(&tree, &ManufacturingOrderRequest::new(required_by()))
            .unwrap_err();

        assert_matches!(&err, ServiceError::OrderCreation { product_id, .. } if product_id == "WHEEL");
        assert_eq!(err.created_requests().len(), 1);
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_facility_is_invalid_input() {
        let fixture = BomFixture {
            products: vec![Product::new("BIKE", ProductType::FinishedGood)],
            ..BomFixture::default()
        };
        let repo = Arc::new(InMemoryBomRepository::new(fixture));
        let bom = Arc::new(BomService::new(
            repo.clone(),
            repo.clone(),
            repo,
            EngineConfig::default(),
        ));
        let tree = bom.build_tree(BuildTreeRequest::new("BIKE")).unwrap();
        let service = ManufacturingOrderService::new(
            bom,
            Arc::new(MockRoutingLookup::new()),
            Arc::new(MockFacilityLookup::new()),
            Arc::new(MockProductionRequestSink::new()),
        );

        let result =
            service.create_manufacturing_orders(&tree, &ManufacturingOrderRequest::new(required_by()));

        assert_matches!(result, Err(ServiceError::InvalidInput(_)));
    }
}
