//! Production requests raised from furniture trees through the in-memory repository.

mod common;

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{furniture_catalog, TestBom};
use rust_decimal_macros::dec;
use stateset_bom::{
    config::EngineConfig,
    errors::ServiceError,
    models::{ProductionRequest, SourceOrderRef, SupplierProduct},
    services::ManufacturingOrderRequest,
};

fn required_by() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

fn by_product<'a>(requests: &'a [ProductionRequest], product_id: &str) -> &'a ProductionRequest {
    requests
        .iter()
        .find(|created| created.request.product_id == product_id)
        .unwrap_or_else(|| panic!("no request for {}", product_id))
}

#[test]
fn every_manufactured_position_gets_a_request() {
    let harness = TestBom::new();
    let tree = harness.tree("CHAIR", dec!(2), &["OAK"]);
    let request =
        ManufacturingOrderRequest::new(required_by()).for_order(SourceOrderRef::new("SO-100"));

    let outcome = harness
        .orders()
        .create_manufacturing_orders(&tree, &request)
        .unwrap();

    let requests = harness.repository.production_requests();
    let products: Vec<&str> = requests
        .iter()
        .map(|created| created.request.product_id.as_str())
        .collect();
    assert_eq!(products, vec!["SEAT", "LEG-OAK", "FRAME-KIT", "CHAIR"]);
    assert_eq!(outcome.created.len(), 4);
    assert_eq!(outcome.production_request_id, Some(requests[3].id));
    assert!(requests.iter().all(|created| created.request.facility_id == "EAST"));

    let chair = &requests[3].request;
    assert_eq!(chair.quantity, dec!(2));
    assert_eq!(chair.routing_id.as_deref(), Some("R-CHAIR"));
    assert_eq!(chair.predecessor_ids, outcome.created[..3].to_vec());
    assert_eq!(chair.source_order.as_ref().map(|o| o.order_id.as_str()), Some("SO-100"));
    assert_eq!(chair.end_date, required_by());
    assert_eq!(chair.start_date, required_by() - Duration::days(5));
}

#[test]
fn components_finish_when_their_assembly_starts() {
    let harness = TestBom::new();
    let tree = harness.tree("CHAIR", dec!(2), &["OAK"]);
    let request = ManufacturingOrderRequest::new(required_by()).facility("WEST");

    let outcome = harness
        .orders()
        .create_manufacturing_orders(&tree, &request)
        .unwrap();

    let requests = harness.repository.production_requests();
    let assembly_start = required_by() - Duration::days(2);
    let seat = &by_product(&requests, "SEAT").request;
    assert_eq!(seat.end_date, assembly_start);
    assert_eq!(seat.start_date, assembly_start - Duration::days(1));
    assert_eq!(seat.quantity, dec!(2));
    assert!(seat.source_order.is_none());

    let legs = &by_product(&requests, "LEG-OAK").request;
    assert_eq!(legs.quantity, dec!(8));
    assert_eq!(legs.start_date, assembly_start - Duration::days(3));

    let frame = &by_product(&requests, "FRAME-KIT").request;
    assert_eq!(frame.start_date, assembly_start - Duration::hours(12));

    // Legs are the slowest branch.
    assert_eq!(outcome.start_date, legs.start_date);
    assert_eq!(outcome.end_date, required_by());
    assert!(requests.iter().all(|created| created.request.facility_id == "WEST"));
}

#[test]
fn request_routing_overrides_the_top_level_routing() {
    let harness = TestBom::new();
    let tree = harness.tree("CHAIR", dec!(1), &["OAK"]);
    let request = ManufacturingOrderRequest::new(required_by())
        .facility("WEST")
        .routing("R-FRAME");

    let outcome = harness
        .orders()
        .create_manufacturing_orders(&tree, &request)
        .unwrap();

    let requests = harness.repository.production_requests();
    let chair = &by_product(&requests, "CHAIR").request;
    assert_eq!(chair.routing_id.as_deref(), Some("R-FRAME"));
    let seat = &by_product(&requests, "SEAT").request;
    assert_eq!(seat.end_date, required_by() - Duration::hours(12));
    assert_eq!(seat.routing_id.as_deref(), Some("R-SEAT"));
    assert_eq!(
        outcome.start_date,
        required_by() - Duration::hours(12) - Duration::days(3)
    );
}

#[test]
fn supplied_components_are_bought_unless_ignored() {
    let mut fixture = furniture_catalog();
    fixture
        .supplier_products
        .push(SupplierProduct::new("SEAT", "UPHOLSTERY-CO", common::start()));
    let harness = TestBom::with(fixture, EngineConfig::default());
    let tree = harness.tree("CHAIR", dec!(1), &["OAK"]);

    harness
        .orders()
        .create_manufacturing_orders(&tree, &ManufacturingOrderRequest::new(required_by()).facility("WEST"))
        .unwrap();
    let bought = harness.repository.production_requests();
    assert!(bought.iter().all(|created| created.request.product_id != "SEAT"));
    assert_eq!(bought.len(), 3);

    let harness = TestBom::with(harness.repository.fixture().clone(), EngineConfig::default());
    harness
        .orders()
        .create_manufacturing_orders(
            &tree,
            &ManufacturingOrderRequest::new(required_by())
                .facility("WEST")
                .ignore_supplier_products(true),
        )
        .unwrap();
    assert_eq!(harness.repository.production_requests().len(), 4);
}

#[test]
fn originals_are_requested_when_substitutes_are_not_used() {
    let harness = TestBom::new();
    let tree = harness.tree("CHAIR-KIT", dec!(1), &["OAK"]);
    let request = ManufacturingOrderRequest::new(required_by())
        .facility("WEST")
        .use_substitute(false);

    harness
        .orders()
        .create_manufacturing_orders(&tree, &request)
        .unwrap();

    let products: Vec<String> = harness
        .repository
        .production_requests()
        .into_iter()
        .map(|created| created.request.product_id)
        .collect();
    // LEG is virtual and cannot be built, so its resolved variant is kept.
    assert_eq!(products, vec!["SEAT", "LEG-OAK", "FRAME-KIT", "CHAIR-KIT"]);
}

#[test]
fn start_date_matches_the_created_requests() {
    let harness = TestBom::new();
    let tree = harness.tree("CHAIR", dec!(1), &["OAK"]);
    let request = ManufacturingOrderRequest::new(required_by())
        .facility("WEST")
        .routing("R-FRAME");

    let planned = harness
        .orders()
        .get_start_date(&tree, tree.root(), &request)
        .unwrap();
    let outcome = harness
        .orders()
        .create_manufacturing_orders(&tree, &request)
        .unwrap();

    assert_eq!(planned, outcome.start_date);
    assert_eq!(planned, required_by() - Duration::hours(12) - Duration::days(3));
}

#[test]
fn unconfigured_trees_are_refused() {
    let harness = TestBom::new();
    let tree = harness.tree("CHAIR", dec!(1), &[]);

    let result = harness
        .orders()
        .create_manufacturing_orders(&tree, &ManufacturingOrderRequest::new(required_by()).facility("WEST"));

    assert_matches!(result, Err(ServiceError::InvalidOperation(message)) if message.contains("LEG"));
    assert!(harness.repository.production_requests().is_empty());
}

#[test]
fn default_facility_applies_when_nothing_else_names_one() {
    let config = EngineConfig {
        default_facility_id: Some("CENTRAL".into()),
        ..EngineConfig::default()
    };
    let harness = TestBom::with(furniture_catalog(), config);
    let tree = harness.tree("CHAIR", dec!(1), &["PINE"]);

    harness
        .orders()
        .create_manufacturing_orders(
            &tree,
            &ManufacturingOrderRequest::new(required_by()).for_shipment("SH-UNKNOWN"),
        )
        .unwrap();

    let requests = harness.repository.production_requests();
    assert!(requests.iter().all(|created| created.request.facility_id == "CENTRAL"));
    assert!(requests
        .iter()
        .all(|created| created.request.shipment_id.as_deref() == Some("SH-UNKNOWN")));
}

#[test]
fn purchased_leaf_yields_no_request() {
    let harness = TestBom::new();
    let tree = harness.tree("SCREW", dec!(10), &[]);

    let outcome = harness
        .orders()
        .create_manufacturing_orders(&tree, &ManufacturingOrderRequest::new(required_by()).facility("WEST"))
        .unwrap();

    assert!(outcome.production_request_id.is_none());
    assert!(outcome.created.is_empty());
    assert_eq!(outcome.start_date, required_by());
}
