#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use stateset_bom::{
    config::EngineConfig,
    models::{
        AssociationType, BomTree, FacilityStockTarget, ManufacturingRule, Product,
        ProductAssociation, ProductFeature, ProductRouting, ProductType, Routing, RuleOperator,
        SupplierProduct,
    },
    repositories::{BomFixture, InMemoryBomRepository, ProductVariant},
    services::{BomService, BuildTreeRequest, ManufacturingOrderService},
};

/// Date every fixture record becomes effective.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// As-of date used by the harness.
pub fn as_of() -> DateTime<Utc> {
    start() + Duration::days(30)
}

pub fn features(ids: &[&str]) -> Vec<ProductFeature> {
    ids.iter().map(|id| ProductFeature::new(*id)).collect()
}

fn component(parent: &str, child: &str, quantity: Decimal, sequence: i32) -> ProductAssociation {
    ProductAssociation::new(parent, child, AssociationType::ManufComponent, quantity, start())
        .with_sequence(sequence)
}

/// Furniture catalog shared by the integration tests.
///
/// ```text
/// CHAIR
///   SEAT x 1          -> FABRIC x 2, FOAM x 1, SCREW x 4
///   LEG (virtual) x 4 -> LEG-OAK | LEG-PINE -> *-PLANK x 0.5
///   FRAME-KIT x 1 WIP -> SCREW x 8
/// CHAIR-KIT is manufactured as CHAIR.
/// TABLE-OAK is a variant of TABLE and has no BOM of its own.
/// ```
pub fn furniture_catalog() -> BomFixture {
    let products = vec![
        Product::new("CHAIR", ProductType::FinishedGood).with_name("Dining chair"),
        Product::new("CHAIR-KIT", ProductType::FinishedGood),
        Product::new("SEAT", ProductType::Subassembly),
        Product::virtual_product("LEG", ProductType::Subassembly),
        Product::new("LEG-OAK", ProductType::Subassembly),
        Product::new("LEG-PINE", ProductType::Subassembly),
        Product::new("FRAME-KIT", ProductType::Wip),
        Product::new("FABRIC", ProductType::RawMaterial),
        Product::new("FOAM", ProductType::RawMaterial),
        Product::new("MEMORY-FOAM", ProductType::RawMaterial),
        Product::new("SCREW", ProductType::RawMaterial),
        Product::new("OAK-PLANK", ProductType::RawMaterial),
        Product::new("PINE-PLANK", ProductType::RawMaterial),
        Product::virtual_product("TABLE", ProductType::FinishedGood),
        Product::new("TABLE-OAK", ProductType::FinishedGood),
        Product::new("TOP", ProductType::RawMaterial),
    ];

    let associations = vec![
        component("CHAIR", "SEAT", dec!(1), 1),
        component("CHAIR", "LEG", dec!(4), 2),
        component("CHAIR", "FRAME-KIT", dec!(1), 3),
        component("SEAT", "FABRIC", dec!(2), 0),
        component("SEAT", "FOAM", dec!(1), 0),
        component("SEAT", "SCREW", dec!(4), 0),
        component("LEG-OAK", "OAK-PLANK", dec!(0.5), 0).with_scrap_percent(dec!(10)),
        component("LEG-PINE", "PINE-PLANK", dec!(0.5), 0),
        component("FRAME-KIT", "SCREW", dec!(8), 0),
        component("TABLE", "TOP", dec!(1), 1),
        component("TABLE", "LEG", dec!(4), 2),
        ProductAssociation::new(
            "CHAIR-KIT",
            "CHAIR",
            AssociationType::ProductManufactured,
            dec!(1),
            start(),
        ),
    ];

    let rules = vec![
        ManufacturingRule::new("CHAIR-LEG-OAK", "LEG", start())
            .for_product("CHAIR")
            .for_parent("CHAIR")
            .substitute_with("LEG-OAK")
            .when_features(RuleOperator::Or, ["OAK"]),
        ManufacturingRule::new("LEG-PINE", "LEG", start())
            .for_parent("CHAIR")
            .substitute_with("LEG-PINE")
            .when_features(RuleOperator::Or, ["PINE"]),
        ManufacturingRule::new("TABLE-LEG-OAK", "LEG", start())
            .for_product("TABLE")
            .for_parent("TABLE")
            .substitute_with("LEG-OAK")
            .when_features(RuleOperator::Or, ["OAK"]),
        ManufacturingRule::new("FOAM-COMFORT", "FOAM", start())
            .substitute_with("MEMORY-FOAM")
            .when_features(RuleOperator::Or, ["COMFORT"]),
    ];

    let mut fixture = BomFixture {
        products,
        associations,
        rules,
        variants: vec![ProductVariant {
            virtual_product_id: "TABLE".into(),
            variant_product_id: "TABLE-OAK".into(),
            features: vec!["OAK".into()],
        }],
        supplier_products: vec![SupplierProduct::new("SCREW", "FASTENAL", start())],
        stock_targets: vec![FacilityStockTarget::new("SEAT", "MAIN", dec!(5))],
        routings: vec![
            Routing::new("R-CHAIR", Duration::days(2)),
            Routing::new("R-SEAT", Duration::days(1)),
            Routing::new("R-LEG", Duration::days(3)),
            Routing::new("R-FRAME", Duration::hours(12)),
        ],
        product_routings: [
            ("CHAIR", "R-CHAIR"),
            ("SEAT", "R-SEAT"),
            ("LEG-OAK", "R-LEG"),
            ("LEG-PINE", "R-LEG"),
            ("FRAME-KIT", "R-FRAME"),
        ]
        .iter()
        .map(|(product_id, routing_id)| ProductRouting {
            product_id: product_id.to_string(),
            routing_id: routing_id.to_string(),
            from_date: start(),
            thru_date: None,
        })
        .collect(),
        ..BomFixture::default()
    };
    fixture
        .standard_features
        .insert("TABLE-OAK".into(), features(&["OAK"]));
    fixture
        .order_facilities
        .insert("SO-100".into(), "EAST".into());
    fixture
}

/// Engine wired to an in-memory copy of [`furniture_catalog`].
pub struct TestBom {
    pub repository: Arc<InMemoryBomRepository>,
    pub bom: Arc<BomService>,
}

impl TestBom {
    pub fn new() -> Self {
        Self::with(furniture_catalog(), EngineConfig::default())
    }

    pub fn with(fixture: BomFixture, config: EngineConfig) -> Self {
        let repository = Arc::new(InMemoryBomRepository::new(fixture));
        let bom = Arc::new(BomService::new(
            repository.clone(),
            repository.clone(),
            repository.clone(),
            config,
        ));
        Self { repository, bom }
    }

    pub fn request(&self, product_id: &str, quantity: Decimal, selected: &[&str]) -> BuildTreeRequest {
        BuildTreeRequest::new(product_id)
            .as_of(as_of())
            .quantity(quantity)
            .features(features(selected))
    }

    pub fn tree(&self, product_id: &str, quantity: Decimal, selected: &[&str]) -> BomTree {
        self.bom
            .build_tree(self.request(product_id, quantity, selected))
            .expect("tree should build")
    }

    pub fn orders(&self) -> ManufacturingOrderService {
        ManufacturingOrderService::new(
            self.bom.clone(),
            self.repository.clone(),
            self.repository.clone(),
            self.repository.clone(),
        )
    }
}
