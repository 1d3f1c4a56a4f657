// Collaborator records
pub mod facility_stock_target;
pub mod manufacturing_rule;
pub mod product;
pub mod product_association;
pub mod production_request;
pub mod routing;
pub mod supplier_product;

// Tree structures
pub mod bom_node;
pub mod bom_tree;

pub use bom_node::{BomNode, NodeId};
pub use bom_tree::{BomTree, BomTreeHeader, ExpansionType};
pub use facility_stock_target::FacilityStockTarget;
pub use manufacturing_rule::{ManufacturingRule, RuleOperator, RuleScope};
pub use product::{FacilityId, FeatureId, Product, ProductFeature, ProductId, ProductType};
pub use product_association::{AssociationType, ProductAssociation};
pub use production_request::{NewProductionRequest, ProductionRequest, SourceOrderRef};
pub use routing::{ProductRouting, Routing, RoutingId};
pub use supplier_product::SupplierProduct;
