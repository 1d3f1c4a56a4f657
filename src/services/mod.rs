// Tree construction and classification
pub mod bom;
pub mod configurator;
pub mod substitution;

// Read-only walks over built trees
pub mod manufacturing;
pub mod quantity_aggregator;

pub use bom::{BomService, BuildTreeRequest, ConfigurationReport};
pub use configurator::{Configured, Configurator, RuleMatchPolicy};
pub use manufacturing::{
    ManufacturingOrderOutcome, ManufacturingOrderRequest, ManufacturingOrderService,
};
pub use quantity_aggregator::{AggregatedComponent, BreakdownLine, QuantityMap};
pub use substitution::{SubstitutionOutcome, SubstitutionRejection};
