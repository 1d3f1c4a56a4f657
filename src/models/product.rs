use serde::{Deserialize, Serialize};

pub type ProductId = String;
pub type FeatureId = String;
pub type FacilityId = String;

/// Classification of a product as it matters to the BOM engine.
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
pub enum ProductType {
    FinishedGood,
    /// Work in progress: an intermediate assembly that is never stocked.
    Wip,
    Subassembly,
    RawMaterial,
    Good,
}

/// Product snapshot carried by a tree node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    #[serde(default)]
    pub name: Option<String>,
    pub product_type: ProductType,
    /// A virtual product needs feature selection before a concrete variant is known.
    #[serde(default)]
    pub is_virtual: bool,
}

impl Product {
    pub fn new(product_id: impl Into<ProductId>, product_type: ProductType) -> Self {
        Self {
            product_id: product_id.into(),
            name: None,
            product_type,
            is_virtual: false,
        }
    }

    pub fn virtual_product(product_id: impl Into<ProductId>, product_type: ProductType) -> Self {
        Self {
            is_virtual: true,
            ..Self::new(product_id, product_type)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_wip(&self) -> bool {
        self.product_type == ProductType::Wip
    }
}

/// A selectable product feature (colour, size, voltage, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductFeature {
    pub feature_id: FeatureId,
    #[serde(default)]
    pub feature_type_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ProductFeature {
    pub fn new(feature_id: impl Into<FeatureId>) -> Self {
        Self {
            feature_id: feature_id.into(),
            feature_type_id: None,
            description: None,
        }
    }

    pub fn of_type(mut self, feature_type_id: impl Into<String>) -> Self {
        self.feature_type_id = Some(feature_type_id.into());
        self
    }
}

/// Returns true when `features` selects the feature with the given id.
pub fn has_feature(features: &[ProductFeature], feature_id: &str) -> bool {
    features.iter().any(|f| f.feature_id == feature_id)
}
