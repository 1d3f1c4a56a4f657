use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::product::{has_feature, FeatureId, ProductFeature, ProductId};

/// How the feature condition of a rule combines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleOperator {
    /// Satisfied when any listed feature is selected.
    #[default]
    Or,
    /// Satisfied when every listed feature is selected.
    And,
}

/// Selection/substitution rule for a component position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManufacturingRule {
    pub rule_id: String,
    /// Product the rule set belongs to (the product being configured).
    #[serde(default)]
    pub product_id: Option<ProductId>,
    /// Parent product of the component position.
    #[serde(default)]
    pub product_id_for: Option<ProductId>,
    /// Component the rule applies to.
    pub product_id_in: ProductId,
    /// Replacement component; `None` removes the component from the tree.
    #[serde(default)]
    pub product_id_in_subst: Option<ProductId>,
    #[serde(default)]
    pub features: Vec<FeatureId>,
    #[serde(default)]
    pub rule_operator: RuleOperator,
    /// Quantity multiplier for the replacement, used when positive.
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub priority: i32,
    pub from_date: DateTime<Utc>,
    #[serde(default)]
    pub thru_date: Option<DateTime<Utc>>,
}

impl ManufacturingRule {
    pub fn new(
        rule_id: impl Into<String>,
        product_id_in: impl Into<ProductId>,
        from_date: DateTime<Utc>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            product_id: None,
            product_id_for: None,
            product_id_in: product_id_in.into(),
            product_id_in_subst: None,
            features: Vec::new(),
            rule_operator: RuleOperator::Or,
            quantity: None,
            priority: 0,
            from_date,
            thru_date: None,
        }
    }

    pub fn for_product(mut self, product_id: impl Into<ProductId>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn for_parent(mut self, product_id_for: impl Into<ProductId>) -> Self {
        self.product_id_for = Some(product_id_for.into());
        self
    }

    pub fn substitute_with(mut self, product_id: impl Into<ProductId>) -> Self {
        self.product_id_in_subst = Some(product_id.into());
        self
    }

    pub fn when_features<I, S>(mut self, operator: RuleOperator, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<FeatureId>,
    {
        self.rule_operator = operator;
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_effective(&self, at: DateTime<Utc>) -> bool {
        self.from_date <= at && self.thru_date.map_or(true, |thru| at < thru)
    }

    /// An empty condition is always satisfied.
    pub fn is_satisfied_by(&self, selected: &[ProductFeature]) -> bool {
        if self.features.is_empty() {
            return true;
        }
        match self.rule_operator {
            RuleOperator::Or => self.features.iter().any(|f| has_feature(selected, f)),
            RuleOperator::And => self.features.iter().all(|f| has_feature(selected, f)),
        }
    }

    /// Positive rule quantity, if any, to use as the replacement's multiplier.
    pub fn multiplier_override(&self) -> Option<Decimal> {
        self.quantity.filter(|q| *q > Decimal::ZERO)
    }

    pub fn discards_component(&self) -> bool {
        self.product_id_in_subst
            .as_deref()
            .map_or(true, |subst| subst.trim().is_empty())
    }
}

/// Which rule set a configurator is asking for, from most to least specific.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleScope {
    /// Rules of the product being configured for this parent/component pair.
    Specific {
        product_for_rules: ProductId,
        product_id_for: ProductId,
        product_id_in: ProductId,
    },
    /// Rules for the parent/component link regardless of the configured product.
    Link {
        product_id_for: ProductId,
        product_id_in: ProductId,
    },
    /// Rules for the component wherever it appears.
    Node { product_id_in: ProductId },
}

impl RuleScope {
    /// Whether `rule` belongs to this scope.
    pub fn contains(&self, rule: &ManufacturingRule) -> bool {
        match self {
            Self::Specific {
                product_for_rules,
                product_id_for,
                product_id_in,
            } => {
                rule.product_id.as_deref() == Some(product_for_rules.as_str())
                    && rule.product_id_for.as_deref() == Some(product_id_for.as_str())
                    && rule.product_id_in == *product_id_in
            }
            Self::Link {
                product_id_for,
                product_id_in,
            } => {
                rule.product_id_for.as_deref() == Some(product_id_for.as_str())
                    && rule.product_id_in == *product_id_in
            }
            Self::Node { product_id_in } => rule.product_id_in == *product_id_in,
        }
    }
}
