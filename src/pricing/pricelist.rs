use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::decimal::{Money, Rate};
use crate::errors::{RentalError, Result};
use crate::types::TenureUnit;

/// discount applied to a running subtotal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// value is a percentage off (10 = 10%)
    Percent,
    /// value is subtracted as a flat amount
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub kind: DiscountKind,
    pub value: Decimal,
}

impl Discount {
    pub fn percent(value: Decimal) -> Self {
        Self {
            kind: DiscountKind::Percent,
            value,
        }
    }

    pub fn fixed(value: Decimal) -> Self {
        Self {
            kind: DiscountKind::Fixed,
            value,
        }
    }

    pub fn apply(&self, subtotal: Money) -> Money {
        match self.kind {
            DiscountKind::Percent => subtotal * ((Decimal::ONE_HUNDRED - self.value) / Decimal::ONE_HUNDRED),
            DiscountKind::Fixed => subtotal - Money::from_decimal(self.value),
        }
    }
}

/// named table of tenure multipliers plus ordered discounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricelistRule {
    pub name: String,
    pub hourly: Rate,
    pub daily: Rate,
    pub weekly: Rate,
    pub monthly: Rate,
    #[serde(default)]
    pub discounts: Vec<Discount>,
}

impl PricelistRule {
    pub fn standard() -> Self {
        Self {
            name: "standard".to_string(),
            hourly: Rate::from_decimal(dec!(0.08)),
            daily: Rate::from_decimal(dec!(0.5)),
            weekly: Rate::from_decimal(dec!(3.0)),
            monthly: Rate::from_decimal(dec!(10.0)),
            discounts: Vec::new(),
        }
    }

    pub fn premium() -> Self {
        Self {
            name: "premium".to_string(),
            hourly: Rate::from_decimal(dec!(0.1)),
            daily: Rate::from_decimal(dec!(0.6)),
            weekly: Rate::from_decimal(dec!(3.6)),
            monthly: Rate::from_decimal(dec!(12.0)),
            discounts: vec![Discount::percent(dec!(5))],
        }
    }

    /// multiplier of base price for one unit
    pub fn rate_for(&self, unit: TenureUnit) -> Rate {
        match unit {
            TenureUnit::Hour => self.hourly,
            TenureUnit::Day => self.daily,
            TenureUnit::Week => self.weekly,
            TenureUnit::Month => self.monthly,
        }
    }

    /// apply discounts in list order
    pub fn apply_discounts(&self, subtotal: Money) -> Money {
        self.discounts
            .iter()
            .fold(subtotal, |running, discount| discount.apply(running))
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RentalError::validation("pricelist name must not be empty"));
        }
        let rates = [self.hourly, self.daily, self.weekly, self.monthly];
        if rates.iter().any(Rate::is_negative) {
            return Err(RentalError::validation(format!(
                "pricelist {} has a negative rate",
                self.name
            )));
        }
        for discount in &self.discounts {
            if discount.value.is_sign_negative() {
                return Err(RentalError::validation(format!(
                    "pricelist {} has a negative discount",
                    self.name
                )));
            }
            if discount.kind == DiscountKind::Percent && discount.value > Decimal::ONE_HUNDRED {
                return Err(RentalError::validation(format!(
                    "pricelist {} has a percent discount above 100",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// resolves pricelist names, case-insensitively, with a fallback
#[derive(Debug, Clone)]
pub struct PricelistCatalog {
    rules: HashMap<String, PricelistRule>,
    fallback: PricelistRule,
}

impl PricelistCatalog {
    /// catalog with the built-in standard and premium lists
    pub fn new() -> Self {
        let mut catalog = Self {
            rules: HashMap::new(),
            fallback: PricelistRule::standard(),
        };
        catalog.rules.insert("standard".to_string(), PricelistRule::standard());
        catalog.rules.insert("premium".to_string(), PricelistRule::premium());
        catalog
    }

    pub fn insert(&mut self, rule: PricelistRule) -> Result<()> {
        rule.validate()?;
        let key = rule.name.trim().to_ascii_lowercase();
        if key == self.fallback.name.to_ascii_lowercase() {
            self.fallback = rule.clone();
        }
        self.rules.insert(key, rule);
        Ok(())
    }

    /// choose which registered rule unknown names fall back to
    pub fn set_fallback(&mut self, name: &str) -> Result<()> {
        let rule = self
            .rules
            .get(&name.trim().to_ascii_lowercase())
            .ok_or_else(|| RentalError::not_found("pricelist", name))?;
        self.fallback = rule.clone();
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PricelistRule> {
        self.rules.get(&name.trim().to_ascii_lowercase())
    }

    /// resolve a name, falling back for unknown names
    pub fn resolve(&self, name: &str) -> &PricelistRule {
        match self.get(name) {
            Some(rule) => rule,
            None => {
                tracing::debug!(pricelist = name, fallback = %self.fallback.name, "unknown pricelist, using fallback");
                &self.fallback
            }
        }
    }
}

impl Default for PricelistCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discounts_apply_in_order() {
        let mut rule = PricelistRule::standard();
        rule.discounts = vec![Discount::percent(dec!(10)), Discount::fixed(dec!(100))];
        assert_eq!(rule.apply_discounts(Money::from_major(1000)), Money::from_major(800));

        rule.discounts = vec![Discount::fixed(dec!(100)), Discount::percent(dec!(10))];
        assert_eq!(rule.apply_discounts(Money::from_major(1000)), Money::from_major(810));
    }

    #[test]
    fn test_resolve_is_case_insensitive_with_fallback() {
        let catalog = PricelistCatalog::new();
        assert_eq!(catalog.resolve("PREMIUM").name, "premium");
        assert_eq!(catalog.resolve("gold").name, "standard");
    }

    #[test]
    fn test_insert_custom_rule() {
        let mut catalog = PricelistCatalog::new();
        let mut weekend = PricelistRule::standard();
        weekend.name = "Weekend".to_string();
        weekend.daily = Rate::from_decimal(dec!(0.4));
        catalog.insert(weekend).unwrap();

        assert_eq!(catalog.resolve("weekend").daily.as_decimal(), dec!(0.4));
        catalog.set_fallback("weekend").unwrap();
        assert_eq!(catalog.resolve("unknown").name, "Weekend");
        assert!(catalog.set_fallback("nope").is_err());
    }

    #[test]
    fn test_rejects_invalid_rules() {
        let mut catalog = PricelistCatalog::new();
        let mut bad = PricelistRule::standard();
        bad.name = "bad".to_string();
        bad.discounts = vec![Discount::percent(dec!(150))];
        assert!(catalog.insert(bad).is_err());
    }
}
