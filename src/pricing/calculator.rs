use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PricingConfig;
use crate::decimal::Money;
use crate::pricing::pricelist::PricelistCatalog;
use crate::types::{Product, TenureUnit};

/// price and deposit for one unit of a product over a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: Money,
    pub deposit: Money,
    /// billed units, at least one
    pub units: u32,
    pub unit_rate: Money,
    /// before pricelist discounts
    pub subtotal: Money,
    /// pricelist actually used after fallback
    pub pricelist: String,
}

/// computes rental price and deposit
#[derive(Debug, Clone)]
pub struct PricingCalculator {
    pub catalog: PricelistCatalog,
    pub config: PricingConfig,
}

impl PricingCalculator {
    pub fn new(catalog: PricelistCatalog, config: PricingConfig) -> Self {
        Self { catalog, config }
    }

    /// billed units between start and end; never less than one
    pub fn billable_units(
        tenure_unit: TenureUnit,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> u32 {
        let units = tenure_unit.whole_units_between(start_at, end_at);
        if units <= 0 {
            1
        } else {
            u32::try_from(units).unwrap_or(u32::MAX)
        }
    }

    /// price a product for a tenure and window under a named pricelist
    pub fn calculate_price(
        &self,
        product: &Product,
        tenure_unit: TenureUnit,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        pricelist_name: &str,
    ) -> PriceQuote {
        let rule = self.resolve(pricelist_name);
        let units = Self::billable_units(tenure_unit, start_at, end_at);

        let unit_rate = product.base_price.apply_rate(rule.rate_for(tenure_unit));
        let subtotal = unit_rate.times(units);
        let price = rule
            .apply_discounts(subtotal)
            .clamp_non_negative()
            .round_whole();

        tracing::debug!(
            product_id = %product.id,
            tenure = %tenure_unit,
            units,
            %unit_rate,
            %subtotal,
            %price,
            pricelist = %rule.name,
            "priced rental"
        );

        PriceQuote {
            price,
            deposit: self.deposit_for(product),
            units,
            unit_rate,
            subtotal,
            pricelist: rule.name.clone(),
        }
    }

    /// price with a free-form tenure string; unknown tenure prices at zero
    pub fn calculate_price_lenient(
        &self,
        product: &Product,
        tenure_unit: &str,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        pricelist_name: &str,
    ) -> PriceQuote {
        match tenure_unit.parse::<TenureUnit>() {
            Ok(unit) => self.calculate_price(product, unit, start_at, end_at, pricelist_name),
            Err(_) => {
                tracing::warn!(tenure = tenure_unit, product_id = %product.id, "unknown tenure unit, pricing at zero");
                PriceQuote {
                    price: Money::ZERO,
                    deposit: self.deposit_for(product),
                    units: 0,
                    unit_rate: Money::ZERO,
                    subtotal: Money::ZERO,
                    pricelist: self.resolve(pricelist_name).name.clone(),
                }
            }
        }
    }

    /// deposit is independent of duration
    pub fn deposit_for(&self, product: &Product) -> Money {
        product
            .base_price
            .apply_rate(self.config.deposit_rate)
            .max(self.config.minimum_deposit)
            .round_whole()
    }

    fn resolve(&self, pricelist_name: &str) -> &crate::pricing::PricelistRule {
        match self.catalog.get(pricelist_name) {
            Some(rule) => rule,
            None => self
                .catalog
                .get(&self.config.fallback_pricelist)
                .unwrap_or_else(|| self.catalog.resolve(pricelist_name)),
        }
    }
}

impl Default for PricingCalculator {
    fn default() -> Self {
        Self::new(PricelistCatalog::new(), PricingConfig::default())
    }
}
