use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::decimal::{Money, Rate};
use crate::errors::{RentalError, Result};

/// engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub pricing: PricingConfig,
    pub lifecycle: LifecycleConfig,
    pub sweeper: SweeperConfig,
    pub installments: InstallmentConfig,
    pub events: EventConfig,
}

/// deposit policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub minimum_deposit: Money,
    /// fraction of base price held as deposit
    pub deposit_rate: Rate,
    /// pricelist used when the requested name is unknown
    pub fallback_pricelist: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            minimum_deposit: Money::from_major(500),
            deposit_rate: Rate::from_decimal(dec!(0.10)),
            fallback_pricelist: "standard".to_string(),
        }
    }
}

/// longest grace period a config may carry
pub const MAX_GRACE_PERIOD_DAYS: u32 = 3_650;

/// late returns and extensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub grace_period_days: u32,
    pub late_fee_per_day: Money,
    pub extension_pricing: ExtensionPricing,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_days: 1,
            late_fee_per_day: Money::from_major(100),
            extension_pricing: ExtensionPricing::Repriced,
        }
    }
}

/// how the extra charge for an extension is computed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExtensionPricing {
    /// price the added window with the pricing calculator
    Repriced,
    /// extra days times a fixed fraction of the order total
    DailyRateOfTotal { rate: Rate },
}

impl ExtensionPricing {
    pub fn legacy() -> Self {
        ExtensionPricing::DailyRateOfTotal {
            rate: Rate::from_decimal(dec!(0.06)),
        }
    }
}

/// late-return sweep schedule and notification delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    /// reservations transitioned concurrently within one sweep
    pub concurrency: usize,
    pub notify_timeout_ms: u64,
    pub notify_max_attempts: u32,
    pub notify_initial_backoff_ms: u64,
    pub notify_queue_capacity: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            concurrency: 8,
            notify_timeout_ms: 5_000,
            notify_max_attempts: 3,
            notify_initial_backoff_ms: 500,
            notify_queue_capacity: 1_024,
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    /// backoff before the given retry (1-based), doubling each time
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.notify_initial_backoff_ms.saturating_mul(factor))
    }
}

/// installment plan policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallmentConfig {
    /// days past due after which an unpaid installment defaults the plan
    pub default_after_days: u32,
}

impl Default for InstallmentConfig {
    fn default() -> Self {
        Self {
            default_after_days: 30,
        }
    }
}

/// in-process event buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// events kept until `take_events`, oldest dropped first
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

impl EngineConfig {
    /// parse from json, missing sections take reference values
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| RentalError::validation(format!("invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RentalError::Storage {
            message: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.pricing.minimum_deposit.is_negative() {
            return Err(RentalError::validation("minimum_deposit must not be negative"));
        }
        if self.pricing.deposit_rate.is_negative() {
            return Err(RentalError::validation("deposit_rate must not be negative"));
        }
        if self.lifecycle.grace_period_days > MAX_GRACE_PERIOD_DAYS {
            return Err(RentalError::validation(format!(
                "grace_period_days must be at most {MAX_GRACE_PERIOD_DAYS}"
            )));
        }
        if self.lifecycle.late_fee_per_day.is_negative() {
            return Err(RentalError::validation("late_fee_per_day must not be negative"));
        }
        if let ExtensionPricing::DailyRateOfTotal { rate } = self.lifecycle.extension_pricing {
            if rate.as_decimal() <= Decimal::ZERO {
                return Err(RentalError::validation("extension rate must be positive"));
            }
        }
        if self.sweeper.concurrency == 0 {
            return Err(RentalError::validation("sweeper concurrency must be at least 1"));
        }
        if self.sweeper.notify_max_attempts == 0 {
            return Err(RentalError::validation("notify_max_attempts must be at least 1"));
        }
        if self.sweeper.notify_queue_capacity == 0 {
            return Err(RentalError::validation("notify_queue_capacity must be at least 1"));
        }
        if self.events.capacity == 0 {
            return Err(RentalError::validation("event capacity must be at least 1"));
        }
        Ok(())
    }
}
