use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LifecycleConfig;
use crate::decimal::Money;
use crate::errors::{RentalError, Result};

/// late fee policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LateFeePolicy {
    pub grace_period_days: u32,
    pub fee_per_day: Money,
}

impl From<&LifecycleConfig> for LateFeePolicy {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            grace_period_days: config.grace_period_days,
            fee_per_day: config.late_fee_per_day,
        }
    }
}

/// late fee calculation result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LateFeeCalculation {
    pub fee: Money,
    pub days_late: u32,
    pub whole_days_overdue: i64,
    pub grace_applied: bool,
}

impl LateFeePolicy {
    pub fn grace_ends_at(&self, end_at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        end_at
            .checked_add_signed(Duration::days(i64::from(self.grace_period_days)))
            .ok_or_else(|| {
                RentalError::validation(format!(
                    "grace period of {} days past {end_at} is out of range",
                    self.grace_period_days
                ))
            })
    }

    /// strictly past end plus grace
    pub fn is_overdue(&self, end_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
        Ok(now > self.grace_ends_at(end_at)?)
    }

    /// whole days past end, minus grace, clamped at zero
    pub fn calculate(&self, end_at: DateTime<Utc>, now: DateTime<Utc>) -> LateFeeCalculation {
        let whole_days_overdue = (now - end_at).num_days();
        let chargeable = whole_days_overdue - i64::from(self.grace_period_days);

        if chargeable <= 0 {
            return LateFeeCalculation {
                fee: Money::ZERO,
                days_late: 0,
                whole_days_overdue,
                grace_applied: true,
            };
        }

        let days_late = u32::try_from(chargeable).unwrap_or(u32::MAX);
        LateFeeCalculation {
            fee: self.fee_per_day.times(days_late),
            days_late,
            whole_days_overdue,
            grace_applied: false,
        }
    }
}

/// damage or condition charge against the deposit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deduction {
    pub reason: String,
    pub amount: Money,
}

impl Deduction {
    pub fn new(reason: impl Into<String>, amount: Money) -> Self {
        Self {
            reason: reason.into(),
            amount,
        }
    }
}

/// deposit refund on return
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepositSettlement {
    pub deposit: Money,
    pub deductions: Money,
    pub refund: Money,
}

impl DepositSettlement {
    pub fn compute(deposit: Money, deductions: &[Deduction]) -> Result<Self> {
        if let Some(bad) = deductions.iter().find(|d| d.amount.is_negative()) {
            return Err(RentalError::validation(format!(
                "deduction '{}' has a negative amount {}",
                bad.reason, bad.amount
            )));
        }
        let total: Money = deductions.iter().map(|d| d.amount).sum();
        Ok(Self {
            deposit,
            deductions: total,
            refund: (deposit - total).clamp_non_negative(),
        })
    }

    /// whole deposit back, nothing withheld
    pub fn full(deposit: Money) -> Self {
        Self {
            deposit,
            deductions: Money::ZERO,
            refund: deposit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy() -> LateFeePolicy {
        LateFeePolicy::from(&LifecycleConfig::default())
    }

    #[test]
    fn test_two_days_past_end_with_one_day_grace() {
        let now = Utc.with_ymd_and_hms(2024, 8, 20, 12, 0, 0).unwrap();
        let end_at = now - Duration::days(2);

        assert!(policy().is_overdue(end_at, now).unwrap());
        let calc = policy().calculate(end_at, now);
        assert_eq!(calc.days_late, 1);
        assert_eq!(calc.fee, Money::from_major(100));
        assert!(!calc.grace_applied);
    }

    #[test]
    fn test_within_grace_is_free() {
        let now = Utc.with_ymd_and_hms(2024, 8, 20, 12, 0, 0).unwrap();
        let end_at = now - Duration::hours(20);
        assert!(!policy().is_overdue(end_at, now).unwrap());

        let calc = policy().calculate(end_at, now);
        assert_eq!(calc.fee, Money::ZERO);
        assert!(calc.grace_applied);
    }

    #[test]
    fn test_partial_days_floor() {
        let now = Utc.with_ymd_and_hms(2024, 8, 20, 12, 0, 0).unwrap();
        // overdue past grace but fewer than two whole days: no chargeable day yet
        let end_at = now - Duration::hours(36);
        assert!(policy().is_overdue(end_at, now).unwrap());
        assert_eq!(policy().calculate(end_at, now).fee, Money::ZERO);

        let end_at = now - Duration::hours(24 * 5 + 23);
        let calc = policy().calculate(end_at, now);
        assert_eq!(calc.days_late, 4);
        assert_eq!(calc.fee, Money::from_major(400));
    }

    #[test]
    fn test_grace_past_calendar_end_is_an_error() {
        let policy = LateFeePolicy {
            grace_period_days: u32::MAX,
            fee_per_day: Money::from_major(100),
        };
        let end_at = Utc.with_ymd_and_hms(2024, 8, 20, 12, 0, 0).unwrap();
        assert!(matches!(
            policy.is_overdue(end_at, end_at + Duration::days(3)),
            Err(RentalError::Validation { .. })
        ));
    }

    #[test]
    fn test_deposit_settlement() {
        let deposit = Money::from_major(2_500);
        let settlement = DepositSettlement::compute(
            deposit,
            &[
                Deduction::new("scratched lens", Money::from_major(700)),
                Deduction::new("missing cap", Money::from_major(300)),
            ],
        )
        .unwrap();
        assert_eq!(settlement.deductions, Money::from_major(1_000));
        assert_eq!(settlement.refund, Money::from_major(1_500));

        let wrecked = DepositSettlement::compute(
            deposit,
            &[Deduction::new("water damage", Money::from_major(9_000))],
        )
        .unwrap();
        assert_eq!(wrecked.refund, Money::ZERO);

        assert_eq!(DepositSettlement::compute(deposit, &[]).unwrap().refund, deposit);
        assert!(DepositSettlement::compute(
            deposit,
            &[Deduction::new("credit", Money::from_major(-5))]
        )
        .is_err());
    }
}
