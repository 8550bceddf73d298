use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{RentalError, Result};
use crate::types::{InstallmentId, OrderId, PlanId};

/// supported split plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanType {
    #[serde(rename = "2-months")]
    TwoMonths,
    #[serde(rename = "3-months")]
    ThreeMonths,
}

impl PlanType {
    pub fn installments(&self) -> u32 {
        match self {
            PlanType::TwoMonths => 2,
            PlanType::ThreeMonths => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::TwoMonths => "2-months",
            PlanType::ThreeMonths => "3-months",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = RentalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "2-months" => Ok(PlanType::TwoMonths),
            "3-months" => Ok(PlanType::ThreeMonths),
            other => Err(RentalError::InvalidPlanType {
                plan_type: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Active,
    Completed,
    Defaulted,
}

/// one monthly due
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub id: InstallmentId,
    /// 1-based position in the plan
    pub sequence: u32,
    pub amount: Money,
    pub due_date: DateTime<Utc>,
    pub status: InstallmentStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Installment {
    pub fn is_paid(&self) -> bool {
        self.status == InstallmentStatus::Paid
    }
}

/// result of marking an installment paid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// already paid, nothing changed
    AlreadyPaid,
    /// newly paid; `completed` when it was the last open installment
    Paid { amount: Money, completed: bool },
}

/// installments flagged by an overdue refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverdueUpdate {
    pub newly_overdue: Vec<InstallmentId>,
    pub defaulted: bool,
}

/// plan splitting an order total into monthly dues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub id: PlanId,
    pub order_id: OrderId,
    pub plan_type: PlanType,
    pub total_amount: Money,
    pub installments: Vec<Installment>,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstallmentPlan {
    /// split `total_amount` into monthly dues starting next month
    ///
    /// Every installment but the last bills `ceil(total / n)`; the last one
    /// absorbs the remainder so the sum is exact: 10000 over three months
    /// bills 3334, 3334 and 3332, not an even 3334, 3333, 3333 spread.
    pub fn generate(
        order_id: OrderId,
        total_amount: Money,
        plan_type: PlanType,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if total_amount.is_negative() || total_amount.is_zero() {
            return Err(RentalError::validation(format!(
                "installment total must be positive, got {total_amount}"
            )));
        }

        let n = plan_type.installments();
        let per_installment = total_amount.ceil_div(n);
        let last = total_amount - per_installment.times(n - 1);
        if last.is_negative() || last.is_zero() {
            return Err(RentalError::validation(format!(
                "total {total_amount} is too small to split into {n} installments"
            )));
        }

        let mut installments = Vec::with_capacity(n as usize);
        for i in 0..n {
            let due_date = now
                .checked_add_months(Months::new(i + 1))
                .ok_or_else(|| RentalError::validation("installment due date out of range"))?;
            installments.push(Installment {
                id: Uuid::new_v4(),
                sequence: i + 1,
                amount: if i + 1 == n { last } else { per_installment },
                due_date,
                status: InstallmentStatus::Pending,
                paid_at: None,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            order_id,
            plan_type,
            total_amount,
            installments,
            status: PlanStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn installment(&self, installment_id: InstallmentId) -> Option<&Installment> {
        self.installments.iter().find(|i| i.id == installment_id)
    }

    pub fn scheduled_total(&self) -> Money {
        self.installments.iter().map(|i| i.amount).sum()
    }

    /// amount still owed
    pub fn outstanding(&self) -> Money {
        self.installments
            .iter()
            .filter(|i| !i.is_paid())
            .map(|i| i.amount)
            .sum()
    }

    pub fn next_due(&self) -> Option<&Installment> {
        self.installments.iter().find(|i| !i.is_paid())
    }

    /// mark one installment paid, completing the plan when nothing is left
    pub fn mark_paid(
        &mut self,
        installment_id: InstallmentId,
        paid_at: DateTime<Utc>,
    ) -> Result<PaymentOutcome> {
        let installment = self
            .installments
            .iter_mut()
            .find(|i| i.id == installment_id)
            .ok_or_else(|| RentalError::not_found("installment", installment_id))?;

        if installment.is_paid() {
            return Ok(PaymentOutcome::AlreadyPaid);
        }

        installment.status = InstallmentStatus::Paid;
        installment.paid_at = Some(paid_at);
        let amount = installment.amount;
        self.updated_at = paid_at;

        let completed = self.installments.iter().all(Installment::is_paid);
        if completed {
            self.status = PlanStatus::Completed;
        }

        Ok(PaymentOutcome::Paid { amount, completed })
    }

    /// flag pending installments past due; default the plan past the threshold
    pub fn refresh_overdue(&mut self, now: DateTime<Utc>, default_after_days: u32) -> OverdueUpdate {
        let mut update = OverdueUpdate::default();
        if self.status == PlanStatus::Completed {
            return update;
        }

        let default_after = Duration::days(i64::from(default_after_days));
        let mut should_default = false;
        for installment in &mut self.installments {
            if installment.is_paid() || now <= installment.due_date {
                continue;
            }
            if installment.status == InstallmentStatus::Pending {
                installment.status = InstallmentStatus::Overdue;
                update.newly_overdue.push(installment.id);
            }
            if now - installment.due_date > default_after {
                should_default = true;
            }
        }

        if should_default && self.status == PlanStatus::Active {
            self.status = PlanStatus::Defaulted;
            update.defaulted = true;
        }
        if !update.newly_overdue.is_empty() || update.defaulted {
            self.updated_at = now;
        }
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 9, 0, 0).unwrap()
    }

    fn amounts(plan: &InstallmentPlan) -> Vec<Money> {
        plan.installments.iter().map(|i| i.amount).collect()
    }

    #[test]
    fn test_three_month_split_of_ten_thousand() {
        let plan = InstallmentPlan::generate(
            Uuid::new_v4(),
            Money::from_major(10_000),
            PlanType::ThreeMonths,
            now(),
        )
        .unwrap();

        assert_eq!(
            amounts(&plan),
            vec![
                Money::from_major(3_334),
                Money::from_major(3_334),
                Money::from_major(3_332)
            ]
        );
        assert_eq!(plan.scheduled_total(), Money::from_major(10_000));

        let due: Vec<_> = plan.installments.iter().map(|i| i.due_date).collect();
        assert_eq!(due[0], Utc.with_ymd_and_hms(2024, 2, 29, 9, 0, 0).unwrap());
        assert_eq!(due[1], Utc.with_ymd_and_hms(2024, 3, 31, 9, 0, 0).unwrap());
        assert_eq!(due[2], Utc.with_ymd_and_hms(2024, 4, 30, 9, 0, 0).unwrap());
        assert!(plan
            .installments
            .iter()
            .all(|i| i.status == InstallmentStatus::Pending));
    }

    #[test]
    fn test_sum_is_always_exact() {
        for plan_type in [PlanType::TwoMonths, PlanType::ThreeMonths] {
            for total in (5..20_000i64).step_by(37) {
                let total = Money::from_major(total);
                let plan = InstallmentPlan::generate(Uuid::new_v4(), total, plan_type, now()).unwrap();
                assert_eq!(plan.scheduled_total(), total);
                assert_eq!(plan.installments.len() as u32, plan_type.installments());
                assert!(plan.installments.iter().all(|i| i.amount > Money::ZERO));
            }
        }

        let fractional = Money::from_decimal(dec!(999.99));
        let plan =
            InstallmentPlan::generate(Uuid::new_v4(), fractional, PlanType::TwoMonths, now()).unwrap();
        assert_eq!(amounts(&plan), vec![Money::from_major(500), Money::from_decimal(dec!(499.99))]);
    }

    #[test]
    fn test_rejects_unknown_plan_type_and_bad_totals() {
        assert_eq!(
            "6-months".parse::<PlanType>().unwrap_err(),
            RentalError::InvalidPlanType {
                plan_type: "6-months".to_string()
            }
        );
        assert_eq!("2-months".parse::<PlanType>().unwrap(), PlanType::TwoMonths);

        assert!(InstallmentPlan::generate(Uuid::new_v4(), Money::ZERO, PlanType::TwoMonths, now()).is_err());
        assert!(InstallmentPlan::generate(Uuid::new_v4(), Money::from_major(4), PlanType::ThreeMonths, now()).is_err());
    }

    #[test]
    fn test_mark_paid_completes_plan_and_is_idempotent() {
        let mut plan = InstallmentPlan::generate(
            Uuid::new_v4(),
            Money::from_major(6_000),
            PlanType::TwoMonths,
            now(),
        )
        .unwrap();
        let first = plan.installments[0].id;
        let second = plan.installments[1].id;

        let paid_at = now() + Duration::days(20);
        assert_eq!(
            plan.mark_paid(first, paid_at).unwrap(),
            PaymentOutcome::Paid {
                amount: Money::from_major(3_000),
                completed: false
            }
        );
        assert_eq!(plan.mark_paid(first, paid_at).unwrap(), PaymentOutcome::AlreadyPaid);
        assert_eq!(plan.status, PlanStatus::Active);
        assert_eq!(plan.outstanding(), Money::from_major(3_000));
        assert_eq!(plan.next_due().map(|i| i.id), Some(second));

        assert!(matches!(
            plan.mark_paid(second, paid_at).unwrap(),
            PaymentOutcome::Paid { completed: true, .. }
        ));
        assert_eq!(plan.status, PlanStatus::Completed);
        assert_eq!(plan.installment(second).unwrap().paid_at, Some(paid_at));

        assert!(matches!(
            plan.mark_paid(Uuid::new_v4(), paid_at),
            Err(RentalError::NotFound { .. })
        ));
    }

    #[test]
    fn test_overdue_then_default_then_recovery() {
        let mut plan = InstallmentPlan::generate(
            Uuid::new_v4(),
            Money::from_major(9_000),
            PlanType::ThreeMonths,
            now(),
        )
        .unwrap();
        let first_due = plan.installments[0].due_date;

        let update = plan.refresh_overdue(first_due + Duration::days(2), 30);
        assert_eq!(update.newly_overdue, vec![plan.installments[0].id]);
        assert!(!update.defaulted);
        assert_eq!(plan.installments[0].status, InstallmentStatus::Overdue);
        assert_eq!(plan.status, PlanStatus::Active);

        let update = plan.refresh_overdue(first_due + Duration::days(2), 30);
        assert!(update.newly_overdue.is_empty());

        let update = plan.refresh_overdue(first_due + Duration::days(31), 30);
        assert!(update.defaulted);
        assert_eq!(plan.status, PlanStatus::Defaulted);

        let paid_at = first_due + Duration::days(40);
        let ids: Vec<_> = plan.installments.iter().map(|i| i.id).collect();
        for id in ids {
            plan.mark_paid(id, paid_at).unwrap();
        }
        assert_eq!(plan.status, PlanStatus::Completed);
    }
}
