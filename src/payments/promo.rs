use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decimal::Money;
use crate::errors::{RentalError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoKind {
    /// `value` percent of the order, optionally capped
    Percentage,
    /// `value` off the order
    Fixed,
}

/// promo codes are matched case-insensitively and stored upper case
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// discount rule behind a code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoCode {
    pub code: String,
    pub kind: PromoKind,
    pub value: Decimal,
    pub min_order_amount: Option<Money>,
    /// caps percentage discounts only
    pub max_discount: Option<Money>,
    pub usage_limit: Option<u32>,
    pub used_count: u32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
}

impl PromoCode {
    pub fn new(
        code: &str,
        kind: PromoKind,
        value: Decimal,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            code: normalize_code(code),
            kind,
            value,
            min_order_amount: None,
            max_discount: None,
            usage_limit: None,
            used_count: 0,
            valid_from,
            valid_until,
            is_active: true,
        }
    }

    pub fn percentage(code: &str, percent: Decimal, valid_from: DateTime<Utc>, valid_until: DateTime<Utc>) -> Self {
        Self::new(code, PromoKind::Percentage, percent, valid_from, valid_until)
    }

    pub fn fixed(code: &str, amount: Money, valid_from: DateTime<Utc>, valid_until: DateTime<Utc>) -> Self {
        Self::new(code, PromoKind::Fixed, amount.as_decimal(), valid_from, valid_until)
    }

    pub fn with_min_order(mut self, amount: Money) -> Self {
        self.min_order_amount = Some(amount);
        self
    }

    pub fn with_max_discount(mut self, amount: Money) -> Self {
        self.max_discount = Some(amount);
        self
    }

    pub fn with_usage_limit(mut self, limit: u32) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    /// reject rules that could never apply sensibly
    pub fn validate(&self) -> Result<()> {
        if self.code.is_empty() {
            return Err(RentalError::validation("promo code must not be empty"));
        }
        if self.value.is_sign_negative() {
            return Err(RentalError::validation(format!(
                "promo {} has a negative value {}",
                self.code, self.value
            )));
        }
        if self.kind == PromoKind::Percentage && self.value > Decimal::ONE_HUNDRED {
            return Err(RentalError::validation(format!(
                "promo {} discounts more than 100%",
                self.code
            )));
        }
        if self.valid_until < self.valid_from {
            return Err(RentalError::validation(format!(
                "promo {} ends before it starts",
                self.code
            )));
        }
        let negative = |m: Option<Money>| m.is_some_and(|m| m.is_negative());
        if negative(self.min_order_amount) || negative(self.max_discount) {
            return Err(RentalError::validation(format!(
                "promo {} has a negative threshold",
                self.code
            )));
        }
        Ok(())
    }

    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now <= self.valid_until
    }

    pub fn has_uses_left(&self) -> bool {
        self.usage_limit.map_or(true, |limit| self.used_count < limit)
    }

    /// discount for an order, rounded to whole units and never above the order
    pub fn discount_for(&self, order_amount: Money) -> Money {
        let raw = match self.kind {
            PromoKind::Percentage => {
                let discount = order_amount.percentage(self.value);
                match self.max_discount {
                    Some(cap) => discount.min(cap),
                    None => discount,
                }
            }
            PromoKind::Fixed => Money::from_decimal(self.value),
        };
        raw.round_whole()
            .clamp_non_negative()
            .min(order_amount.clamp_non_negative())
    }

    /// count one use; the caller checks the rule first
    pub fn record_use(&mut self) -> Result<u32> {
        if !self.has_uses_left() {
            return Err(PromoRejection::UsageLimitExceeded.into());
        }
        self.used_count += 1;
        Ok(self.used_count)
    }
}

/// why a code did not apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PromoRejection {
    InvalidOrInactive,
    Expired,
    UsageLimitExceeded,
    MinimumOrderNotMet { minimum: Money },
}

impl fmt::Display for PromoRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromoRejection::InvalidOrInactive => f.write_str("invalid or expired"),
            PromoRejection::Expired => f.write_str("expired"),
            PromoRejection::UsageLimitExceeded => f.write_str("usage limit exceeded"),
            PromoRejection::MinimumOrderNotMet { minimum } => {
                write!(f, "minimum order amount not met: {minimum}")
            }
        }
    }
}

impl From<PromoRejection> for RentalError {
    fn from(rejection: PromoRejection) -> Self {
        let message = rejection.to_string();
        match rejection {
            PromoRejection::InvalidOrInactive | PromoRejection::Expired => {
                RentalError::ExpiredOrInactive { message }
            }
            PromoRejection::UsageLimitExceeded => RentalError::LimitExceeded { message },
            PromoRejection::MinimumOrderNotMet { .. } => RentalError::Validation { message },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoQuote {
    pub code: String,
    pub order_amount: Money,
    pub discount_amount: Money,
    pub final_amount: Money,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromoValidation {
    Valid(PromoQuote),
    Rejected(PromoRejection),
}

impl PromoValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, PromoValidation::Valid(_))
    }

    pub fn into_result(self) -> Result<PromoQuote> {
        match self {
            PromoValidation::Valid(quote) => Ok(quote),
            PromoValidation::Rejected(rejection) => Err(rejection.into()),
        }
    }

    /// flat view for a request handler
    pub fn outcome(&self) -> PromoOutcome {
        match self {
            PromoValidation::Valid(quote) => PromoOutcome {
                valid: true,
                discount_amount: Some(quote.discount_amount),
                final_amount: Some(quote.final_amount),
                reason: None,
            },
            PromoValidation::Rejected(rejection) => PromoOutcome {
                valid: false,
                discount_amount: None,
                final_amount: None,
                reason: Some(rejection.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoOutcome {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_amount: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// check a looked-up code against an order, first failure wins
pub fn validate_promo(
    promo: Option<&PromoCode>,
    order_amount: Money,
    now: DateTime<Utc>,
) -> PromoValidation {
    let promo = match promo {
        Some(p) if p.is_active => p,
        _ => return PromoValidation::Rejected(PromoRejection::InvalidOrInactive),
    };
    if !promo.is_within_window(now) {
        return PromoValidation::Rejected(PromoRejection::Expired);
    }
    if !promo.has_uses_left() {
        return PromoValidation::Rejected(PromoRejection::UsageLimitExceeded);
    }
    if let Some(minimum) = promo.min_order_amount {
        if order_amount < minimum {
            return PromoValidation::Rejected(PromoRejection::MinimumOrderNotMet { minimum });
        }
    }

    let discount_amount = promo.discount_for(order_amount);
    PromoValidation::Valid(PromoQuote {
        code: promo.code.clone(),
        order_amount,
        discount_amount,
        final_amount: order_amount - discount_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap()
    }

    fn welcome10() -> PromoCode {
        PromoCode::percentage("welcome10", dec!(10), now() - Duration::days(30), now() + Duration::days(30))
            .with_max_discount(Money::from_major(500))
            .with_min_order(Money::from_major(1_000))
    }

    #[test]
    fn test_capped_percentage() {
        let quote = validate_promo(Some(&welcome10()), Money::from_major(8_000), now())
            .into_result()
            .unwrap();
        assert_eq!(quote.code, "WELCOME10");
        assert_eq!(quote.discount_amount, Money::from_major(500));
        assert_eq!(quote.final_amount, Money::from_major(7_500));

        let quote = validate_promo(Some(&welcome10()), Money::from_major(3_000), now())
            .into_result()
            .unwrap();
        assert_eq!(quote.discount_amount, Money::from_major(300));
    }

    #[test]
    fn test_rejections_in_order() {
        assert_eq!(
            validate_promo(None, Money::from_major(8_000), now()),
            PromoValidation::Rejected(PromoRejection::InvalidOrInactive)
        );

        // inactive wins over an expired window
        let mut promo = welcome10();
        promo.is_active = false;
        promo.valid_until = now() - Duration::days(1);
        assert_eq!(
            validate_promo(Some(&promo), Money::from_major(8_000), now()),
            PromoValidation::Rejected(PromoRejection::InvalidOrInactive)
        );

        // expired wins over exhausted usage
        let mut promo = welcome10().with_usage_limit(1);
        promo.used_count = 1;
        promo.valid_until = now() - Duration::days(1);
        assert_eq!(
            validate_promo(Some(&promo), Money::from_major(8_000), now()),
            PromoValidation::Rejected(PromoRejection::Expired)
        );

        // exhausted usage wins over a small order
        promo.valid_until = now() + Duration::days(1);
        assert_eq!(
            validate_promo(Some(&promo), Money::from_major(10), now()),
            PromoValidation::Rejected(PromoRejection::UsageLimitExceeded)
        );

        let rejection = validate_promo(Some(&welcome10()), Money::from_major(999), now());
        assert_eq!(
            rejection.outcome().reason.as_deref(),
            Some("minimum order amount not met: 1000")
        );
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let promo = welcome10();
        assert!(validate_promo(Some(&promo), Money::from_major(2_000), promo.valid_from).is_valid());
        assert!(validate_promo(Some(&promo), Money::from_major(2_000), promo.valid_until).is_valid());
        assert!(!validate_promo(
            Some(&promo),
            Money::from_major(2_000),
            promo.valid_until + Duration::seconds(1)
        )
        .is_valid());
    }

    #[test]
    fn test_fixed_discount_never_exceeds_order() {
        let promo = PromoCode::fixed("FLAT700", Money::from_major(700), now(), now() + Duration::days(1));
        let quote = validate_promo(Some(&promo), Money::from_major(400), now())
            .into_result()
            .unwrap();
        assert_eq!(quote.discount_amount, Money::from_major(400));
        assert_eq!(quote.final_amount, Money::ZERO);

        let quote = validate_promo(Some(&promo), Money::from_major(5_000), now())
            .into_result()
            .unwrap();
        assert_eq!(quote.final_amount, Money::from_major(4_300));
    }

    #[test]
    fn test_rejection_maps_to_error_taxonomy() {
        assert!(matches!(
            RentalError::from(PromoRejection::Expired),
            RentalError::ExpiredOrInactive { .. }
        ));
        assert!(matches!(
            RentalError::from(PromoRejection::UsageLimitExceeded),
            RentalError::LimitExceeded { .. }
        ));
        assert!(matches!(
            RentalError::from(PromoRejection::MinimumOrderNotMet {
                minimum: Money::from_major(1)
            }),
            RentalError::Validation { .. }
        ));
    }

    #[test]
    fn test_record_use_respects_limit() {
        let mut promo = welcome10().with_usage_limit(2);
        assert_eq!(promo.record_use().unwrap(), 1);
        assert_eq!(promo.record_use().unwrap(), 2);
        assert!(promo.record_use().is_err());
        assert_eq!(promo.used_count, 2);

        let mut unlimited = welcome10();
        for _ in 0..50 {
            unlimited.record_use().unwrap();
        }
        assert_eq!(unlimited.used_count, 50);
    }

    #[test]
    fn test_rule_validation() {
        assert!(welcome10().validate().is_ok());
        let too_much = PromoCode::percentage("BIG", dec!(150), now(), now() + Duration::days(1));
        assert!(too_much.validate().is_err());
        let backwards = PromoCode::percentage("BACK", dec!(5), now(), now() - Duration::days(1));
        assert!(backwards.validate().is_err());
        let blank = PromoCode::percentage("   ", dec!(5), now(), now() + Duration::days(1));
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_outcome_serializes_flat() {
        let outcome = validate_promo(Some(&welcome10()), Money::from_major(8_000), now()).outcome();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["valid"], true);
        assert_eq!(json["discount_amount"], "500");
        assert!(json.get("reason").is_none());
    }
}
