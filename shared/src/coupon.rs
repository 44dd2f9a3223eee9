use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::money::round_money;
use crate::status::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Percentage,
    Flat,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountKind::Percentage => "percentage",
            DiscountKind::Flat => "flat",
        }
    }
}

impl FromStr for DiscountKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "percentage" | "percent" => Ok(DiscountKind::Percentage),
            "flat" | "fixed" => Ok(DiscountKind::Flat),
            _ => Err(UnknownVariant {
                kind: "DiscountKind",
                value: s.to_string(),
            }),
        }
    }
}

/// The redeemable terms of a coupon as stored in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponTerms {
    pub code: String,
    pub kind: DiscountKind,
    /// Percentage points for `Percentage`, an amount for `Flat`.
    pub value: BigDecimal,
    pub max_discount: Option<BigDecimal>,
    pub min_order_value: BigDecimal,
    pub usage_limit: Option<i32>,
    pub per_user_limit: Option<i32>,
    pub used_count: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponRejection {
    #[error("coupon code is not recognised")]
    Unknown,
    #[error("coupon is not active")]
    Inactive,
    #[error("coupon is not valid yet")]
    NotYetValid,
    #[error("coupon has expired")]
    Expired,
    #[error("order subtotal is below the coupon minimum of {minimum}")]
    BelowMinimum { minimum: BigDecimal },
    #[error("coupon usage limit reached")]
    UsageLimitReached,
    #[error("coupon already used the maximum number of times by this buyer")]
    UserLimitReached,
    #[error("coupon does not discount this order")]
    NoDiscount,
}

/// Shape of the answer the discount evaluator hands back to order creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponEvaluation {
    pub valid: bool,
    pub discount_amount: BigDecimal,
    pub reason: Option<String>,
}

impl From<Result<BigDecimal, CouponRejection>> for CouponEvaluation {
    fn from(result: Result<BigDecimal, CouponRejection>) -> Self {
        match result {
            Ok(discount_amount) => Self {
                valid: true,
                discount_amount,
                reason: None,
            },
            Err(rejection) => Self {
                valid: false,
                discount_amount: BigDecimal::zero(),
                reason: Some(rejection.to_string()),
            },
        }
    }
}

impl CouponTerms {
    /// Discount for `subtotal`, given how many times this buyer already
    /// redeemed the coupon.
    pub fn evaluate(
        &self,
        subtotal: &BigDecimal,
        buyer_redemptions: i64,
        now: DateTime<Utc>,
    ) -> Result<BigDecimal, CouponRejection> {
        if !self.is_active {
            return Err(CouponRejection::Inactive);
        }
        if now < self.valid_from {
            return Err(CouponRejection::NotYetValid);
        }
        if self.valid_until.is_some_and(|until| now > until) {
            return Err(CouponRejection::Expired);
        }
        if subtotal < &self.min_order_value {
            return Err(CouponRejection::BelowMinimum {
                minimum: self.min_order_value.clone(),
            });
        }
        if self.usage_limit.is_some_and(|limit| self.used_count >= limit) {
            return Err(CouponRejection::UsageLimitReached);
        }
        if self
            .per_user_limit
            .is_some_and(|limit| buyer_redemptions >= i64::from(limit))
        {
            return Err(CouponRejection::UserLimitReached);
        }

        let raw = match self.kind {
            DiscountKind::Percentage => subtotal * &self.value / BigDecimal::from(100),
            DiscountKind::Flat => self.value.clone(),
        };
        let mut discount = round_money(&raw).min(subtotal.clone());
        if let Some(cap) = &self.max_discount {
            discount = discount.min(cap.clone());
        }

        if discount <= BigDecimal::zero() {
            return Err(CouponRejection::NoDiscount);
        }
        Ok(discount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn save10() -> CouponTerms {
        CouponTerms {
            code: "SAVE10".to_string(),
            kind: DiscountKind::Percentage,
            value: dec("10"),
            max_discount: Some(dec("100")),
            min_order_value: dec("0"),
            usage_limit: Some(1000),
            per_user_limit: Some(1),
            used_count: 0,
            valid_from: Utc::now() - Duration::days(1),
            valid_until: Some(Utc::now() + Duration::days(30)),
            is_active: true,
        }
    }

    #[test]
    fn test_percentage_discount_on_500() {
        let discount = save10().evaluate(&dec("500"), 0, Utc::now()).unwrap();
        assert_eq!(discount, dec("50"));
    }

    #[test]
    fn test_percentage_discount_is_capped() {
        let discount = save10().evaluate(&dec("2500"), 0, Utc::now()).unwrap();
        assert_eq!(discount, dec("100"));
    }

    #[test]
    fn test_flat_discount_never_exceeds_subtotal() {
        let coupon = CouponTerms {
            kind: DiscountKind::Flat,
            value: dec("75"),
            max_discount: None,
            ..save10()
        };
        assert_eq!(coupon.evaluate(&dec("60"), 0, Utc::now()).unwrap(), dec("60"));
    }

    #[test]
    fn test_rejections() {
        let now = Utc::now();
        let coupon = save10();

        assert_eq!(
            coupon.evaluate(&dec("500"), 1, now),
            Err(CouponRejection::UserLimitReached)
        );

        let exhausted = CouponTerms {
            used_count: 1000,
            ..save10()
        };
        assert_eq!(
            exhausted.evaluate(&dec("500"), 0, now),
            Err(CouponRejection::UsageLimitReached)
        );

        let expired = CouponTerms {
            valid_until: Some(now - Duration::hours(1)),
            ..save10()
        };
        assert_eq!(expired.evaluate(&dec("500"), 0, now), Err(CouponRejection::Expired));

        let minimum = CouponTerms {
            min_order_value: dec("999"),
            ..save10()
        };
        assert!(matches!(
            minimum.evaluate(&dec("500"), 0, now),
            Err(CouponRejection::BelowMinimum { .. })
        ));
    }

    #[test]
    fn test_evaluation_shape() {
        let ok: CouponEvaluation = save10().evaluate(&dec("500"), 0, Utc::now()).into();
        assert!(ok.valid);
        assert_eq!(ok.reason, None);

        let inactive = CouponTerms {
            is_active: false,
            ..save10()
        };
        let rejected: CouponEvaluation = inactive.evaluate(&dec("500"), 0, Utc::now()).into();
        assert!(!rejected.valid);
        assert_eq!(rejected.discount_amount, BigDecimal::zero());
        assert_eq!(rejected.reason.as_deref(), Some("coupon is not active"));
    }
}
