use bigdecimal::{BigDecimal, RoundingMode};
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// Monetary amounts are kept to two decimal places.
pub const MONEY_SCALE: i64 = 2;

pub fn round_money(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(MONEY_SCALE, RoundingMode::HalfUp)
}

pub fn line_total(unit_price: &BigDecimal, quantity: &BigDecimal) -> BigDecimal {
    round_money(&(unit_price * quantity))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: BigDecimal },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: BigDecimal,
    pub delivery_fee: BigDecimal,
    pub discount_amount: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total_amount: BigDecimal,
}

impl OrderTotals {
    /// Builds the totals for a new order. The discount is capped at the
    /// subtotal and tax is charged on the discounted subtotal.
    pub fn compute(
        subtotal: &BigDecimal,
        delivery_fee: &BigDecimal,
        discount: &BigDecimal,
        tax_rate: &BigDecimal,
    ) -> Result<Self, MoneyError> {
        for (field, value) in [
            ("subtotal", subtotal),
            ("delivery_fee", delivery_fee),
            ("discount_amount", discount),
            ("tax_rate", tax_rate),
        ] {
            if value < &BigDecimal::zero() {
                return Err(MoneyError::Negative {
                    field,
                    value: value.clone(),
                });
            }
        }

        let subtotal = round_money(subtotal);
        let delivery_fee = round_money(delivery_fee);
        let discount_amount = round_money(discount).min(subtotal.clone());
        let tax_amount = round_money(&((&subtotal - &discount_amount) * tax_rate));
        let total_amount = &subtotal + &delivery_fee + &tax_amount - &discount_amount;

        Ok(Self {
            subtotal,
            delivery_fee,
            discount_amount,
            tax_amount,
            total_amount,
        })
    }

    /// `total = subtotal + delivery_fee + tax - discount`, all non-negative.
    pub fn is_consistent(&self) -> bool {
        let zero = BigDecimal::zero();
        let parts_non_negative = [
            &self.subtotal,
            &self.delivery_fee,
            &self.discount_amount,
            &self.tax_amount,
            &self.total_amount,
        ]
        .iter()
        .all(|v| **v >= zero);

        parts_non_negative
            && self.total_amount
                == &self.subtotal + &self.delivery_fee + &self.tax_amount - &self.discount_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_totals_follow_formula() {
        let totals = OrderTotals::compute(&dec("500"), &dec("30"), &dec("50"), &dec("0.05")).unwrap();
        assert_eq!(totals.tax_amount, dec("22.50"));
        assert_eq!(totals.total_amount, dec("502.50"));
        assert!(totals.is_consistent());
    }

    #[test]
    fn test_discount_never_exceeds_subtotal() {
        let totals = OrderTotals::compute(&dec("40"), &dec("10"), &dec("75"), &dec("0")).unwrap();
        assert_eq!(totals.discount_amount, dec("40"));
        assert_eq!(totals.total_amount, dec("10"));
        assert!(totals.is_consistent());
    }

    #[test]
    fn test_negative_input_rejected() {
        let err = OrderTotals::compute(&dec("10"), &dec("-1"), &dec("0"), &dec("0")).unwrap_err();
        assert!(matches!(err, MoneyError::Negative { field: "delivery_fee", .. }));
    }

    #[test]
    fn test_tampered_totals_are_inconsistent() {
        let mut totals = OrderTotals::compute(&dec("100"), &dec("0"), &dec("0"), &dec("0")).unwrap();
        totals.total_amount = dec("99.99");
        assert!(!totals.is_consistent());
    }

    #[test]
    fn test_line_total_rounds_half_up() {
        assert_eq!(line_total(&dec("19.99"), &dec("0.5")), dec("10.00"));
        assert_eq!(line_total(&dec("12.50"), &dec("3")), dec("37.50"));
    }
}
