use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::status::PaymentMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub sell_unit_id: Uuid,
    pub quantity: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// What the cart service submits when a buyer checks out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkout {
    pub lines: Vec<CartLine>,
    pub delivery_address: DeliveryAddress,
    pub payment_mode: PaymentMode,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    #[error("cart is empty")]
    Empty,
    #[error("quantity for unit {sell_unit_id} must be positive")]
    NonPositiveQuantity { sell_unit_id: Uuid },
    #[error("unit {sell_unit_id} appears with different products")]
    ConflictingUnit { sell_unit_id: Uuid },
    #[error("delivery coordinates are out of range")]
    InvalidCoordinates,
}

impl Checkout {
    /// Merges repeated sell units and orders lines by product, the order in
    /// which inventory rows are locked.
    pub fn normalized_lines(&self) -> Result<Vec<CartLine>, CartError> {
        if self.lines.is_empty() {
            return Err(CartError::Empty);
        }
        let address = &self.delivery_address;
        if !(-90.0..=90.0).contains(&address.latitude)
            || !(-180.0..=180.0).contains(&address.longitude)
        {
            return Err(CartError::InvalidCoordinates);
        }

        let mut merged: BTreeMap<(Uuid, Uuid), BigDecimal> = BTreeMap::new();
        for line in &self.lines {
            if line.quantity <= BigDecimal::zero() {
                return Err(CartError::NonPositiveQuantity {
                    sell_unit_id: line.sell_unit_id,
                });
            }
            if merged
                .keys()
                .any(|(product, unit)| *unit == line.sell_unit_id && *product != line.product_id)
            {
                return Err(CartError::ConflictingUnit {
                    sell_unit_id: line.sell_unit_id,
                });
            }
            *merged
                .entry((line.product_id, line.sell_unit_id))
                .or_insert_with(BigDecimal::zero) += &line.quantity;
        }

        Ok(merged
            .into_iter()
            .map(|((product_id, sell_unit_id), quantity)| CartLine {
                product_id,
                sell_unit_id,
                quantity,
            })
            .collect())
    }

    pub fn coupon_code(&self) -> Option<String> {
        self.coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_ascii_uppercase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> DeliveryAddress {
        DeliveryAddress {
            line1: "12 Market Road".to_string(),
            line2: None,
            city: "Pune".to_string(),
            postal_code: "411001".to_string(),
            latitude: 18.52,
            longitude: 73.85,
        }
    }

    fn checkout(lines: Vec<CartLine>) -> Checkout {
        Checkout {
            lines,
            delivery_address: address(),
            payment_mode: PaymentMode::Cod,
            coupon_code: Some(" save10 ".to_string()),
        }
    }

    #[test]
    fn test_repeated_units_are_merged() {
        let product = Uuid::new_v4();
        let unit = Uuid::new_v4();
        let line = |q: i32| CartLine {
            product_id: product,
            sell_unit_id: unit,
            quantity: BigDecimal::from(q),
        };
        let lines = checkout(vec![line(2), line(3)]).normalized_lines().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, BigDecimal::from(5));
    }

    #[test]
    fn test_lines_sorted_by_product() {
        let mut ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let lines: Vec<CartLine> = ids
            .iter()
            .map(|id| CartLine {
                product_id: *id,
                sell_unit_id: Uuid::new_v4(),
                quantity: BigDecimal::from(1),
            })
            .collect();
        let normalized = checkout(lines).normalized_lines().unwrap();
        ids.sort();
        let products: Vec<Uuid> = normalized.iter().map(|l| l.product_id).collect();
        assert_eq!(products, ids.to_vec());
    }

    #[test]
    fn test_rejects_empty_and_non_positive() {
        assert_eq!(checkout(vec![]).normalized_lines().unwrap_err(), CartError::Empty);
        let unit = Uuid::new_v4();
        let bad = checkout(vec![CartLine {
            product_id: Uuid::new_v4(),
            sell_unit_id: unit,
            quantity: BigDecimal::zero(),
        }]);
        assert_eq!(
            bad.normalized_lines().unwrap_err(),
            CartError::NonPositiveQuantity { sell_unit_id: unit }
        );
    }

    #[test]
    fn test_coupon_code_normalized() {
        assert_eq!(checkout(vec![]).coupon_code().as_deref(), Some("SAVE10"));
    }
}
