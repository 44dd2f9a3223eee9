use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StockError {
    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(BigDecimal),
    #[error("insufficient stock: requested {requested}, available {available}")]
    Insufficient {
        requested: BigDecimal,
        available: BigDecimal,
    },
    #[error("cannot settle {requested} against {reserved} reserved")]
    ReservedUnderflow {
        requested: BigDecimal,
        reserved: BigDecimal,
    },
    #[error("adjustment of {delta} would leave {available} available")]
    NegativeAvailable {
        delta: BigDecimal,
        available: BigDecimal,
    },
}

/// Counts held on one product's inventory row. Reserved stock is carved out
/// of what is sellable, so `available + reserved` is the physical count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub available: BigDecimal,
    pub reserved: BigDecimal,
}

impl StockLevel {
    pub fn new(available: BigDecimal, reserved: BigDecimal) -> Self {
        Self { available, reserved }
    }

    pub fn total(&self) -> BigDecimal {
        &self.available + &self.reserved
    }

    pub fn is_low(&self, threshold: &BigDecimal) -> bool {
        &self.available <= threshold
    }

    pub fn reserve(&mut self, quantity: &BigDecimal) -> Result<(), StockError> {
        ensure_positive(quantity)?;
        if &self.available < quantity {
            return Err(StockError::Insufficient {
                requested: quantity.clone(),
                available: self.available.clone(),
            });
        }
        self.available -= quantity;
        self.reserved += quantity;
        Ok(())
    }

    pub fn release(&mut self, quantity: &BigDecimal) -> Result<(), StockError> {
        self.take_reserved(quantity)?;
        self.available += quantity;
        Ok(())
    }

    /// The goods leave the warehouse: the hold disappears and nothing
    /// returns to available.
    pub fn consume(&mut self, quantity: &BigDecimal) -> Result<(), StockError> {
        self.take_reserved(quantity)
    }

    /// Manual vendor correction of the sellable count.
    pub fn adjust(&mut self, delta: &BigDecimal) -> Result<(), StockError> {
        let available = &self.available + delta;
        if available < BigDecimal::zero() {
            return Err(StockError::NegativeAvailable {
                delta: delta.clone(),
                available,
            });
        }
        self.available = available;
        Ok(())
    }

    fn take_reserved(&mut self, quantity: &BigDecimal) -> Result<(), StockError> {
        ensure_positive(quantity)?;
        if &self.reserved < quantity {
            return Err(StockError::ReservedUnderflow {
                requested: quantity.clone(),
                reserved: self.reserved.clone(),
            });
        }
        self.reserved -= quantity;
        Ok(())
    }
}

fn ensure_positive(quantity: &BigDecimal) -> Result<(), StockError> {
    if quantity <= &BigDecimal::zero() {
        return Err(StockError::NonPositiveQuantity(quantity.clone()));
    }
    Ok(())
}
