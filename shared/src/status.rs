use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Generates the string round-trip shared by every status column.
/// Parsing is case-insensitive and accepts the listed aliases.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_lowercase();
                match normalized.as_str() {
                    $($text $(| $alias)* => Ok(Self::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OrderStatus {
    Placed,
    Confirmed,
    Picked,
    Packed,
    OutForDelivery,
    Delivered,
    Cancelled,
    Returned,
}

// Legacy names collapse onto the canonical state so reporting never counts
// them separately.
string_enum!(OrderStatus {
    Placed => "placed" | "pending",
    Confirmed => "confirmed",
    Picked => "picked" | "processing",
    Packed => "packed",
    OutForDelivery => "out_for_delivery" | "shipped",
    Delivered => "delivered",
    Cancelled => "cancelled",
    Returned => "returned",
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("order cannot move from {from} to {to}")]
pub struct TransitionError {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl OrderStatus {
    /// The single forward step on the fulfilment path, if any.
    pub fn next(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Placed => Some(OrderStatus::Confirmed),
            OrderStatus::Confirmed => Some(OrderStatus::Picked),
            OrderStatus::Picked => Some(OrderStatus::Packed),
            OrderStatus::Packed => Some(OrderStatus::OutForDelivery),
            OrderStatus::OutForDelivery => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Returned => None,
        }
    }

    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        match to {
            OrderStatus::Cancelled => !matches!(
                self,
                OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Returned
            ),
            OrderStatus::Returned => self == OrderStatus::Delivered,
            _ => self.next() == Some(to),
        }
    }

    pub fn transition(self, to: OrderStatus) -> Result<OrderStatus, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError { from: self, to })
        }
    }

    /// States from which any actor may still cancel. Once dispatched the
    /// goods have left the ledger, so later exits go through returns.
    pub fn within_cancellation_window(self) -> bool {
        matches!(
            self,
            OrderStatus::Placed | OrderStatus::Confirmed | OrderStatus::Picked | OrderStatus::Packed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PaymentMode {
    Online,
    Cod,
}

string_enum!(PaymentMode {
    Online => "online",
    Cod => "cod" | "cash_on_delivery",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PaymentStatus {
    Pending,
    Created,
    Authorized,
    Captured,
    Failed,
    Refunded,
}

string_enum!(PaymentStatus {
    Pending => "pending",
    Created => "created",
    Authorized => "authorized",
    Captured => "captured",
    Failed => "failed",
    Refunded => "refunded",
});

impl PaymentStatus {
    /// No money has been taken yet and a session may still succeed or be retried.
    pub fn awaiting_payment(self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending | PaymentStatus::Created | PaymentStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReservationStatus {
    Active,
    Consumed,
    Released,
}

string_enum!(ReservationStatus {
    Active => "active",
    Consumed => "consumed",
    Released => "released",
});

impl ReservationStatus {
    /// Moves an active reservation to `target`. Settled reservations are
    /// immutable, so any other starting state yields `None`.
    pub fn settle(self, target: ReservationStatus) -> Option<ReservationStatus> {
        match (self, target) {
            (ReservationStatus::Active, ReservationStatus::Consumed | ReservationStatus::Released) => {
                Some(target)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_linear() {
        let mut status = OrderStatus::Placed;
        let mut visited = vec![status];
        while let Some(next) = status.next() {
            status = status.transition(next).unwrap();
            visited.push(status);
        }
        assert_eq!(
            visited,
            vec![
                OrderStatus::Placed,
                OrderStatus::Confirmed,
                OrderStatus::Picked,
                OrderStatus::Packed,
                OrderStatus::OutForDelivery,
                OrderStatus::Delivered,
            ]
        );
    }

    #[test]
    fn test_skipping_steps_is_rejected() {
        let err = OrderStatus::Confirmed
            .transition(OrderStatus::OutForDelivery)
            .unwrap_err();
        assert_eq!(err.from, OrderStatus::Confirmed);
        assert_eq!(err.to, OrderStatus::OutForDelivery);
        assert!(!OrderStatus::Placed.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Packed.can_transition_to(OrderStatus::Picked));
    }

    #[test]
    fn test_cancel_reachable_until_delivered() {
        for status in [
            OrderStatus::Placed,
            OrderStatus::Confirmed,
            OrderStatus::Picked,
            OrderStatus::Packed,
            OrderStatus::OutForDelivery,
        ] {
            assert!(status.can_transition_to(OrderStatus::Cancelled), "{status}");
        }
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::OutForDelivery.within_cancellation_window());
    }

    #[test]
    fn test_return_only_from_delivered() {
        assert!(OrderStatus::Delivered.can_transition_to(OrderStatus::Returned));
        assert!(!OrderStatus::OutForDelivery.can_transition_to(OrderStatus::Returned));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Returned));
    }

    #[test]
    fn test_legacy_aliases_parse_to_canonical_states() {
        assert_eq!("PENDING".parse::<OrderStatus>().unwrap(), OrderStatus::Placed);
        assert_eq!("processing".parse::<OrderStatus>().unwrap(), OrderStatus::Picked);
        assert_eq!("Shipped".parse::<OrderStatus>().unwrap(), OrderStatus::OutForDelivery);
        assert_eq!(OrderStatus::OutForDelivery.as_str(), "out_for_delivery");

        let parsed: OrderStatus = serde_json::from_str("\"SHIPPED\"").unwrap();
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"out_for_delivery\"");
    }

    #[test]
    fn test_unknown_status_is_an_error() {
        let err = "lost".parse::<OrderStatus>().unwrap_err();
        assert_eq!(err.kind, "OrderStatus");
    }

    #[test]
    fn test_reservation_settles_once() {
        let consumed = ReservationStatus::Active.settle(ReservationStatus::Consumed);
        assert_eq!(consumed, Some(ReservationStatus::Consumed));
        assert_eq!(ReservationStatus::Consumed.settle(ReservationStatus::Released), None);
        assert_eq!(ReservationStatus::Released.settle(ReservationStatus::Released), None);
        assert_eq!(ReservationStatus::Active.settle(ReservationStatus::Active), None);
    }

    #[test]
    fn test_awaiting_payment() {
        assert!(PaymentStatus::Pending.awaiting_payment());
        assert!(PaymentStatus::Failed.awaiting_payment());
        assert!(!PaymentStatus::Captured.awaiting_payment());
        assert_eq!("COD".parse::<PaymentMode>().unwrap(), PaymentMode::Cod);
    }
}
