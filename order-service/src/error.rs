use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use bigdecimal::BigDecimal;
use diesel_async::pooled_connection::PoolError;
use serde::Serialize;
use shared::*;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: BigDecimal,
        available: BigDecimal,
    },

    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("stock reservations for order {order_id} have expired")]
    ReservationExpired { order_id: Uuid },

    #[error("captured {captured} for order {order_id} but expected {expected}")]
    PaymentMismatch {
        order_id: Uuid,
        expected: BigDecimal,
        captured: BigDecimal,
    },

    #[error("coupon {coupon_id} was already applied to order {order_id}")]
    DuplicateCouponUsage { coupon_id: Uuid, order_id: Uuid },

    #[error("coupon rejected: {0}")]
    CouponRejected(#[from] CouponRejection),

    #[error("order {0} can no longer be cancelled")]
    NotCancellable(Uuid),

    #[error("delivery code does not match")]
    OtpMismatch,

    #[error("return window for order {0} has closed")]
    ReturnWindowClosed(Uuid),

    #[error("stock ledger rejected the change: {0}")]
    Stock(#[from] StockError),

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("not allowed to {0}")]
    Forbidden(&'static str),

    #[error("authentication required: {0}")]
    Unauthenticated(String),

    #[error("stored record is unreadable: {0}")]
    Corrupt(#[from] UnknownVariant),

    #[error(transparent)]
    Database(#[from] diesel::result::Error),

    #[error("connection pool: {0}")]
    Pool(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn insufficient(product_id: Uuid, err: StockError) -> Self {
        match err {
            StockError::Insufficient {
                requested,
                available,
            } => EngineError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            other => EngineError::Stock(other),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }

    /// Transient failures worth retrying as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Database(_) | EngineError::Pool(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InsufficientStock { .. } => "insufficient_stock",
            EngineError::InvalidStateTransition { .. } => "invalid_state_transition",
            EngineError::ReservationExpired { .. } => "reservation_expired",
            EngineError::PaymentMismatch { .. } => "payment_mismatch",
            EngineError::DuplicateCouponUsage { .. } => "duplicate_coupon_usage",
            EngineError::CouponRejected(_) => "coupon_rejected",
            EngineError::NotCancellable(_) => "not_cancellable",
            EngineError::OtpMismatch => "otp_mismatch",
            EngineError::ReturnWindowClosed(_) => "return_window_closed",
            EngineError::Stock(_) => "stock_rejected",
            EngineError::Validation(_) => "validation_failed",
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::Unauthenticated(_) => "unauthenticated",
            EngineError::Corrupt(_) | EngineError::Serialization(_) => "internal_error",
            EngineError::Database(_) | EngineError::Pool(_) => "temporarily_unavailable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::InsufficientStock { .. }
            | EngineError::InvalidStateTransition { .. }
            | EngineError::ReservationExpired { .. }
            | EngineError::PaymentMismatch { .. }
            | EngineError::DuplicateCouponUsage { .. }
            | EngineError::NotCancellable(_) => StatusCode::CONFLICT,
            EngineError::CouponRejected(_)
            | EngineError::OtpMismatch
            | EngineError::ReturnWindowClosed(_)
            | EngineError::Stock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            EngineError::Corrupt(_) | EngineError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            EngineError::Database(_) | EngineError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<bb8::RunError<PoolError>> for EngineError {
    fn from(err: bb8::RunError<PoolError>) -> Self {
        EngineError::Pool(err.to_string())
    }
}

impl From<TransitionError> for EngineError {
    fn from(err: TransitionError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<CartError> for EngineError {
    fn from(err: CartError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<MoneyError> for EngineError {
    fn from(err: MoneyError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub error: String,
    pub retryable: bool,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            if self.is_transient() {
                "service temporarily unavailable, please retry".to_string()
            } else {
                "internal error".to_string()
            }
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            code: self.code(),
            error,
            retryable: self.is_transient(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_maps_ledger_error() {
        let product_id = Uuid::new_v4();
        let err = EngineError::insufficient(
            product_id,
            StockError::Insufficient {
                requested: BigDecimal::from(3),
                available: BigDecimal::from(1),
            },
        );
        assert!(matches!(err, EngineError::InsufficientStock { product_id: p, .. } if p == product_id));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "insufficient_stock");
    }

    #[test]
    fn test_other_ledger_errors_stay_ledger_errors() {
        let err = EngineError::insufficient(
            Uuid::new_v4(),
            StockError::NonPositiveQuantity(BigDecimal::from(0)),
        );
        assert!(matches!(err, EngineError::Stock(_)));
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_database_errors_are_generic_and_retryable() {
        let err = EngineError::Database(diesel::result::Error::NotFound);
        assert!(err.is_transient());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_state_errors_are_conflicts() {
        let err = EngineError::InvalidStateTransition {
            order_id: Uuid::new_v4(),
            from: OrderStatus::Confirmed,
            to: OrderStatus::OutForDelivery,
        };
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}
