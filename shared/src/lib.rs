pub mod cart;
pub mod coupon;
pub mod events;
pub mod money;
pub mod otp;
pub mod policy;
pub mod status;
pub mod stock;

pub use cart::{CartError, CartLine, Checkout, DeliveryAddress};
pub use coupon::{CouponEvaluation, CouponRejection, CouponTerms, DiscountKind};
pub use events::{EngineEvent, PaymentGatewayEvent, PaymentReport};
pub use money::{line_total, round_money, MoneyError, OrderTotals};
pub use otp::DeliveryOtp;
pub use policy::{Actor, Parties, Policy};
pub use status::{
    OrderStatus, PaymentMode, PaymentStatus, ReservationStatus, TransitionError, UnknownVariant,
};
pub use stock::{StockError, StockLevel};
