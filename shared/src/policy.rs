use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is acting on the engine. Identities are issued by the external
/// authentication service; `System` is the engine's own sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Admin(Uuid),
    Vendor(Uuid),
    Buyer(Uuid),
    DeliveryPartner(Uuid),
    System,
}

impl Actor {
    pub fn label(&self) -> String {
        match self {
            Actor::Admin(id) => format!("admin:{id}"),
            Actor::Vendor(id) => format!("vendor:{id}"),
            Actor::Buyer(id) => format!("buyer:{id}"),
            Actor::DeliveryPartner(id) => format!("delivery_partner:{id}"),
            Actor::System => "system".to_string(),
        }
    }
}

/// The parties attached to whatever a policy is checked against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Parties {
    pub buyer: Option<Uuid>,
    pub vendor: Option<Uuid>,
    pub delivery_partner: Option<Uuid>,
}

impl Parties {
    pub fn vendor(vendor_id: Uuid) -> Self {
        Self {
            vendor: Some(vendor_id),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    PlaceOrder,
    ViewOrder,
    CancelOrder,
    AdvanceOrder,
    ConfirmDelivery,
    ReturnOrder,
    RetryPayment,
    ReviewPayment,
    ManageReservations,
    ManageStock,
}

impl Policy {
    pub fn name(&self) -> &'static str {
        match self {
            Policy::PlaceOrder => "place orders",
            Policy::ViewOrder => "view this order",
            Policy::CancelOrder => "cancel this order",
            Policy::AdvanceOrder => "advance this order",
            Policy::ConfirmDelivery => "confirm delivery of this order",
            Policy::ReturnOrder => "return this order",
            Policy::RetryPayment => "retry payment for this order",
            Policy::ReviewPayment => "review payments",
            Policy::ManageReservations => "manage reservations",
            Policy::ManageStock => "adjust this stock",
        }
    }

    pub fn permits(&self, actor: &Actor, parties: &Parties) -> bool {
        let is = |party: Option<Uuid>, id: &Uuid| party == Some(*id);

        match (self, actor) {
            (Policy::PlaceOrder, Actor::Buyer(_)) => true,
            (Policy::PlaceOrder, _) => false,

            (Policy::ViewOrder, Actor::Admin(_) | Actor::System) => true,
            (Policy::ViewOrder, Actor::Buyer(id)) => is(parties.buyer, id),
            (Policy::ViewOrder, Actor::Vendor(id)) => is(parties.vendor, id),
            (Policy::ViewOrder, Actor::DeliveryPartner(id)) => is(parties.delivery_partner, id),

            (Policy::CancelOrder, Actor::Admin(_) | Actor::System) => true,
            (Policy::CancelOrder, Actor::Buyer(id)) => is(parties.buyer, id),
            (Policy::CancelOrder, Actor::Vendor(id)) => is(parties.vendor, id),
            (Policy::CancelOrder, Actor::DeliveryPartner(_)) => false,

            (Policy::AdvanceOrder, Actor::Admin(_)) => true,
            (Policy::AdvanceOrder, Actor::Vendor(id)) => is(parties.vendor, id),
            (Policy::AdvanceOrder, Actor::Buyer(_) | Actor::DeliveryPartner(_) | Actor::System) => {
                false
            }

            (Policy::ConfirmDelivery, Actor::Admin(_)) => true,
            (Policy::ConfirmDelivery, Actor::Vendor(id)) => is(parties.vendor, id),
            (Policy::ConfirmDelivery, Actor::DeliveryPartner(id)) => {
                is(parties.delivery_partner, id)
            }
            (Policy::ConfirmDelivery, Actor::Buyer(_) | Actor::System) => false,

            (Policy::ReturnOrder | Policy::RetryPayment, Actor::Buyer(id)) => is(parties.buyer, id),
            (Policy::ReturnOrder | Policy::RetryPayment, Actor::Admin(_)) => true,
            (
                Policy::ReturnOrder | Policy::RetryPayment,
                Actor::Vendor(_) | Actor::DeliveryPartner(_) | Actor::System,
            ) => false,

            (Policy::ReviewPayment | Policy::ManageReservations, Actor::Admin(_)) => true,
            (
                Policy::ReviewPayment | Policy::ManageReservations,
                Actor::Vendor(_) | Actor::Buyer(_) | Actor::DeliveryPartner(_) | Actor::System,
            ) => false,

            (Policy::ManageStock, Actor::Admin(_)) => true,
            (Policy::ManageStock, Actor::Vendor(id)) => is(parties.vendor, id),
            (Policy::ManageStock, Actor::Buyer(_) | Actor::DeliveryPartner(_) | Actor::System) => {
                false
            }
        }
    }
}
