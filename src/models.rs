use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Merchant {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MenuItem {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub stock: i32,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub merchant_id: Uuid,
    pub shipper_id: Option<Uuid>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: i64,
    pub delivery_address: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Priced snapshot of one menu item at checkout time. Later price or name
/// changes on the menu item never reach historical orders.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub menu_item_id: Option<Uuid>,
    pub name_snapshot: String,
    pub price_snapshot: i64,
    pub quantity: i32,
    pub line_total: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Review {
    pub id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub order_rating: i32,
    pub merchant_rating: Option<i32>,
    pub shipper_rating: Option<i32>,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order processing states. The happy path is a straight line; CANCELED is
/// reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    ReadyForPickup,
    PickedUp,
    Delivering,
    Delivered,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::ReadyForPickup => "READY_FOR_PICKUP",
            OrderStatus::PickedUp => "PICKED_UP",
            OrderStatus::Delivering => "DELIVERING",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OrderStatus::Pending),
            "CONFIRMED" => Some(OrderStatus::Confirmed),
            "READY_FOR_PICKUP" => Some(OrderStatus::ReadyForPickup),
            "PICKED_UP" => Some(OrderStatus::PickedUp),
            "DELIVERING" => Some(OrderStatus::Delivering),
            "DELIVERED" => Some(OrderStatus::Delivered),
            "CANCELED" => Some(OrderStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Canceled)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Pending, Confirmed) => true,
            (Confirmed, ReadyForPickup) => true,
            (ReadyForPickup, PickedUp) => true,
            (ReadyForPickup, Delivering) => true,
            (PickedUp, Delivering) => true,
            (Delivering, Delivered) => true,
            (from, Canceled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNPAID" => Some(PaymentStatus::Unpaid),
            "PAID" => Some(PaymentStatus::Paid),
            "REFUNDED" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtpPurpose {
    Register,
    ResetPassword,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Register => "REGISTER",
            OtpPurpose::ResetPassword => "RESET_PASSWORD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REGISTER" => Some(OtpPurpose::Register),
            "RESET_PASSWORD" => Some(OtpPurpose::ResetPassword),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;
    use super::*;

    const ALL: [OrderStatus; 7] = [
        Pending,
        Confirmed,
        ReadyForPickup,
        PickedUp,
        Delivering,
        Delivered,
        Canceled,
    ];

    #[test]
    fn happy_path_is_linear() {
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(ReadyForPickup));
        assert!(ReadyForPickup.can_transition_to(PickedUp));
        assert!(PickedUp.can_transition_to(Delivering));
        assert!(Delivering.can_transition_to(Delivered));
    }

    #[test]
    fn claim_may_jump_straight_to_delivering() {
        assert!(ReadyForPickup.can_transition_to(Delivering));
    }

    #[test]
    fn cancel_reachable_from_every_non_terminal_state() {
        for from in ALL {
            assert_eq!(from.can_transition_to(Canceled), !from.is_terminal());
        }
    }

    #[test]
    fn terminal_states_have_no_successors() {
        for next in ALL {
            assert!(!Delivered.can_transition_to(next));
            assert!(!Canceled.can_transition_to(next));
        }
    }

    #[test]
    fn no_skipping_ahead_or_moving_backwards() {
        assert!(!Pending.can_transition_to(ReadyForPickup));
        assert!(!Pending.can_transition_to(Delivered));
        assert!(!Confirmed.can_transition_to(Pending));
        assert!(!Delivering.can_transition_to(PickedUp));
        assert!(!ReadyForPickup.can_transition_to(Delivered));
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in ALL {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("SHIPPED"), None);
    }

    #[test]
    fn payment_status_round_trips() {
        for ps in [
            PaymentStatus::Unpaid,
            PaymentStatus::Paid,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(PaymentStatus::parse(ps.as_str()), Some(ps));
        }
    }

    #[test]
    fn otp_purpose_round_trips() {
        for p in [OtpPurpose::Register, OtpPurpose::ResetPassword] {
            assert_eq!(OtpPurpose::parse(p.as_str()), Some(p));
        }
        assert_eq!(OtpPurpose::parse("LOGIN"), None);
    }
}
