//! Orders, carts and checkout split types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DroneId, RestaurantId};

/// Unique identifier for an order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    InProgress,
    Ready,
    Delivering,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Delivered and cancelled orders never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::InProgress => "InProgress",
            OrderStatus::Ready => "Ready",
            OrderStatus::Delivering => "Delivering",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        };
        write!(f, "{label}")
    }
}

/// Line item on a persisted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub qty: u32,
    pub price: Decimal,
}

/// Accepted payment methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Visa,
    Momo,
    Zalopay,
    #[default]
    Cod,
    Vnpay,
}

/// A customer order bound to a single restaurant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub restaurant_id: RestaurantId,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub total: Decimal,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drone_id: Option<DroneId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub payment_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Empty pending order
    pub fn new(id: OrderId, restaurant_id: RestaurantId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            restaurant_id,
            items: Vec::new(),
            total: Decimal::ZERO,
            status: OrderStatus::Pending,
            payment_session_id: None,
            drone_id: None,
            name: String::new(),
            phone: String::new(),
            address: String::new(),
            payment_method: PaymentMethod::default(),
            payment_status: String::new(),
            transaction_id: None,
            user_id: None,
            note: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ============================================================================
// CHECKOUT MODELS
// ============================================================================

/// An item in a customer's cart, possibly from several restaurants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Product id, e.g. `sd-001`
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub qty: u32,
    pub price: Decimal,
    /// Owning restaurant as sent by the client, under any known alias
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restaurant_id: Option<String>,
}

impl CartItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, qty: u32, price: Decimal) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            qty,
            price,
            restaurant_id: None,
        }
    }

    pub fn from_restaurant(mut self, restaurant_id: impl Into<String>) -> Self {
        self.restaurant_id = Some(restaurant_id.into());
        self
    }

    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.qty)
    }
}

/// Customer and payment details captured at checkout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    pub name: String,
    pub phone: String,
    pub address: String,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub payment_status: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Priced partition of a cart belonging to one restaurant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitOrder {
    pub restaurant_id: RestaurantId,
    pub items: Vec<CartItem>,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// All per-restaurant partitions of one checkout, linked by a payment session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitOrderGroup {
    pub payment_session_id: String,
    pub orders: Vec<SplitOrder>,
    pub total_amount: Decimal,
}

impl SplitOrderGroup {
    pub fn restaurant_count(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_total() {
        let item = CartItem::new("sd-001", "Cake", 2, Decimal::from(25_000));
        assert_eq!(item.line_total(), Decimal::from(50_000));
    }

    #[test]
    fn test_terminal_status() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Delivering.is_terminal());
    }

    #[test]
    fn test_order_deserializes_with_missing_fields() {
        let json = r#"{"id":"1700000000000-1","restaurantId":"rest_2","status":"Ready","createdAt":1700000000000}"#;
        let order: Order = serde_json::from_str(json).unwrap();

        assert_eq!(order.id, OrderId::new("1700000000000-1"));
        assert_eq!(order.status, OrderStatus::Ready);
        assert!(order.items.is_empty());
        assert!(order.drone_id.is_none());
        assert_eq!(order.created_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_cart_item_accepts_numeric_price() {
        let json = r#"{"id":"ak-001","name":"Poke","qty":1,"price":79000,"restaurantId":"restaurant_2"}"#;
        let item: CartItem = serde_json::from_str(json).unwrap();

        assert_eq!(item.price, Decimal::from(79_000));
        assert_eq!(item.restaurant_id.as_deref(), Some("restaurant_2"));
    }
}
