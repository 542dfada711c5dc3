//! Checkout splitting for multi-restaurant carts
//!
//! A cart is partitioned by owning restaurant, each partition is priced on
//! its own (subtotal, tax, delivery fee), and all partitions share one
//! payment session so they can be paid together and tracked apart.

use chrono::{Duration, Utc};
use fleet_core::{
    CartItem, CustomerInfo, Order, OrderId, OrderItem, RestaurantDirectory, RestaurantId,
    SplitOrder, SplitOrderGroup,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default checkout tax rate (8%)
pub fn default_tax_rate() -> Decimal {
    Decimal::new(8, 2)
}

/// Partitions and prices carts
#[derive(Debug, Clone)]
pub struct OrderSplitter {
    directory: Arc<RestaurantDirectory>,
    tax_rate: Decimal,
}

impl OrderSplitter {
    pub fn new(directory: Arc<RestaurantDirectory>) -> Self {
        Self {
            directory,
            tax_rate: default_tax_rate(),
        }
    }

    pub fn with_tax_rate(mut self, tax_rate: Decimal) -> Self {
        self.tax_rate = tax_rate;
        self
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    /// Owning restaurant of an item: its explicit id if any, else its product prefix
    pub fn resolve_restaurant(&self, item: &CartItem) -> Option<RestaurantId> {
        match item.restaurant_id.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(self.directory.canonical(raw)),
            _ => self.directory.from_product_id(&item.id),
        }
    }

    /// Group items by restaurant in first-seen order; unresolvable items are dropped
    pub fn group_by_restaurant(&self, items: &[CartItem]) -> Vec<(RestaurantId, Vec<CartItem>)> {
        let mut groups: Vec<(RestaurantId, Vec<CartItem>)> = Vec::new();

        for item in items {
            let Some(restaurant_id) = self.resolve_restaurant(item) else {
                warn!("Dropping cart item {} ({}): no owning restaurant", item.id, item.name);
                continue;
            };

            match groups.iter_mut().find(|(id, _)| id == &restaurant_id) {
                Some((_, group)) => group.push(item.clone()),
                None => groups.push((restaurant_id, vec![item.clone()])),
            }
        }

        groups
    }

    /// Price each restaurant's partition and link them with a new payment session
    pub fn split(&self, items: &[CartItem], delivery_fee: Decimal) -> SplitOrderGroup {
        let orders: Vec<SplitOrder> = self
            .group_by_restaurant(items)
            .into_iter()
            .map(|(restaurant_id, items)| {
                let subtotal: Decimal = items.iter().map(CartItem::line_total).sum();
                let tax = subtotal * self.tax_rate;
                SplitOrder {
                    restaurant_id,
                    items,
                    subtotal,
                    delivery_fee,
                    tax,
                    total: subtotal + tax + delivery_fee,
                }
            })
            .collect();

        let total_amount = orders.iter().map(|o| o.total).sum();
        let group = SplitOrderGroup {
            payment_session_id: new_payment_session_id(),
            orders,
            total_amount,
        };

        debug!(
            "Split cart into {} orders under {} (total {})",
            group.restaurant_count(),
            group.payment_session_id,
            group.total_amount
        );
        group
    }

    /// One pending order per partition, sharing the payment session.
    ///
    /// Ids are `{epoch ms}-{checkout tag}-{n}`, the tag being random per
    /// checkout, and creation times step by one millisecond so siblings
    /// always sort in partition order.
    pub fn materialize(&self, group: &SplitOrderGroup, customer: &CustomerInfo) -> Vec<Order> {
        let base = Utc::now();
        let base_ms = base.timestamp_millis();
        let tag = random_tag(6);

        group
            .orders
            .iter()
            .enumerate()
            .map(|(i, split)| {
                let created_at = base + Duration::milliseconds(i as i64);
                let mut order = Order::new(
                    OrderId::new(format!("{}-{}-{}", base_ms, tag, i + 1)),
                    split.restaurant_id.clone(),
                    created_at,
                );

                order.items = split
                    .items
                    .iter()
                    .map(|item| OrderItem {
                        name: item.name.clone(),
                        qty: item.qty,
                        price: item.price,
                    })
                    .collect();
                order.total = split.total;
                order.payment_session_id = Some(group.payment_session_id.clone());
                order.name = customer.name.clone();
                order.phone = customer.phone.clone();
                order.address = customer.address.clone();
                order.payment_method = customer.payment_method;
                order.payment_status = customer.payment_status.clone();
                order.transaction_id = customer.transaction_id.clone();
                order.user_id = customer.user_id.clone();
                order.note = customer.note.clone();
                order
            })
            .collect()
    }
}

/// Sibling orders created from one checkout
pub fn orders_for_payment_session<'a>(orders: &'a [Order], session_id: &str) -> Vec<&'a Order> {
    orders
        .iter()
        .filter(|o| o.payment_session_id.as_deref() == Some(session_id))
        .collect()
}

/// `PAY-{epoch ms}-{9 random chars}`
fn new_payment_session_id() -> String {
    format!("PAY-{}-{}", Utc::now().timestamp_millis(), random_tag(9))
}

/// First `len` hex digits of a fresh v4 uuid
fn random_tag(len: usize) -> String {
    let mut tag = Uuid::new_v4().simple().to_string();
    tag.truncate(len);
    tag
}

// ============================================================================
// TESTS
// ============================================================================
