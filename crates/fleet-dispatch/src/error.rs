//! Dispatch error types

use fleet_core::{OrderId, RestaurantId};
use fleet_source::SourceError;
use thiserror::Error;

/// Errors returned by dispatch operations
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No available drone for order {order_id} at restaurant {restaurant_id}")]
    NoAvailableDrone {
        order_id: OrderId,
        restaurant_id: RestaurantId,
    },

    #[error("Backend rejected write: {0}")]
    WriteBack(#[from] SourceError),

    #[error("Checkout has no items that belong to a known restaurant")]
    EmptyCheckout,
}

pub type DispatchResult<T> = Result<T, DispatchError>;
