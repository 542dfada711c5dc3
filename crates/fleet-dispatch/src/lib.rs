//! # Fleet Dispatch
//!
//! Business operations on top of the live fleet view:
//! - [`AssignmentLedger`]: order-to-drone assignment with an injective mapping
//! - [`EmergencyCommandService`]: recall, emergency landing and audited overrides
//! - [`OrderSplitter`]: multi-restaurant checkout splitting

pub mod emergency;
pub mod error;
pub mod ledger;
pub mod splitter;

pub use emergency::{AuditTrail, EmergencyCommandService, OverrideRequest};
pub use error::{DispatchError, DispatchResult};
pub use ledger::{AssignmentLedger, InvalidReason, Validation, MIN_ASSIGN_BATTERY};
pub use splitter::{default_tax_rate, orders_for_payment_session, OrderSplitter};
