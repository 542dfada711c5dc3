//! Error types for the delivery fleet domain

use thiserror::Error;

/// Errors raised while reading domain values from text
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown override command: {0}")]
    UnknownCommand(String),

    #[error("Unknown alert type: {0}")]
    UnknownAlertType(String),

    #[error("Unknown target type: {0}")]
    UnknownTargetType(String),
}
