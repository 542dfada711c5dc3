//! Tracker error types

use fleet_source::SourceError;
use thiserror::Error;

/// Errors surfaced by tracker write paths
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Drone not found: {0}")]
    DroneNotFound(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}

pub type TrackerResult<T> = Result<T, TrackerError>;
