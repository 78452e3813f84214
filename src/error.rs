//! Error types for Synheart Entrain

use thiserror::Error;

/// Errors surfaced by the entrainment controller and its helpers
#[derive(Debug, Error)]
pub enum EntrainError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Controller is running; stop it first")]
    ControllerRunning,
}

/// Failure of a single haptic pulse.
///
/// Absorbed by the pulse scheduler; never reaches the session state machine.
#[derive(Debug, Clone, Error)]
pub enum ActuatorError {
    #[error("Actuator unavailable: {0}")]
    Unavailable(String),

    #[error("Pulse rejected: {0}")]
    PulseRejected(String),
}

/// Error item delivered by a sample feed
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct FeedError(pub String);
