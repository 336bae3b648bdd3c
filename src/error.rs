//! Error taxonomy for the rig core
//!
//! Precondition and invariant violations are fatal and propagate to the top of
//! the run loop. Hardware and persistence failures are advisory: the component
//! that sees them logs and carries on.

use thiserror::Error;

/// Root error type for rig failures.
#[derive(Error, Debug)]
pub enum RigError {
    /// Malformed trial parameters; aborts trial generation.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// A state the control logic must never reach.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// A hardware trigger failed.
    #[error("hardware advisory: {0}")]
    Hardware(#[from] HardwareError),

    /// A flush or metadata write failed.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Invalid configuration (levels, settings file, CLI).
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RigError {
    /// Whether the session must stop on this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RigError::Hardware(_) | RigError::Persistence(_))
    }
}

/// Failure reported by an external hardware collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    #[error("{device} unavailable")]
    Unavailable { device: &'static str },

    #[error("{device} rejected command: {reason}")]
    Rejected { device: &'static str, reason: String },

    #[error("{device} timed out")]
    Timeout { device: &'static str },
}

pub type RigResult<T> = Result<T, RigError>;
