//! Error types for reassembly operations.

use thiserror::Error;

/// Errors that can occur while setting up or driving an assembler.
///
/// Segment processing itself never fails: anomalies in the captured traffic
/// degrade to skip markers on delivered chunks instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    /// Assembler configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Page budget cannot hold even a single connection.
    #[error("Per-connection page budget {per_connection} exceeds global budget {global}")]
    BudgetMismatch { per_connection: usize, global: usize },

    /// The background reassembly task has stopped.
    #[error("Reassembly channel closed")]
    ChannelClosed,
}

/// Result type alias for reassembly operations.
pub type Result<T> = std::result::Result<T, ReassemblyError>;

impl ReassemblyError {
    /// Create a new invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Check if this error comes from configuration rather than runtime state.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::BudgetMismatch { .. })
    }
}
