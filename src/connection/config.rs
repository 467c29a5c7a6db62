//! Assembler configuration.

use std::time::Duration;

use crate::error::{ReassemblyError, Result};

/// Memory budgets and housekeeping settings for an [`Assembler`](crate::Assembler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerConfig {
    /// Maximum pages buffered across all connections at once.
    pub max_pages: usize,
    /// Buffered pages at which a connection skips ahead over its first gap.
    pub max_pages_per_connection: usize,
    /// Connections idle longer than this are flushed by `flush_idle`.
    pub idle_timeout: Option<Duration>,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_pages: 16_384,
            max_pages_per_connection: 256,
            idle_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl AssemblerConfig {
    /// Set the global page budget.
    pub fn with_max_pages(mut self, max: usize) -> Self {
        self.max_pages = max;
        self
    }

    /// Set the per-connection page budget.
    pub fn with_max_pages_per_connection(mut self, max: usize) -> Self {
        self.max_pages_per_connection = max;
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Disable idle flushing.
    pub fn without_idle_timeout(mut self) -> Self {
        self.idle_timeout = None;
        self
    }

    /// Check that the budgets are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            return Err(ReassemblyError::invalid_config("max_pages must be non-zero"));
        }
        if self.max_pages_per_connection == 0 {
            return Err(ReassemblyError::invalid_config(
                "max_pages_per_connection must be non-zero",
            ));
        }
        if self.max_pages_per_connection > self.max_pages {
            return Err(ReassemblyError::BudgetMismatch {
                per_connection: self.max_pages_per_connection,
                global: self.max_pages,
            });
        }
        Ok(())
    }
}
