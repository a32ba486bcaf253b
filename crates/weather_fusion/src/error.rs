//! Top-level error for the bridge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FusionError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] crate::ingest::IngestError),

    #[error("Session error: {0}")]
    Session(#[from] crate::session::SessionError),
}

impl FusionError {
    /// Sparse coverage, not a fault.
    pub fn is_no_entries(&self) -> bool {
        matches!(
            self,
            FusionError::Ingest(crate::ingest::IngestError::NoEntries)
        )
    }
}

pub type Result<T> = std::result::Result<T, FusionError>;
