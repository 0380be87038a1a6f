use thiserror::Error;

use crate::traits::{CoinSourceError, StoreError};

/// How a failed reconciliation pass should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A collaborator could not be reached. The pass can be retried from a fresh read.
    Transient,
    /// Retrying will not help. The loop gives up until the invoice is triggered again.
    Permanent,
}

#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error("Invoice store error. {0}")]
    Store(#[from] StoreError),
    #[error("Coin source error. {0}")]
    CoinSource(#[from] CoinSourceError),
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(StoreError::Unavailable(_)) => ErrorKind::Transient,
            Self::CoinSource(CoinSourceError::Unavailable(_)) => ErrorKind::Transient,
            Self::Store(_) | Self::CoinSource(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {name}. {reason}")]
    InvalidValue { name: &'static str, reason: String },
}
