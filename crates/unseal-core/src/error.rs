//! error types for unseal
//!
//! everything that can go wrong for a single host carries the host label so
//! it can be reported without extra context. only `Config` aborts a run.

use thiserror::Error;

use crate::keyring::KeyringError;

pub type Result<T> = std::result::Result<T, UnsealError>;

#[derive(Debug, Clone, Error)]
pub enum UnsealError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{host}: decryption failed: {reason}")]
    Decryption { host: String, reason: String },

    #[error("{host}: error creating vault client: {reason}")]
    Client { host: String, reason: String },

    #[error("{host}: error getting vault status: {reason}")]
    Probe { host: String, reason: String },

    #[error("{host}: error running unseal operation: {reason}")]
    Unseal { host: String, reason: String },

    #[error("{host}: task aborted: {reason}")]
    TaskPanicked { host: String, reason: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] KeyringError),
}

impl UnsealError {
    /// label of the host this error belongs to, if any
    pub fn host(&self) -> Option<&str> {
        match self {
            UnsealError::Decryption { host, .. }
            | UnsealError::Client { host, .. }
            | UnsealError::Probe { host, .. }
            | UnsealError::Unseal { host, .. }
            | UnsealError::TaskPanicked { host, .. } => Some(host),
            UnsealError::Config(_) | UnsealError::Keyring(_) => None,
        }
    }

    /// the underlying cause without the host prefix
    pub fn reason(&self) -> String {
        match self {
            UnsealError::Decryption { reason, .. }
            | UnsealError::Client { reason, .. }
            | UnsealError::Probe { reason, .. }
            | UnsealError::Unseal { reason, .. }
            | UnsealError::TaskPanicked { reason, .. } => reason.clone(),
            UnsealError::Config(msg) => msg.clone(),
            UnsealError::Keyring(e) => e.to_string(),
        }
    }
}
