//! Top-level error types for tether
//!
//! This module flattens the per-component errors into the categories a host
//! application actually branches on:
//!
//! - [`Error::Queued`] - Not a failure; show the request as pending
//! - [`Error::Agent`] - A classified failure with user-facing guidance
//! - [`Error::Cancelled`] - The caller gave up
//! - [`Error::Storage`] - The offline queue could not be read or written
//! - [`Error::Config`] - Fix configuration

use thiserror::Error;

use crate::classifier::{AgentError, ErrorCategory};
use crate::client::ClientError;
use crate::config::ConfigError;
use crate::connection::ConnectivityError;
use crate::queue::QueueError;
use crate::retry::RetryError;
use crate::store::StoreError;

/// Top-level error type for tether operations
#[derive(Debug, Error)]
pub enum Error {
    /// The request was queued for delivery once connectivity returns
    #[error("queued for later delivery: {0}")]
    Queued(String),

    /// The request failed
    #[error(transparent)]
    Agent(AgentError),

    /// The operation was cancelled by the caller
    #[error("cancelled")]
    Cancelled,

    /// Connectivity could not be determined
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Persistent storage failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if the request was queued instead of sent
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if this is a network failure
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Agent(e) if e.is_network())
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if trying again later may succeed
    ///
    /// Queued requests are not retryable; they are delivered automatically.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Agent(e) => e.is_retryable(),
            Self::Connectivity(_) => true,
            _ => false,
        }
    }

    /// The failure category, for [`Error::Agent`]
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Agent(e) => Some(e.category()),
            _ => None,
        }
    }
}

impl From<AgentError> for Error {
    fn from(err: AgentError) -> Self {
        if err.is_cancelled() {
            Error::Cancelled
        } else {
            Error::Agent(err)
        }
    }
}

impl From<RetryError> for Error {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::Cancelled => Error::Cancelled,
            RetryError::Failed { error, .. } => error.into(),
        }
    }
}

impl From<ClientError> for Error {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Queued { message_id } => Error::Queued(message_id),
            ClientError::Agent(e) => e.into(),
            ClientError::Queue(e) => e.into(),
            ClientError::Cancelled => Error::Cancelled,
            ClientError::Config(msg) => Error::Config(msg),
        }
    }
}

impl From<QueueError> for Error {
    fn from(err: QueueError) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<ConnectivityError> for Error {
    fn from(err: ConnectivityError) -> Self {
        Error::Connectivity(err.to_string())
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias for tether operations
pub type Result<T> = std::result::Result<T, Error>;
