//! Error types for the synchronization core.
//!
//! This module provides:
//! - `CoreError` - the error type returned by every public operation
//! - `ConfigError` - raised while loading `Config` from the environment

use thiserror::Error;

/// Errors produced by the concurrent execution core.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Caller or pool cancellation was observed before or during an operation.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A per-batch or per-request budget elapsed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The remote API returned a failure response.
    #[error("remote failure for {target}: {status} {message}")]
    RemoteFailure {
        target: String,
        status: u16,
        message: String,
    },

    /// A remote response could not be parsed.
    #[error("decode failure for {target}: {message}")]
    DecodeFailure { target: String, message: String },

    /// Markdown <-> block conversion failed.
    #[error("conversion failure for {target}: {message}")]
    ConversionFailure { target: String, message: String },

    /// A filesystem write or directory-creation step failed.
    #[error("io failure for {target}: {message}")]
    IoFailure { target: String, message: String },

    /// The batch processor or scheduler received an operation tag with no
    /// registered handler.
    #[error("unknown operation type: {0}")]
    UnknownOperationType(String),

    /// A job was submitted after the pool left the `running` state.
    #[error("pool shutting down, rejected job {0}")]
    PoolShuttingDown(String),

    /// All configured retries were exhausted.
    #[error("retry exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<CoreError>,
    },

    /// A worker task panicked while executing a job.
    #[error("job {0} panicked")]
    JobPanicked(String),

    /// A configuration value could not be parsed from its environment source.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// The job or operation identifier this error is attached to, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Cancelled(id)
            | Self::UnknownOperationType(id)
            | Self::PoolShuttingDown(id)
            | Self::JobPanicked(id) => Some(id),
            Self::RemoteFailure { target, .. }
            | Self::DecodeFailure { target, .. }
            | Self::ConversionFailure { target, .. }
            | Self::IoFailure { target, .. } => Some(target),
            Self::Timeout(_) | Self::RetryExhausted { .. } | Self::Config(_) => None,
        }
    }

    /// True for cancellation-flavored errors, including a `RetryExhausted`
    /// wrapping a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::RetryExhausted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Whether retrying this error is ever worthwhile. Unknown operation
    /// types and pool-shutdown rejections are permanent; everything else is
    /// assumed transient unless it's a cancellation.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::UnknownOperationType(_) | Self::PoolShuttingDown(_) | Self::Cancelled(_)
        )
    }

    /// Wrap `self` as the terminal cause of a `RetryExhausted` error.
    pub fn into_retry_exhausted(self, attempts: u32) -> CoreError {
        CoreError::RetryExhausted {
            attempts,
            source: Box::new(self),
        }
    }
}

/// Errors raised while loading `Config` from its environment source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}
