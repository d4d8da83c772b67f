//! Error types for the pull-based stream system.

use std::sync::Arc;

use thiserror::Error;

/// The main error type surfaced through [`Source::pull`](crate::core::Source::pull).
///
/// Errors are tied to individual elements: a failure while fetching or
/// classifying one element is delivered to the pull that owns it, and the
/// stream keeps going for subsequent elements.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An upstream source failed to produce an element.
    #[error("upstream error: {0}")]
    Upstream(Arc<dyn std::error::Error + Send + Sync>),

    /// A predicate or per-element transform failed.
    #[error("predicate error: {0}")]
    Predicate(Arc<dyn std::error::Error + Send + Sync>),

    /// A spawned per-element task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),

    /// A stage's coordinator task is gone and can no longer answer pulls.
    #[error("stage channel closed unexpectedly")]
    ChannelClosed,

    /// A custom error with a message.
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Wrap any error raised while producing an element.
    pub fn upstream<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Upstream(Arc::new(error))
    }

    /// Wrap any error raised while testing or transforming an element.
    pub fn predicate<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Predicate(Arc::new(error))
    }

    /// Create a custom error with a message.
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    pub(crate) fn task(error: tokio::task::JoinError) -> Self {
        Error::Task(error.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;
