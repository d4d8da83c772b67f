//! Core traits and types for the streamgate library.
//!
//! This module contains the pull contract and error types that define the
//! streamgate processing model.

pub mod error;
pub mod traits;

// Re-export core items
pub use error::{Error, Result};
pub use traits::{BoxSource, PendingPull, Source, SourceExt};
