//! # Lazy Pull-Based Stream Processing for Tokio
//!
//! This crate provides demand-driven stream pipelines where a consumer pulls
//! elements one at a time and a chain of stages transforms, filters, or
//! re-groups them on the way. Its focus is the coordination machinery that
//! keeps multiple per-element asynchronous operations in flight at once while
//! still delivering results in a well-defined order:
//!
//! - **Relay stages** ([`Buffered`](stages::Buffered),
//!   [`MapConcurrent`](stages::MapConcurrent)) decouple production pace from
//!   consumption pace under a fixed capacity bound.
//! - **Classification stages** ([`Filter`](stages::Filter),
//!   [`TakeWhile`](stages::TakeWhile), [`DropWhile`](stages::DropWhile),
//!   [`Unique`](stages::Unique)) evaluate asynchronous per-element tests for
//!   several elements at once while releasing results strictly in order.
//! - **Fan-out stages** ([`partition`](stages::partition),
//!   [`split_at`](stages::split_at), [`span`](stages::span)) demultiplex one
//!   pull source into two independently drainable sources.
//!
//! ## Example
//!
//! ```rust
//! use streamgate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let evens = iter(1..=10)
//!         .filter(|n| {
//!             let n = *n;
//!             async move { Ok(n % 2 == 0) }
//!         })
//!         .map(|n, _index| n * 3)
//!         .collect()
//!         .await?;
//!     assert_eq!(evens, vec![6, 12, 18, 24, 30]);
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod sources;
pub mod stages;
pub mod sync;

// Re-export commonly used items
pub mod prelude {
    pub use crate::core::{BoxSource, Error, PendingPull, Result, Source, SourceExt};
    pub use crate::sources::{from_fn, iter};
    pub use crate::stages::{
        partition, span, split_at, Batch, Buffered, Chain, Drop, DropWhile, FanSide, Filter,
        FlatMap, Inspect, Map, MapConcurrent, Take, TakeWhile, Unique, Zip,
    };
}

// Re-export main error type
pub use self::core::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
