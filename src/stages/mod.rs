//! Stage implementations for the streamgate library.
//!
//! Every stage consumes one pull-based source and produces another (or, for
//! fan-out, two). Stages with no ordering subtlety live in [`transforms`];
//! the coordination stages live in [`relay`], [`classify`] and [`fanout`].

pub mod classify;
pub mod fanout;
pub mod relay;
pub mod transforms;

pub use classify::{DropWhile, Filter, TakeWhile, Unique};
pub use fanout::{partition, span, split_at, FanSide};
pub use relay::{Buffered, MapConcurrent};
pub use transforms::{Batch, Chain, Drop, FlatMap, Inspect, Map, Take, Zip};
