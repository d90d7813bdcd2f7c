//! Concrete updaters reading newline-delimited JSON files.
//!
//! Each line of a block feed is one [`BlockRecord`](crate::charts::BlockRecord); each
//! line of an API feed is one [`ApiPoint`].

mod file;

pub use file::{ApiFileFeed, ApiPoint, BlockFileFeed};
