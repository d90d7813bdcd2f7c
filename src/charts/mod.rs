//! Per-chain time-series rollup cache behind the chart endpoints.
//!
//! - [`series`] - growable numeric columns with range sums and averages
//! - [`bucket`] - equal-length column sets, one per resolution
//! - [`rollup`] - day aggregation from the Blocks bucket
//! - [`updater`] - fetch/append pairs that extend a store
//! - [`makers`] - chart encoders and the per-family registry
//! - [`store`] - locking, output cache and update cycles
//! - [`snapshot`] - Blocks bucket dump and load
//! - [`reorg`] - rollback on chain reorganization

pub mod bucket;
pub mod data;
pub mod error;
pub mod makers;
pub mod reorg;
pub mod rollup;
pub mod series;
pub mod snapshot;
pub mod store;
pub mod updater;

pub use bucket::{BlockRecord, Bucket, ChainFamily, Metric};
pub use data::ChartData;
pub use error::{ChartError, UpdateError};
pub use makers::{Axis, Bin, ChartMaker, MakeError, MakerRegistry, Resolution};
pub use reorg::{run_reorg_listener, ReorgNotice};
pub use snapshot::SnapshotError;
pub use store::{ChartStore, StoreParams};
pub use updater::{Fetched, Release, Updater};
