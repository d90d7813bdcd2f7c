use std::collections::BTreeMap;

use super::bucket::{ApiSeries, BlockRecord, Bucket, BucketError, ChainFamily, Metric};
use super::rollup::DAY;

/// Growth factor applied to the expected block and day counts when sizing columns.
const GROWTH_FACTOR: f64 = 1.25;

/// Everything guarded by a store's data lock: both resolution buckets, the
/// supplementary API series and the version stamps derived from them.
#[derive(Debug, Clone)]
pub struct ChartData {
    pub family: ChainFamily,
    pub blocks: Bucket,
    pub days: Bucket,
    /// Remotely sourced series, read instead of `days` when `use_api` is set.
    pub api: BTreeMap<Metric, ApiSeries>,
    pub use_api: bool,
    blocks_stamp: u64,
    days_stamp: u64,
    /// Counts rewrites of existing data (reorgs and restores). Plain appends leave it alone.
    epoch: u64,
}

/// Column capacities for a chain expected to be at `height` with blocks every
/// `block_time` seconds.
pub fn capacities(height: u64, block_time: u64) -> (usize, usize) {
    let blocks = (height + 1) as f64;
    let days = blocks * block_time as f64 / DAY as f64;
    let block_capacity = (blocks * GROWTH_FACTOR).ceil() as usize;
    let day_capacity = ((days * GROWTH_FACTOR).ceil() as usize).max(1);
    (block_capacity, day_capacity)
}

impl ChartData {
    pub fn new(family: ChainFamily, use_api: bool, block_capacity: usize, day_capacity: usize) -> Self {
        Self {
            family,
            blocks: Bucket::blocks(family, block_capacity),
            days: Bucket::days(family, day_capacity),
            api: BTreeMap::new(),
            use_api,
            blocks_stamp: 0,
            days_stamp: 0,
            epoch: 0,
        }
    }

    /// Current height of the Blocks bucket, `None` while it is empty.
    pub fn height(&self) -> Option<u64> {
        self.blocks.len().checked_sub(1).map(|h| h as u64)
    }

    pub fn blocks_stamp(&self) -> u64 {
        self.blocks_stamp
    }

    pub fn days_stamp(&self) -> u64 {
        self.days_stamp
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    pub(crate) fn refresh_blocks_stamp(&mut self) {
        self.blocks_stamp = self.blocks.last_time();
    }

    pub(crate) fn bump_days_stamp(&mut self) {
        self.days_stamp += 1;
    }

    /// Appends one block; see [`Bucket::push_block`].
    pub fn push_block(&mut self, record: &BlockRecord) -> Result<bool, BucketError> {
        self.blocks.push_block(record)
    }

    /// Appends one supplementary point for `metric`. Only float-valued API series are
    /// kept, so integer metrics are stored widened.
    pub fn push_api_point(&mut self, metric: Metric, time: u64, value: f64) -> bool {
        self.api.entry(metric).or_default().push(time, value)
    }

    pub fn api_len(&self) -> usize {
        self.api.values().map(ApiSeries::len).sum()
    }

    /// Drops both buckets back to empty, keeping their column sets.
    pub(crate) fn reset(&mut self) {
        self.blocks.snip(0);
        self.days.snip(0);
        self.refresh_blocks_stamp();
        self.bump_days_stamp();
        self.bump_epoch();
    }
}
