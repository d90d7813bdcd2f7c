use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use moka::sync::Cache;
use parking_lot::{Mutex, RwLock};

use super::bucket::ChainFamily;
use super::data::{capacities, ChartData};
use super::error::{ChartError, UpdateError};
use super::makers::{Axis, Bin, MakeError, MakerRegistry, Resolution};
use super::updater::{AnyRows, DynUpdater, Fetched, Updater};

/// Encoded charts kept per store. Each chart has at most a handful of bins, so this
/// only matters if callers probe many unknown names.
const CHART_CACHE_CAPACITY: u64 = 512;

/// Minimum spacing between rate-limited updates.
const UPDATE_COOLDOWN_HOURS: i64 = 24;

/// Startup parameters of a store.
#[derive(Debug, Clone)]
pub struct StoreParams {
    pub chain: String,
    pub family: ChainFamily,
    /// Expected current chain height, used only to size columns.
    pub expected_height: u64,
    /// Target seconds per block, used only to size columns.
    pub target_block_time: u64,
    /// Last height known to be synced by the local database.
    pub synced_height: u64,
    /// Chain has no local database sync: charts read the supplementary API series.
    pub disable_db_sync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    chart: String,
    bin: Bin,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    stamp: u64,
    payload: Bytes,
}

/// Per-chain chart store.
///
/// Three independent locks guard it:
/// - the data lock over both buckets, held briefly by writers and shared by readers;
/// - the output cache's own internal locking, so cache hits never wait on data writes;
/// - the update lock, held for a whole update cycle so cycles never overlap.
pub struct ChartStore {
    chain: String,
    family: ChainFamily,
    synced_height: u64,
    day_capacity: usize,
    pub(crate) data: RwLock<ChartData>,
    pub(crate) cache: Cache<CacheKey, CacheEntry>,
    makers: MakerRegistry,
    updaters: Vec<Box<dyn DynUpdater>>,
    update_lock: tokio::sync::Mutex<()>,
    last_update: Mutex<Option<DateTime<Utc>>>,
}

impl ChartStore {
    pub fn new(params: StoreParams) -> Self {
        let expected = params.expected_height.max(params.synced_height);
        let (block_capacity, day_capacity) = capacities(expected, params.target_block_time);

        debug!(
            "{}: sizing chart store for {} blocks and {} days",
            params.chain, block_capacity, day_capacity
        );

        Self {
            chain: params.chain,
            family: params.family,
            synced_height: params.synced_height,
            day_capacity,
            data: RwLock::new(ChartData::new(
                params.family,
                params.disable_db_sync,
                block_capacity,
                day_capacity,
            )),
            cache: Cache::builder().max_capacity(CHART_CACHE_CAPACITY).build(),
            makers: MakerRegistry::for_family(params.family),
            updaters: Vec::new(),
            update_lock: tokio::sync::Mutex::new(()),
            last_update: Mutex::new(None),
        }
    }

    /// Replaces the chart registry chosen from the chain family.
    pub fn with_makers(mut self, makers: MakerRegistry) -> Self {
        self.makers = makers;
        self
    }

    /// Adds an updater. Updaters run in registration order.
    pub fn register_updater(&mut self, updater: impl Updater) {
        info!("{}: registered updater {}", self.chain, Updater::tag(&updater));
        self.updaters.push(Box::new(updater));
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn family(&self) -> ChainFamily {
        self.family
    }

    pub fn synced_height(&self) -> u64 {
        self.synced_height
    }

    pub(crate) fn day_capacity(&self) -> usize {
        self.day_capacity
    }

    pub fn use_api(&self) -> bool {
        self.data.read().use_api
    }

    /// Height of the last block held, `None` while empty.
    pub fn height(&self) -> Option<u64> {
        self.data.read().height()
    }

    pub fn version_stamp(&self, resolution: Resolution) -> u64 {
        stamp_of(&self.data.read(), resolution)
    }

    /// Runs `f` against the chart data under the read lock.
    pub fn with_data<R>(&self, f: impl FnOnce(&ChartData) -> R) -> R {
        f(&self.data.read())
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.lock()
    }

    /// Drops every cached chart payload.
    pub(crate) fn clear_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Encoded chart for `chart` at the named resolution and axis.
    ///
    /// Served from the output cache while the resolution's version stamp is unchanged.
    /// Unknown resolution or axis names are only rejected once the chart type is known
    /// to exist.
    pub fn chart(&self, chart: &str, bin: &str, axis: &str) -> Result<Bytes, ChartError> {
        let parsed = match (Resolution::parse(bin), Axis::parse(axis)) {
            (Some(resolution), Some(axis)) => Some(Bin { resolution, axis }),
            _ => None,
        };

        let key = parsed.map(|bin| CacheKey {
            chart: chart.to_string(),
            bin,
        });
        if let Some(key) = &key {
            if let Some(entry) = self.cache.get(key) {
                if entry.stamp == self.version_stamp(key.bin.resolution) {
                    return Ok(entry.payload);
                }
            }
        }

        let maker = self
            .makers
            .get(chart)
            .ok_or_else(|| ChartError::UnknownChart(chart.to_string()))?;
        let key = key.ok_or_else(|| ChartError::invalid_bin(chart, bin, axis))?;

        // The stamp is read under the same lock as the data it describes, so a payload
        // is never filed under a newer stamp than its contents.
        let (made, stamp) = {
            let data = self.data.read();
            (maker.make(&data, key.bin), stamp_of(&data, key.bin.resolution))
        };
        let payload = Bytes::from(made.map_err(|e| match e {
            MakeError::Unsupported => ChartError::invalid_bin(chart, bin, axis),
            MakeError::Encode(e) => ChartError::Encode(format!("{}: {}", chart, e)),
        })?);

        self.cache.insert(key, CacheEntry {
            stamp,
            payload: payload.clone(),
        });
        Ok(payload)
    }

    /// Brings the Blocks bucket up to date from every updater, then rolls up days.
    ///
    /// Cycles are single-flight: a second caller waits for the running cycle to finish.
    /// The first failing updater aborts the cycle; earlier updaters stay applied, which
    /// is safe because appends skip rows already present.
    pub async fn run_update(&self) -> Result<(), UpdateError> {
        let _single_flight = self.update_lock.lock().await;
        self.update_locked().await
    }

    /// One update cycle. Callers hold `update_lock`.
    async fn update_locked(&self) -> Result<(), UpdateError> {
        let started = Instant::now();

        for updater in &self.updaters {
            let tag = updater.tag();
            let before = self.data.read().epoch();

            let Fetched { rows, release } =
                updater.fetch_any().await.map_err(|source| UpdateError::Fetch {
                    tag: tag.to_string(),
                    source,
                })?;

            let applied = self.apply(updater.as_ref(), before, rows);
            drop(release);
            applied?;
        }

        let added = self.data.write().roll_up_days()?;
        *self.last_update.lock() = Some(Utc::now());

        info!(
            "{}: chart update finished in {:?} (height {:?}, {} new day(s))",
            self.chain,
            started.elapsed(),
            self.height(),
            added
        );
        Ok(())
    }

    fn apply(&self, updater: &dyn DynUpdater, before: u64, rows: AnyRows) -> Result<(), UpdateError> {
        let tag = updater.tag();
        let mut data = self.data.write();

        let after = data.epoch();
        if after != before {
            return Err(UpdateError::StaleState {
                tag: tag.to_string(),
                before,
                after,
            });
        }

        let api_before = data.api_len();
        let result = updater.append_any(&mut data, rows);

        data.blocks.repair(&self.chain);
        data.refresh_blocks_stamp();
        if data.api_len() != api_before {
            data.bump_days_stamp();
        }

        result.map_err(|source| UpdateError::Append {
            tag: tag.to_string(),
            source,
        })
    }

    /// Runs an update unless one completed within the cooldown. Returns whether a
    /// cycle ran.
    ///
    /// The cooldown is checked after taking the update lock, so a caller that queued
    /// behind a running cycle sees that cycle's completion and skips.
    pub async fn trigger_update(&self) -> Result<bool, UpdateError> {
        let _single_flight = self.update_lock.lock().await;
        if let Some(last) = self.last_update() {
            if Utc::now() - last < Duration::hours(UPDATE_COOLDOWN_HOURS) {
                debug!("{}: updated at {}, skipping", self.chain, last);
                return Ok(false);
            }
        }
        self.update_locked().await.map(|_| true)
    }
}

fn stamp_of(data: &ChartData, resolution: Resolution) -> u64 {
    match resolution {
        Resolution::Block => data.blocks_stamp(),
        Resolution::Day => data.days_stamp(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::charts::bucket::tests::record;
    use crate::charts::bucket::{BlockRecord, Metric};
    use crate::charts::makers::BLOCK_SIZE;
    use crate::charts::reorg::ReorgNotice;
    use crate::charts::rollup::DAY;

    pub(crate) fn params(family: ChainFamily) -> StoreParams {
        StoreParams {
            chain: "test".to_string(),
            family,
            expected_height: 16,
            target_block_time: 600,
            synced_height: 0,
            disable_db_sync: false,
        }
    }

    /// Serves whatever blocks were queued since the last fetch.
    #[derive(Clone, Default)]
    pub(crate) struct QueueFeed {
        pub(crate) queue: Arc<Mutex<Vec<BlockRecord>>>,
        pub(crate) releases: Arc<AtomicUsize>,
        pub(crate) fail: Arc<Mutex<bool>>,
    }

    impl QueueFeed {
        pub(crate) fn push(&self, height: u64, time: u64) {
            self.queue.lock().push(BlockRecord {
                size: height + 1,
                ..record(height, time)
            });
        }
    }

    #[async_trait]
    impl Updater for QueueFeed {
        type Rows = Vec<BlockRecord>;

        fn tag(&self) -> &str {
            "queue"
        }

        async fn fetch(&self) -> anyhow::Result<Fetched<Self::Rows>> {
            if *self.fail.lock() {
                return Err(anyhow!("source offline"));
            }
            let rows = std::mem::take(&mut *self.queue.lock());
            let releases = self.releases.clone();
            Ok(Fetched::with_release(rows, move || {
                releases.fetch_add(1, Ordering::SeqCst);
            }))
        }

        fn append(&self, data: &mut ChartData, rows: Self::Rows) -> anyhow::Result<()> {
            for row in &rows {
                data.push_block(row)?;
            }
            Ok(())
        }
    }

    pub(crate) fn counting_store(calls: Arc<AtomicUsize>) -> ChartStore {
        let mut makers = MakerRegistry::standard();
        let inner = MakerRegistry::standard();
        makers.insert(BLOCK_SIZE, move |data: &ChartData, bin: Bin| {
            calls.fetch_add(1, Ordering::SeqCst);
            inner.get(BLOCK_SIZE).unwrap().make(data, bin)
        });
        ChartStore::new(params(ChainFamily::Standard)).with_makers(makers)
    }

    #[tokio::test]
    async fn test_update_appends_and_rolls_up() {
        let feed = QueueFeed::default();
        let mut store = ChartStore::new(params(ChainFamily::Standard));
        store.register_updater(feed.clone());

        for (h, t) in [0, 1000, DAY, DAY + 50].into_iter().enumerate() {
            feed.push(h as u64, t);
        }
        store.run_update().await.unwrap();

        assert_eq!(store.height(), Some(3));
        assert_eq!(store.version_stamp(Resolution::Block), DAY + 50);
        assert_eq!(store.version_stamp(Resolution::Day), 1);
        assert!(store.last_update().is_some());
        assert_eq!(feed.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chart_served_from_cache_until_stamp_moves() {
        let calls = Arc::new(AtomicUsize::new(0));
        let feed = QueueFeed::default();
        let mut store = counting_store(calls.clone());
        store.register_updater(feed.clone());

        for (h, t) in [0, 1000, DAY, DAY + 50].into_iter().enumerate() {
            feed.push(h as u64, t);
        }
        store.run_update().await.unwrap();

        let first = store.chart(BLOCK_SIZE, "day", "time").unwrap();
        let second = store.chart(BLOCK_SIZE, "day", "time").unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let block_before = store.chart(BLOCK_SIZE, "block", "time").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        feed.push(4, DAY + 90);
        store.run_update().await.unwrap();

        let block_after = store.chart(BLOCK_SIZE, "block", "time").unwrap();
        assert_ne!(block_before, block_after);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // No new day closed, so the day chart is still cached.
        store.chart(BLOCK_SIZE, "day", "time").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unknown_chart_is_not_cached() {
        let store = ChartStore::new(params(ChainFamily::Standard));
        assert_eq!(
            store.chart("not-a-real-chart", "block", "time"),
            Err(ChartError::UnknownChart("not-a-real-chart".to_string()))
        );
        store.cache.run_pending_tasks();
        assert_eq!(store.cache.entry_count(), 0);
    }

    #[test]
    fn test_invalid_bin_names_fall_through_to_maker() {
        let store = ChartStore::new(params(ChainFamily::Standard));
        let err = store.chart(BLOCK_SIZE, "week", "time").unwrap_err();
        assert!(matches!(err, ChartError::InvalidBin { .. }));
        assert!(err.is_not_found());

        let err = store.chart("duration-btw-blocks", "day", "time").unwrap_err();
        assert!(matches!(err, ChartError::InvalidBin { .. }));

        let err = store.chart("nope", "week", "time").unwrap_err();
        assert!(matches!(err, ChartError::UnknownChart(_)));
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_cycle() {
        let first = QueueFeed::default();
        let second = QueueFeed::default();
        let mut store = ChartStore::new(params(ChainFamily::Standard));
        store.register_updater(first.clone());
        store.register_updater(second.clone());

        first.push(0, 10);
        first.push(1, 20);
        *second.fail.lock() = true;

        let err = store.run_update().await.unwrap_err();
        assert!(matches!(err, UpdateError::Fetch { .. }));
        // The first updater stays applied and its blocks are stamped, but no rollup ran
        // and no update was recorded.
        assert_eq!(store.height(), Some(1));
        assert_eq!(store.version_stamp(Resolution::Block), 20);
        assert!(store.last_update().is_none());
        assert_eq!(first.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_block_charts_refresh_after_aborted_cycle() {
        let first = QueueFeed::default();
        let second = QueueFeed::default();
        let mut store = ChartStore::new(params(ChainFamily::Standard));
        store.register_updater(first.clone());
        store.register_updater(second.clone());

        first.push(0, 10);
        first.push(1, 20);
        store.run_update().await.unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&store.chart(BLOCK_SIZE, "block", "time").unwrap()).unwrap();
        assert_eq!(json["t"], serde_json::json!([10, 20]));

        first.push(2, 30);
        *second.fail.lock() = true;
        assert!(store.run_update().await.is_err());

        assert_eq!(store.version_stamp(Resolution::Block), 30);
        let json: serde_json::Value =
            serde_json::from_slice(&store.chart(BLOCK_SIZE, "block", "time").unwrap()).unwrap();
        assert_eq!(json["t"], serde_json::json!([10, 20, 30]));
        assert_eq!(json["size"], serde_json::json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_failed_append_is_repaired_and_reported() {
        let feed = QueueFeed::default();
        let mut store = ChartStore::new(params(ChainFamily::Privacy));
        store.register_updater(feed.clone());

        // Standard records lack the ring-size columns this chain carries.
        feed.push(0, 10);
        let err = store.run_update().await.unwrap_err();
        assert!(matches!(err, UpdateError::Append { .. }));
        store.with_data(|data| {
            assert_eq!(data.blocks.validate_lengths(), Ok(0));
            assert!(data.blocks.uint(Metric::RingSize).is_some());
        });
        assert_eq!(feed.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replayed_rows_are_skipped() {
        let feed = QueueFeed::default();
        let mut store = ChartStore::new(params(ChainFamily::Standard));
        store.register_updater(feed.clone());

        feed.push(0, 10);
        feed.push(1, 20);
        store.run_update().await.unwrap();
        feed.push(1, 20);
        feed.push(2, 30);
        store.run_update().await.unwrap();
        assert_eq!(store.height(), Some(2));
    }

    /// Blocks in fetch until released, counting overlapping fetches.
    struct GateFeed {
        gate: Arc<Notify>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Updater for GateFeed {
        type Rows = ();

        fn tag(&self) -> &str {
            "gate"
        }

        async fn fetch(&self) -> anyhow::Result<Fetched<()>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.gate.notified().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Fetched::new(()))
        }

        fn append(&self, _data: &mut ChartData, _rows: ()) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_updates_are_single_flight() {
        let gate = Arc::new(Notify::new());
        let peak = Arc::new(AtomicUsize::new(0));
        let mut store = ChartStore::new(params(ChainFamily::Standard));
        store.register_updater(GateFeed {
            gate: gate.clone(),
            active: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        });
        let store = Arc::new(store);

        let a = tokio::spawn({
            let store = store.clone();
            async move { store.run_update().await }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.run_update().await }
        });

        // Charts stay readable while a fetch is outstanding.
        tokio::task::yield_now().await;
        assert!(store.chart(BLOCK_SIZE, "block", "time").is_ok());

        for _ in 0..2 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            gate.notify_one();
        }
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    /// Holds each fetch until the gate opens, then serves the queued blocks.
    #[derive(Clone, Default)]
    struct GatedQueueFeed {
        queue: QueueFeed,
        gate: Arc<Notify>,
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Updater for GatedQueueFeed {
        type Rows = Vec<BlockRecord>;

        fn tag(&self) -> &str {
            "gated"
        }

        async fn fetch(&self) -> anyhow::Result<Fetched<Self::Rows>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.queue.fetch().await
        }

        fn append(&self, data: &mut ChartData, rows: Self::Rows) -> anyhow::Result<()> {
            self.queue.append(data, rows)
        }
    }

    #[tokio::test]
    async fn test_reorg_during_fetch_is_stale() {
        let feed = GatedQueueFeed::default();
        let mut store = ChartStore::new(params(ChainFamily::Standard));
        store.register_updater(feed.clone());
        let store = Arc::new(store);

        for h in 0..3 {
            feed.queue.push(h, 100 + h * 10);
        }
        feed.gate.notify_one();
        store.run_update().await.unwrap();

        feed.queue.push(3, 130);
        let update = tokio::spawn({
            let store = store.clone();
            async move { store.run_update().await }
        });
        while feed.fetches.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }

        store.handle_reorg(ReorgNotice {
            new_chain_height: 2,
            new_chain_length: 1,
        });
        feed.gate.notify_one();

        let err = update.await.unwrap().unwrap_err();
        assert!(matches!(err, UpdateError::StaleState { before: 0, after: 1, .. }));
        // The rows fetched against the old chain were dropped, but still released.
        assert_eq!(feed.queue.releases.load(Ordering::SeqCst), 2);
        assert_eq!(store.height(), Some(1));
    }

    #[tokio::test]
    async fn test_queued_trigger_sees_finished_cycle() {
        let feed = GatedQueueFeed::default();
        let mut store = ChartStore::new(params(ChainFamily::Standard));
        store.register_updater(feed.clone());
        let store = Arc::new(store);

        let spawn_trigger =
            |store: Arc<ChartStore>| tokio::spawn(async move { store.trigger_update().await });
        let a = spawn_trigger(store.clone());
        let b = spawn_trigger(store.clone());
        while feed.fetches.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }

        feed.gate.notify_one();
        let ran = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
        assert_eq!(ran.iter().filter(|r| **r).count(), 1);
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_trigger_update_is_rate_limited() {
        let feed = QueueFeed::default();
        let mut store = ChartStore::new(params(ChainFamily::Standard));
        store.register_updater(feed.clone());

        assert!(store.trigger_update().await.unwrap());
        feed.push(0, 10);
        assert!(!store.trigger_update().await.unwrap());
        assert_eq!(store.height(), None);

        store.run_update().await.unwrap();
        assert_eq!(store.height(), Some(0));
    }
}
