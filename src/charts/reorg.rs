use std::sync::Arc;

use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::data::ChartData;
use super::store::ChartStore;

/// Day entries dropped on every reorg. A shallow reorg touches at most the last two days.
const REORG_DAYS_DROPPED: usize = 2;

/// Chain reorganization reported by the chain monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorgNotice {
    pub new_chain_height: i64,
    pub new_chain_length: usize,
}

impl ReorgNotice {
    pub fn common_ancestor(&self) -> i64 {
        let length = i64::try_from(self.new_chain_length).unwrap_or(i64::MAX);
        self.new_chain_height.saturating_sub(length)
    }
}

impl ChartData {
    /// Drops every block above the common ancestor and the last two days.
    /// Returns the number of blocks and days removed.
    pub fn truncate_for_reorg(&mut self, notice: &ReorgNotice) -> (usize, usize) {
        let keep = notice.common_ancestor().saturating_add(1).max(0) as usize;

        let blocks_before = self.blocks.len();
        self.blocks.snip(keep);
        let days_before = self.days.len();
        self.days
            .snip(days_before.saturating_sub(REORG_DAYS_DROPPED));

        self.blocks.repair("blocks");
        self.days.repair("days");

        let days_removed = days_before - self.days.len();
        if days_removed > 0 {
            self.bump_days_stamp();
        }
        self.refresh_blocks_stamp();
        self.bump_epoch();
        (blocks_before - self.blocks.len(), days_removed)
    }
}

impl ChartStore {
    /// Rolls the store back to the common ancestor of `notice`.
    pub fn handle_reorg(&self, notice: ReorgNotice) {
        let (blocks, days) = self.data.write().truncate_for_reorg(&notice);
        // Block stamps are times, which a replacement block can repeat.
        self.clear_cache();
        info!(
            "{}: reorg to height {} (ancestor {}), dropped {} block(s) and {} day(s)",
            self.chain(),
            notice.new_chain_height,
            notice.common_ancestor(),
            blocks,
            days
        );
    }
}

/// Applies reorg notices as they arrive, refetching after each one.
pub async fn run_reorg_listener(
    store: Arc<ChartStore>,
    mut notices: mpsc::Receiver<ReorgNotice>,
    cancellation_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                info!("{}: reorg listener stopping", store.chain());
                break;
            }
            notice = notices.recv() => {
                let Some(notice) = notice else {
                    info!("{}: reorg channel closed", store.chain());
                    break;
                };
                store.handle_reorg(notice);
                if let Err(e) = store.run_update().await {
                    error!("{}: update after reorg failed: {:#}", store.chain(), e);
                }
            }
        }
    }
}
