//! Job to bring one chain's chart store up to date.
//!
//! Rate-limited chains go through `trigger_update`, which skips the cycle when the
//! store was updated within the last day.

use anyhow::Result;
use log::debug;

use crate::charts::ChartStore;

pub async fn run(store: &ChartStore, rate_limited: bool) -> Result<()> {
    let start = std::time::Instant::now();

    let ran = if rate_limited {
        store.trigger_update().await?
    } else {
        store.run_update().await?;
        true
    };

    if ran {
        debug!(
            "Completed update_charts job for {} in {:?}",
            store.chain(),
            start.elapsed()
        );
    }
    Ok(())
}
