//! Cron scheduler for periodic chart updates.
//!
//! Registers one repeated job per configured chain, at the chain's own interval.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::chains::{ChainManager, ManagedChain};

use super::jobs;

/// Cron scheduler that keeps every chart store current.
pub struct CronScheduler {
    chains: Arc<ChainManager>,
    settings: Arc<CronSettings>,
}

/// Configuration shared by all chart jobs
#[derive(Debug, Clone)]
pub struct CronSettings {
    /// Floor applied to per-chain update intervals - default 10 seconds
    pub min_update_interval_secs: u64,
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            min_update_interval_secs: 10,
        }
    }
}

impl CronScheduler {
    pub fn new(chains: Arc<ChainManager>, settings: CronSettings) -> Self {
        Self {
            chains,
            settings: Arc::new(settings),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        let mut count = 0;
        for chain in self.chains.chains() {
            self.register_update_charts_job(&scheduler, chain).await?;
            count += 1;
        }

        // Start the scheduler
        scheduler.start().await?;
        info!("Cron scheduler started with {} jobs", count);

        // Wait for cancellation
        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_update_charts_job(
        &self,
        scheduler: &JobScheduler,
        chain: &ManagedChain,
    ) -> Result<()> {
        let store = chain.store.clone();
        let rate_limited = chain.settings.rate_limited;
        let interval = chain
            .settings
            .update_interval_secs
            .max(self.settings.min_update_interval_secs);

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let store = store.clone();
                Box::pin(async move {
                    if let Err(e) = jobs::update_charts::run(&store, rate_limited).await {
                        error!("Failed to update charts for {}: {:#}", store.chain(), e);
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!(
            "Registered update_charts job for {} (every {}s{})",
            chain.settings.name,
            interval,
            if rate_limited { ", at most daily" } else { "" }
        );
        Ok(())
    }
}
