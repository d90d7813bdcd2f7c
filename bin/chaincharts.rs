use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use chaincharts::{ChainManager, CronScheduler, CronSettings, Settings};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("Failed to install logger")?;

    // Load configuration
    let settings = Settings::new()
        .context("Failed to load config.yaml. Please ensure it exists and is valid")?;

    // Build one chart store per chain, restore snapshots and catch up
    let chains = Arc::new(ChainManager::new(&settings));
    chains.load_all().await;

    let cancellation_token = CancellationToken::new();

    let cron_scheduler = CronScheduler::new(chains.clone(), CronSettings::default());

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    info!("Cron scheduler started - chart stores will update periodically");

    wait_for_shutdown(&chains).await?;

    info!("Finishing all tasks...");
    cancellation_token.cancel();

    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    info!("Dumping chart snapshots...");
    chains.dump_all().await;

    info!("Shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM. SIGUSR1 forces an update of every chain.
#[cfg(unix)]
async fn wait_for_shutdown(chains: &Arc<ChainManager>) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm_stream =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigusr1_stream =
        signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;

    info!("Chart stores running. Press Ctrl+C to stop, send SIGUSR1 to force an update.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
                return Ok(());
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
                return Ok(());
            },
            _ = sigusr1_stream.recv() => {
                info!("Received SIGUSR1, updating all chart stores...");
                chains.spawn_update_all();
            },
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_chains: &Arc<ChainManager>) -> anyhow::Result<()> {
    info!("Chart stores running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
    Ok(())
}
