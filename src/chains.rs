use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::task::JoinHandle;

use crate::{
    charts::ChartStore,
    config::{ChainSettings, Settings},
    feeds::{ApiFileFeed, BlockFileFeed},
};

/// A configured chain and its chart store
pub struct ManagedChain {
    pub settings: ChainSettings,
    pub store: Arc<ChartStore>,
    snapshot_path: PathBuf,
}

/// Owns one chart store per configured chain.
///
/// Built once at startup and handed to whatever serves the charts; stores are
/// reached through [`ChainManager::store`], never through globals.
pub struct ChainManager {
    chains: HashMap<String, ManagedChain>,
}

impl ChainManager {
    /// Builds every store and registers its feeds. Nothing is fetched yet.
    pub fn new(settings: &Settings) -> Self {
        let mut chains = HashMap::new();

        for config in &settings.chains {
            if chains.contains_key(&config.name) {
                warn!("Chain {} is configured twice, skipping", config.name);
                continue;
            }

            let mut store = ChartStore::new(config.store_params());
            if let Some(path) = &config.blocks_feed {
                store.register_updater(BlockFileFeed::new(&config.name, path));
            }
            if let Some(path) = &config.api_feed {
                store.register_updater(ApiFileFeed::new(&config.name, path));
            }
            if config.disable_db_sync && config.api_feed.is_none() {
                warn!(
                    "Chain {} charts from its API feed but none is configured",
                    config.name
                );
            }

            chains.insert(config.name.clone(), ManagedChain {
                settings: config.clone(),
                store: Arc::new(store),
                snapshot_path: settings.snapshot_path(&config.name),
            });
        }

        info!("ChainManager: built {} chart store(s)", chains.len());
        Self { chains }
    }

    pub fn store(&self, chain: &str) -> Option<Arc<ChartStore>> {
        self.chains.get(chain).map(|c| c.store.clone())
    }

    pub fn chains(&self) -> impl Iterator<Item = &ManagedChain> {
        self.chains.values()
    }

    /// Restores every store from its snapshot and brings it current.
    pub async fn load_all(&self) {
        for chain in self.chains.values() {
            if let Err(e) = chain.store.load(&chain.snapshot_path).await {
                error!(
                    "Initial chart update for {} failed: {:#}",
                    chain.settings.name, e
                );
            }
        }
    }

    /// Runs one update cycle on every store, ignoring rate limits.
    pub async fn update_all(&self) {
        for chain in self.chains.values() {
            if let Err(e) = chain.store.run_update().await {
                error!("Chart update for {} failed: {:#}", chain.settings.name, e);
            }
        }
    }

    /// Runs [`ChainManager::update_all`] in the background.
    pub fn spawn_update_all(self: &Arc<Self>) -> JoinHandle<()> {
        let chains = self.clone();
        tokio::spawn(async move { chains.update_all().await })
    }

    pub async fn dump_all(&self) {
        for chain in self.chains.values() {
            if let Err(e) = chain.store.dump(&chain.snapshot_path).await {
                error!(
                    "Failed to dump chart snapshot for {}: {:#}",
                    chain.settings.name, e
                );
            }
        }
    }
}
