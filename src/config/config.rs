use std::path::PathBuf;

use config::{Config, ConfigError, File};
use serde::Deserialize;

use crate::charts::{ChainFamily, StoreParams};

/// Chart store configuration for one chain.
///
/// Heights and block time only size the in-memory columns; the feeds decide what
/// actually gets charted.
#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    pub name: String,
    #[serde(default)]
    pub family: ChainFamily,
    #[serde(default)]
    pub expected_height: u64,
    #[serde(default = "default_target_block_time")]
    pub target_block_time_secs: u64,
    #[serde(default)]
    pub synced_height: u64,
    /// Chart this chain from the API feed instead of rolled-up blocks.
    #[serde(default)]
    pub disable_db_sync: bool,
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
    /// Update at most once a day, for chains that are expensive to poll.
    #[serde(default)]
    pub rate_limited: bool,
    /// Newline-delimited JSON block rows
    #[serde(default)]
    pub blocks_feed: Option<PathBuf>,
    /// Newline-delimited JSON supplementary points
    #[serde(default)]
    pub api_feed: Option<PathBuf>,
}

fn default_target_block_time() -> u64 {
    600
}

fn default_update_interval() -> u64 {
    60
}

impl ChainSettings {
    pub fn store_params(&self) -> StoreParams {
        StoreParams {
            chain: self.name.clone(),
            family: self.family,
            expected_height: self.expected_height,
            target_block_time: self.target_block_time_secs,
            synced_height: self.synced_height,
            disable_db_sync: self.disable_db_sync,
        }
    }
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Directory holding one `<chain>.bin` snapshot per chain
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    pub chains: Vec<ChainSettings>,
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("config")
    }

    /// Loads settings from `name`, with or without its extension.
    pub fn from_file(name: &str) -> Result<Self, ConfigError> {
        let s = Config::builder().add_source(File::with_name(name)).build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }

    pub fn snapshot_path(&self, chain: &str) -> PathBuf {
        self.snapshot_dir.join(format!("{}.bin", chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "chains:\n  - name: main\n    expected_height: 800000\n  - name: ring\n    family: privacy\n    disable_db_sync: true\n    rate_limited: true\n    api_feed: ring.ndjson\n",
        )
        .unwrap();

        let settings = Settings::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.snapshot_dir, PathBuf::from("data"));
        assert_eq!(settings.snapshot_path("main"), PathBuf::from("data/main.bin"));

        let main = &settings.chains[0];
        assert_eq!(main.family, ChainFamily::Standard);
        assert_eq!(main.target_block_time_secs, 600);
        assert_eq!(main.update_interval_secs, 60);
        assert!(main.blocks_feed.is_none());
        assert_eq!(main.store_params().expected_height, 800_000);

        let ring = &settings.chains[1];
        assert_eq!(ring.family, ChainFamily::Privacy);
        assert!(ring.rate_limited);
        assert!(ring.store_params().disable_db_sync);
        assert_eq!(ring.api_feed, Some(PathBuf::from("ring.ndjson")));
    }
}
