use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::charts::{BlockRecord, ChartData, Fetched, Metric, Updater};

/// One supplementary data point.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiPoint {
    pub metric: Metric,
    pub time: u64,
    pub value: f64,
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read feed {}", path.display()))?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: malformed row", path.display(), n + 1))
        })
        .collect()
}

/// Block feed backed by a file rewritten by an external syncer.
///
/// Every fetch reads the whole file; rows the store already holds are skipped on
/// append, so a rewritten file after a reorg is picked up from the common ancestor.
#[derive(Debug, Clone)]
pub struct BlockFileFeed {
    tag: String,
    path: PathBuf,
}

impl BlockFileFeed {
    pub fn new(chain: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            tag: format!("{}-blocks", chain),
            path: path.into(),
        }
    }
}

#[async_trait]
impl Updater for BlockFileFeed {
    type Rows = Vec<BlockRecord>;

    fn tag(&self) -> &str {
        &self.tag
    }

    async fn fetch(&self) -> Result<Fetched<Self::Rows>> {
        let rows: Vec<BlockRecord> = read_lines(&self.path).await?;
        debug!("{}: read {} block row(s)", self.tag, rows.len());
        Ok(Fetched::new(rows))
    }

    fn append(&self, data: &mut ChartData, rows: Self::Rows) -> Result<()> {
        let mut appended = 0;
        for row in &rows {
            if data
                .push_block(row)
                .with_context(|| format!("{}: block {}", self.tag, row.height))?
            {
                appended += 1;
            }
        }
        debug!("{}: appended {} new block(s)", self.tag, appended);
        Ok(())
    }
}

/// Supplementary series feed for chains charted from a remote API.
#[derive(Debug, Clone)]
pub struct ApiFileFeed {
    tag: String,
    path: PathBuf,
}

impl ApiFileFeed {
    pub fn new(chain: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            tag: format!("{}-api", chain),
            path: path.into(),
        }
    }
}

#[async_trait]
impl Updater for ApiFileFeed {
    type Rows = Vec<ApiPoint>;

    fn tag(&self) -> &str {
        &self.tag
    }

    async fn fetch(&self) -> Result<Fetched<Self::Rows>> {
        Ok(Fetched::new(read_lines(&self.path).await?))
    }

    fn append(&self, data: &mut ChartData, rows: Self::Rows) -> Result<()> {
        let appended = rows
            .iter()
            .filter(|p| data.push_api_point(p.metric, p.time, p.value))
            .count();
        debug!("{}: appended {} new point(s)", self.tag, appended);
        Ok(())
    }
}
