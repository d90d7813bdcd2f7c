use thiserror::Error;

use super::rollup::RollupError;

/// Errors returned to chart queries. Neither touches store state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChartError {
    #[error("unknown chart {0}")]
    UnknownChart(String),
    #[error("chart {chart} has no {bin} bin on a {axis} axis")]
    InvalidBin {
        chart: String,
        bin: String,
        axis: String,
    },
    #[error("failed to encode chart {0}")]
    Encode(String),
}

impl ChartError {
    pub(crate) fn invalid_bin(chart: &str, bin: &str, axis: &str) -> Self {
        ChartError::InvalidBin {
            chart: chart.to_string(),
            bin: bin.to_string(),
            axis: axis.to_string(),
        }
    }

    /// Whether the HTTP layer should answer "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChartError::UnknownChart(_) | ChartError::InvalidBin { .. })
    }
}

/// Errors that abort an update cycle.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("{tag}: fetch failed: {source:#}")]
    Fetch {
        tag: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{tag}: store rewritten while fetching (epoch {before} -> {after})")]
    StaleState { tag: String, before: u64, after: u64 },
    #[error("{tag}: append failed: {source:#}")]
    Append {
        tag: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("day rollup failed: {0}")]
    Rollup(#[from] RollupError),
}
