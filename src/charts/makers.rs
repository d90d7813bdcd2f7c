//! Chart makers and the per-family registry that dispatches to them.
//!
//! A maker reads the buckets under the store's read lock and encodes a JSON object
//! holding one axis array (`"t"` for time, `"h"` for height) and one or more metric
//! arrays.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{Map, Value as Json};
use thiserror::Error;

use super::bucket::{Bucket, ChainFamily, Metric};
use super::data::ChartData;
use super::series::Column;

pub const BLOCK_SIZE: &str = "block-size";
pub const BLOCKCHAIN_SIZE: &str = "blockchain-size";
pub const TX_COUNT: &str = "tx-count";
pub const REWARD: &str = "reward";
pub const FEES: &str = "fees";
pub const COIN_SUPPLY: &str = "coin-supply";
pub const POW_DIFFICULTY: &str = "pow-difficulty";
pub const HASHRATE: &str = "hashrate";
pub const DURATION_BTW_BLOCKS: &str = "duration-btw-blocks";
pub const RING_SIZE: &str = "ring-size";
pub const AVG_RING_SIZE: &str = "avg-ring-size";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Block,
    Day,
}

impl Resolution {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "block" => Some(Resolution::Block),
            "day" => Some(Resolution::Day),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Block => "block",
            Resolution::Day => "day",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Time,
    Height,
}

impl Axis {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "time" => Some(Axis::Time),
            "height" => Some(Axis::Height),
            _ => None,
        }
    }

    /// Key of the axis array in an encoded chart.
    pub fn key(self) -> &'static str {
        match self {
            Axis::Time => "t",
            Axis::Height => "h",
        }
    }

    fn metric(self) -> Metric {
        match self {
            Axis::Time => Metric::Time,
            Axis::Height => Metric::Height,
        }
    }
}

/// A resolution and axis pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bin {
    pub resolution: Resolution,
    pub axis: Axis,
}

#[derive(Debug, Error)]
pub enum MakeError {
    /// The chart has nothing for this bin on this chain.
    #[error("chart not available for this bin")]
    Unsupported,
    #[error("failed to encode chart: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait ChartMaker: Send + Sync {
    fn make(&self, data: &ChartData, bin: Bin) -> Result<Vec<u8>, MakeError>;
}

impl<F> ChartMaker for F
where
    F: Fn(&ChartData, Bin) -> Result<Vec<u8>, MakeError> + Send + Sync,
{
    fn make(&self, data: &ChartData, bin: Bin) -> Result<Vec<u8>, MakeError> {
        self(data, bin)
    }
}

fn bucket(data: &ChartData, resolution: Resolution) -> &Bucket {
    match resolution {
        Resolution::Block => &data.blocks,
        Resolution::Day => &data.days,
    }
}

fn column(bucket: &Bucket, metric: Metric) -> Result<&Column, MakeError> {
    bucket.column(metric).ok_or(MakeError::Unsupported)
}

fn encode(axis: Axis, axis_values: Json, fields: Vec<(&str, Json)>) -> Result<Vec<u8>, MakeError> {
    let mut object = Map::with_capacity(fields.len() + 1);
    object.insert(axis.key().to_string(), axis_values);
    for (key, values) in fields {
        object.insert(key.to_string(), values);
    }
    serde_json::to_vec(&Json::Object(object)).map_err(MakeError::Encode)
}

/// Supplementary charts only exist per day on a time axis.
fn api_bin(bin: Bin) -> Result<(), MakeError> {
    match bin {
        Bin {
            resolution: Resolution::Day,
            axis: Axis::Time,
        } => Ok(()),
        _ => Err(MakeError::Unsupported),
    }
}

/// One column plotted as is.
struct MetricChart {
    metric: Metric,
}

impl ChartMaker for MetricChart {
    fn make(&self, data: &ChartData, bin: Bin) -> Result<Vec<u8>, MakeError> {
        let key = self.metric.as_str();
        if data.use_api {
            api_bin(bin)?;
            let series = data.api.get(&self.metric).ok_or(MakeError::Unsupported)?;
            return encode(
                bin.axis,
                Json::from(series.time.as_slice().to_vec()),
                vec![(key, Json::from(series.value.as_slice().to_vec()))],
            );
        }
        let bucket = bucket(data, bin.resolution);
        encode(
            bin.axis,
            column(bucket, bin.axis.metric())?.to_json(),
            vec![(key, column(bucket, self.metric)?.to_json())],
        )
    }
}

/// Running total of one column. `block_column`, when the chain carries it, already
/// holds the running total per block and is read directly.
struct CumulativeChart {
    metric: Metric,
    key: &'static str,
    block_column: Option<Metric>,
}

impl ChartMaker for CumulativeChart {
    fn make(&self, data: &ChartData, bin: Bin) -> Result<Vec<u8>, MakeError> {
        if data.use_api {
            api_bin(bin)?;
            let series = data.api.get(&self.metric).ok_or(MakeError::Unsupported)?;
            return encode(
                bin.axis,
                Json::from(series.time.as_slice().to_vec()),
                vec![(self.key, Json::from(series.value.accumulate()))],
            );
        }
        let bucket = bucket(data, bin.resolution);
        let values = match (bin.resolution, self.block_column) {
            (Resolution::Block, Some(metric)) => column(bucket, metric)?.to_json(),
            _ => column(bucket, self.metric)?.accumulated_json(),
        };
        encode(
            bin.axis,
            column(bucket, bin.axis.metric())?.to_json(),
            vec![(self.key, values)],
        )
    }
}

/// Seconds between consecutive blocks, plotted at the later block.
struct BlockDurationChart;

impl ChartMaker for BlockDurationChart {
    fn make(&self, data: &ChartData, bin: Bin) -> Result<Vec<u8>, MakeError> {
        if data.use_api || bin.resolution != Resolution::Block {
            return Err(MakeError::Unsupported);
        }
        let times = data
            .blocks
            .uint(Metric::Time)
            .ok_or(MakeError::Unsupported)?
            .as_slice();
        let durations: Vec<u64> = times
            .windows(2)
            .map(|pair| pair[1].saturating_sub(pair[0]))
            .collect();
        let axis: Vec<u64> = data
            .blocks
            .uint(bin.axis.metric())
            .ok_or(MakeError::Unsupported)?
            .as_slice()
            .iter()
            .skip(1)
            .copied()
            .collect();
        encode(
            bin.axis,
            Json::from(axis),
            vec![("duration", Json::from(durations))],
        )
    }
}

/// Chart type name to maker.
#[derive(Clone, Default)]
pub struct MakerRegistry {
    makers: FxHashMap<String, Arc<dyn ChartMaker>>,
}

impl MakerRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.insert(BLOCK_SIZE, MetricChart {
            metric: Metric::Size,
        });
        registry.insert(BLOCKCHAIN_SIZE, CumulativeChart {
            metric: Metric::Size,
            key: "size",
            block_column: None,
        });
        registry.insert(TX_COUNT, MetricChart {
            metric: Metric::TxCount,
        });
        registry.insert(REWARD, MetricChart {
            metric: Metric::Reward,
        });
        registry.insert(FEES, MetricChart {
            metric: Metric::Fees,
        });
        registry.insert(COIN_SUPPLY, CumulativeChart {
            metric: Metric::Reward,
            key: "supply",
            block_column: None,
        });
        registry.insert(POW_DIFFICULTY, MetricChart {
            metric: Metric::Difficulty,
        });
        registry.insert(HASHRATE, MetricChart {
            metric: Metric::Hashrate,
        });
        registry.insert(DURATION_BTW_BLOCKS, BlockDurationChart);
        registry
    }

    pub fn privacy() -> Self {
        let mut registry = Self::standard();
        registry.insert(BLOCKCHAIN_SIZE, CumulativeChart {
            metric: Metric::Size,
            key: "size",
            block_column: Some(Metric::TotalSize),
        });
        registry.insert(RING_SIZE, MetricChart {
            metric: Metric::RingSize,
        });
        registry.insert(AVG_RING_SIZE, MetricChart {
            metric: Metric::AvgRingSize,
        });
        registry
    }

    pub fn for_family(family: ChainFamily) -> Self {
        match family {
            ChainFamily::Standard => Self::standard(),
            ChainFamily::Privacy => Self::privacy(),
        }
    }

    /// Registers `maker` under `name`, replacing any previous maker.
    pub fn insert(&mut self, name: &str, maker: impl ChartMaker + 'static) {
        self.makers.insert(name.to_string(), Arc::new(maker));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChartMaker>> {
        self.makers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.makers.keys().map(String::as_str)
    }
}

impl fmt::Debug for MakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("MakerRegistry").field("charts", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::bucket::tests::{privacy_record, record};
    use crate::charts::bucket::BlockRecord;
    use crate::charts::rollup::DAY;

    const BLOCK_TIME: Bin = Bin {
        resolution: Resolution::Block,
        axis: Axis::Time,
    };
    const DAY_TIME: Bin = Bin {
        resolution: Resolution::Day,
        axis: Axis::Time,
    };

    fn standard_data() -> ChartData {
        let mut data = ChartData::new(ChainFamily::Standard, false, 4, 1);
        for (h, time) in [0, 1000, DAY, DAY + 100].into_iter().enumerate() {
            data.push_block(&BlockRecord {
                size: 10 * (h as u64 + 1),
                ..record(h as u64, time)
            })
            .unwrap();
        }
        data.roll_up_days().unwrap();
        data
    }

    fn decode(bytes: Vec<u8>) -> Json {
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(Resolution::parse("day"), Some(Resolution::Day));
        assert_eq!(Resolution::parse("week"), None);
        assert_eq!(Axis::parse("height"), Some(Axis::Height));
        assert_eq!(Axis::parse("t"), None);
    }

    #[test]
    fn test_block_size_by_block_and_day() {
        let data = standard_data();
        let registry = MakerRegistry::standard();
        let maker = registry.get(BLOCK_SIZE).unwrap();

        let json = decode(maker.make(&data, BLOCK_TIME).ok().unwrap());
        assert_eq!(json["t"], serde_json::json!([0, 1000, DAY, DAY + 100]));
        assert_eq!(json["size"], serde_json::json!([10, 20, 30, 40]));

        let json = decode(
            maker
                .make(&data, Bin {
                    resolution: Resolution::Day,
                    axis: Axis::Height,
                })
                .ok()
                .unwrap(),
        );
        assert_eq!(json["h"], serde_json::json!([1]));
        assert_eq!(json["size"], serde_json::json!([30]));
    }

    #[test]
    fn test_cumulative_and_duration_charts() {
        let data = standard_data();
        let registry = MakerRegistry::standard();

        let json = decode(registry.get(BLOCKCHAIN_SIZE).unwrap().make(&data, BLOCK_TIME).ok().unwrap());
        assert_eq!(json["size"], serde_json::json!([10, 30, 60, 100]));

        let duration = registry.get(DURATION_BTW_BLOCKS).unwrap();
        let json = decode(duration.make(&data, BLOCK_TIME).ok().unwrap());
        assert_eq!(json["t"], serde_json::json!([1000, DAY, DAY + 100]));
        assert_eq!(json["duration"], serde_json::json!([1000, DAY - 1000, 100]));
        assert!(matches!(duration.make(&data, DAY_TIME), Err(MakeError::Unsupported)));
    }

    #[test]
    fn test_privacy_columns_not_read_as_zero_on_standard_chain() {
        let data = standard_data();
        assert!(MakerRegistry::standard().get(RING_SIZE).is_none());

        let ring = MakerRegistry::privacy().get(RING_SIZE).unwrap();
        assert!(matches!(ring.make(&data, BLOCK_TIME), Err(MakeError::Unsupported)));
    }

    #[test]
    fn test_privacy_blockchain_size_reads_total_size() {
        let mut data = ChartData::new(ChainFamily::Privacy, false, 2, 1);
        data.push_block(&privacy_record(0, 10)).unwrap();
        data.push_block(&privacy_record(1, 20)).unwrap();

        let maker = MakerRegistry::privacy().get(BLOCKCHAIN_SIZE).unwrap();
        let json = decode(maker.make(&data, BLOCK_TIME).ok().unwrap());
        assert_eq!(json["size"], serde_json::json!([100, 200]));
    }

    #[test]
    fn test_api_series_replace_days() {
        let mut data = standard_data();
        data.use_api = true;
        data.push_api_point(Metric::Size, DAY, 5.0);
        data.push_api_point(Metric::Size, 2 * DAY, 7.0);

        let registry = MakerRegistry::standard();
        let json = decode(registry.get(BLOCK_SIZE).unwrap().make(&data, DAY_TIME).ok().unwrap());
        assert_eq!(json["t"], serde_json::json!([DAY, 2 * DAY]));
        assert_eq!(json["size"], serde_json::json!([5.0, 7.0]));

        let json = decode(registry.get(BLOCKCHAIN_SIZE).unwrap().make(&data, DAY_TIME).ok().unwrap());
        assert_eq!(json["size"], serde_json::json!([5.0, 12.0]));

        assert!(matches!(
            registry.get(BLOCK_SIZE).unwrap().make(&data, BLOCK_TIME),
            Err(MakeError::Unsupported)
        ));
        assert!(matches!(
            registry.get(FEES).unwrap().make(&data, DAY_TIME),
            Err(MakeError::Unsupported)
        ));
    }

    #[test]
    fn test_make_error_is_a_std_error() {
        let err: anyhow::Error = MakeError::Unsupported.into();
        assert_eq!(err.to_string(), "chart not available for this bin");

        let json_err = serde_json::from_str::<Json>("{").unwrap_err();
        let err = MakeError::from(json_err);
        assert!(err.to_string().starts_with("failed to encode chart: "));
        assert!(std::error::Error::source(&err).is_some());
    }
}
