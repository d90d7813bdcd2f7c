//! Resolution buckets: equal-length parallel columns keyed by [`Metric`].
//!
//! Which columns exist is decided by the [`ChainFamily`] when the bucket is built.
//! A chart asking for a column the family does not carry gets `None` back rather than
//! a run of zeros.

use std::collections::BTreeMap;
use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::series::{Column, Kind, Series, Value};

/// Every column a bucket may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Height,
    Time,
    Size,
    TotalSize,
    TxCount,
    Reward,
    Fees,
    Difficulty,
    Hashrate,
    RingSize,
    AvgRingSize,
}

/// How a block column folds into a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Index of the last block of the day.
    LastIndex,
    /// Midnight that opens the day.
    DayStart,
    Sum,
    Mean,
}

impl Metric {
    pub fn kind(self) -> Kind {
        match self {
            Metric::Difficulty | Metric::Hashrate | Metric::AvgRingSize => Kind::Float,
            _ => Kind::Uint,
        }
    }

    pub fn aggregation(self) -> Aggregation {
        match self {
            Metric::Height => Aggregation::LastIndex,
            Metric::Time => Aggregation::DayStart,
            Metric::Difficulty | Metric::Hashrate | Metric::AvgRingSize => Aggregation::Mean,
            Metric::Size
            | Metric::TotalSize
            | Metric::TxCount
            | Metric::Reward
            | Metric::Fees
            | Metric::RingSize => Aggregation::Sum,
        }
    }

    /// Column kind in the Days bucket. Averages are always floating.
    pub fn day_kind(self) -> Kind {
        match self.aggregation() {
            Aggregation::Mean => Kind::Float,
            _ => self.kind(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Height => "height",
            Metric::Time => "time",
            Metric::Size => "size",
            Metric::TotalSize => "total_size",
            Metric::TxCount => "tx_count",
            Metric::Reward => "reward",
            Metric::Fees => "fees",
            Metric::Difficulty => "difficulty",
            Metric::Hashrate => "hashrate",
            Metric::RingSize => "ring_size",
            Metric::AvgRingSize => "avg_ring_size",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const STANDARD_METRICS: &[Metric] = &[
    Metric::Height,
    Metric::Time,
    Metric::Size,
    Metric::TxCount,
    Metric::Reward,
    Metric::Fees,
    Metric::Difficulty,
    Metric::Hashrate,
];

const PRIVACY_EXTENSIONS: &[Metric] = &[Metric::TotalSize, Metric::RingSize, Metric::AvgRingSize];

/// Chain families decide both the column set and the chart registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    #[default]
    Standard,
    /// Chains with ring-signature privacy.
    Privacy,
}

impl ChainFamily {
    pub fn block_metrics(self) -> Vec<Metric> {
        let mut metrics = STANDARD_METRICS.to_vec();
        if self == ChainFamily::Privacy {
            metrics.extend_from_slice(PRIVACY_EXTENSIONS);
        }
        metrics
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChainFamily::Standard => "standard",
            ChainFamily::Privacy => "privacy",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BucketError {
    #[error("block {height} has no value for column {metric}")]
    MissingValue { metric: Metric, height: u64 },
    #[error("block {height} arrived but the bucket expects height {expected}")]
    HeightGap { height: u64, expected: u64 },
    #[error("column {0} is not carried by this bucket")]
    MissingColumn(Metric),
    #[error("column {metric} expects {expected:?} values")]
    WrongKind { metric: Metric, expected: Kind },
}

/// Column lengths disagree. `shortest` is what the bucket should be snipped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("column lengths range from {shortest} to {longest}")]
pub struct LengthMismatch {
    pub shortest: usize,
    pub longest: usize,
}

/// One block as handed over by a block feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub height: u64,
    pub time: u64,
    pub size: u64,
    pub tx_count: u64,
    pub reward: u64,
    pub fees: u64,
    pub difficulty: f64,
    pub hashrate: f64,
    #[serde(default)]
    pub total_size: Option<u64>,
    #[serde(default)]
    pub ring_size: Option<u64>,
    #[serde(default)]
    pub avg_ring_size: Option<f64>,
}

impl BlockRecord {
    pub fn value(&self, metric: Metric) -> Option<Value> {
        match metric {
            Metric::Height => Some(Value::Uint(self.height)),
            Metric::Time => Some(Value::Uint(self.time)),
            Metric::Size => Some(Value::Uint(self.size)),
            Metric::TxCount => Some(Value::Uint(self.tx_count)),
            Metric::Reward => Some(Value::Uint(self.reward)),
            Metric::Fees => Some(Value::Uint(self.fees)),
            Metric::Difficulty => Some(Value::Float(self.difficulty)),
            Metric::Hashrate => Some(Value::Float(self.hashrate)),
            Metric::TotalSize => self.total_size.map(Value::Uint),
            Metric::RingSize => self.ring_size.map(Value::Uint),
            Metric::AvgRingSize => self.avg_ring_size.map(Value::Float),
        }
    }
}

/// A set of equal-length columns sharing one index space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    columns: BTreeMap<Metric, Column>,
}

impl Bucket {
    /// Per-block bucket for `family`.
    pub fn blocks(family: ChainFamily, capacity: usize) -> Self {
        Self::from_schema(
            family.block_metrics().into_iter().map(|m| (m, m.kind())),
            capacity,
        )
    }

    /// Per-day bucket for `family`.
    pub fn days(family: ChainFamily, capacity: usize) -> Self {
        Self::from_schema(
            family
                .block_metrics()
                .into_iter()
                .map(|m| (m, m.day_kind())),
            capacity,
        )
    }

    fn from_schema(schema: impl Iterator<Item = (Metric, Kind)>, capacity: usize) -> Self {
        Self {
            columns: schema
                .map(|(metric, kind)| (metric, Column::new(kind, capacity)))
                .collect(),
        }
    }

    /// Number of entries, read off the height column.
    pub fn len(&self) -> usize {
        self.columns
            .get(&Metric::Height)
            .map(Column::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> impl Iterator<Item = Metric> + '_ {
        self.columns.keys().copied()
    }

    pub fn has(&self, metric: Metric) -> bool {
        self.columns.contains_key(&metric)
    }

    pub fn column(&self, metric: Metric) -> Option<&Column> {
        self.columns.get(&metric)
    }

    pub fn uint(&self, metric: Metric) -> Option<&Series<u64>> {
        self.column(metric).and_then(Column::as_uint)
    }

    pub fn float(&self, metric: Metric) -> Option<&Series<f64>> {
        self.column(metric).and_then(Column::as_float)
    }

    /// Time of the last entry, or 0 for an empty bucket.
    pub fn last_time(&self) -> u64 {
        self.uint(Metric::Time)
            .and_then(Series::last)
            .unwrap_or(0)
    }

    /// Same column set and kinds as `other`.
    pub fn same_shape(&self, other: &Bucket) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .all(|(m, c)| other.column(*m).map(Column::kind) == Some(c.kind()))
    }

    /// Truncates every column to `len` entries.
    pub fn snip(&mut self, len: usize) {
        for column in self.columns.values_mut() {
            column.snip(len);
        }
    }

    /// Shortest column length, or the spread when columns disagree.
    pub fn validate_lengths(&self) -> Result<usize, LengthMismatch> {
        let mut lengths = self.columns.values().map(Column::len);
        let first = match lengths.next() {
            Some(len) => len,
            None => return Ok(0),
        };
        let (shortest, longest) = lengths.fold((first, first), |(lo, hi), len| {
            (lo.min(len), hi.max(len))
        });
        if shortest == longest {
            Ok(shortest)
        } else {
            Err(LengthMismatch { shortest, longest })
        }
    }

    /// Snips back to the shortest column after a partially applied write.
    /// Returns true when anything had to be cut.
    pub fn repair(&mut self, label: &str) -> bool {
        match self.validate_lengths() {
            Ok(_) => false,
            Err(mismatch) => {
                warn!(
                    "{} bucket out of step ({}), snipping to {}",
                    label, mismatch, mismatch.shortest
                );
                self.snip(mismatch.shortest);
                true
            },
        }
    }

    /// Appends one block. Heights already present are skipped so feeds can replay.
    /// Returns whether the record was appended.
    pub fn push_block(&mut self, record: &BlockRecord) -> Result<bool, BucketError> {
        let expected = self.len() as u64;
        if record.height < expected {
            return Ok(false);
        }
        if record.height > expected {
            return Err(BucketError::HeightGap {
                height: record.height,
                expected,
            });
        }
        for (metric, column) in self.columns.iter_mut() {
            let value = record.value(*metric).ok_or(BucketError::MissingValue {
                metric: *metric,
                height: record.height,
            })?;
            column.push(value).map_err(|_| BucketError::WrongKind {
                metric: *metric,
                expected: column.kind(),
            })?;
        }
        Ok(true)
    }

    pub(crate) fn push_value(&mut self, metric: Metric, value: Value) -> Result<(), BucketError> {
        let column = self
            .columns
            .get_mut(&metric)
            .ok_or(BucketError::MissingColumn(metric))?;
        column.push(value).map_err(|expected| BucketError::WrongKind {
            metric,
            expected: match expected {
                Kind::Float => Kind::Uint,
                Kind::Uint => Kind::Float,
            },
        })
    }
}

/// A remotely sourced `(time, value)` series for one metric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiSeries {
    pub time: Series<u64>,
    pub value: Series<f64>,
}

impl ApiSeries {
    pub fn len(&self) -> usize {
        self.time.len().min(self.value.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a point unless its time does not move the series forward.
    pub fn push(&mut self, time: u64, value: f64) -> bool {
        if self.time.last().is_some_and(|last| time <= last) {
            return false;
        }
        self.time.push(time);
        self.value.push(value);
        true
    }
}
