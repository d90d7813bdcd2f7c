//! Day rollup: extends the Days bucket from blocks already in the Blocks bucket.
//!
//! Days are UTC calendar days. A day is only closed once a block from a later day has
//! been seen, so the day holding the most recent block always stays pending. Additive
//! columns are summed over the day, rate columns are averaged, and each day records the
//! index of its last block and its opening midnight.

use std::ops::Range;

use log::debug;
use thiserror::Error;

use super::bucket::{Aggregation, Bucket, BucketError, LengthMismatch, Metric};
use super::data::ChartData;
use super::series::{Series, Value};

pub const DAY: u64 = 86_400;

/// Midnight (UTC) at or before `t`.
pub fn day_floor(t: u64) -> u64 {
    t - t % DAY
}

#[derive(Debug, Error)]
pub enum RollupError {
    #[error("blocks bucket is inconsistent: {0}")]
    Blocks(LengthMismatch),
    #[error("days bucket is inconsistent after rollup: {0}")]
    Days(LengthMismatch),
    #[error(transparent)]
    Bucket(#[from] BucketError),
}

/// Block index ranges of every newly completed day, with the midnight opening each.
fn closed_days(times: &[u64], days: &Bucket) -> Vec<(Range<usize>, u64)> {
    let (first, last) = match (times.first(), times.last()) {
        (Some(first), Some(last)) if times.len() >= 2 => (*first, *last),
        _ => return Vec::new(),
    };

    let end = day_floor(last);
    let mut day_start = match days.uint(Metric::Time).and_then(Series::last) {
        Some(previous) => previous + DAY,
        None => day_floor(first),
    };
    if end <= day_start {
        return Vec::new();
    }

    let offset = match times.iter().position(|&t| t >= day_start) {
        Some(offset) => offset,
        None => return Vec::new(),
    };

    let mut intervals = Vec::new();
    let mut next = day_start + DAY;
    let mut interval_start = offset;
    for (i, &t) in times.iter().enumerate().skip(offset) {
        if t < next {
            continue;
        }
        // Days without blocks produce no entry.
        if i > interval_start {
            intervals.push((interval_start..i, day_start));
        }
        day_start = day_floor(t);
        next = day_start + DAY;
        interval_start = i;
        if day_start >= end {
            break;
        }
    }
    intervals
}

/// Appends every newly completed day to `days`. Returns the number of days appended.
pub fn roll_up(blocks: &Bucket, days: &mut Bucket) -> Result<usize, RollupError> {
    let shortest = blocks.validate_lengths().map_err(RollupError::Blocks)?;
    let times = match blocks.uint(Metric::Time) {
        Some(times) => &times.as_slice()[..shortest],
        None => return Ok(0),
    };

    let intervals = closed_days(times, days);
    let metrics: Vec<Metric> = days.metrics().collect();

    for (range, day_start) in &intervals {
        for &metric in &metrics {
            let value = match metric.aggregation() {
                Aggregation::LastIndex => Value::Uint((range.end - 1) as u64),
                Aggregation::DayStart => Value::Uint(*day_start),
                Aggregation::Sum => blocks
                    .column(metric)
                    .ok_or(BucketError::MissingColumn(metric))?
                    .sum(range.clone()),
                Aggregation::Mean => Value::Float(
                    blocks
                        .column(metric)
                        .ok_or(BucketError::MissingColumn(metric))?
                        .avg(range.clone()),
                ),
            };
            days.push_value(metric, value)?;
        }
    }

    days.validate_lengths().map_err(RollupError::Days)?;
    Ok(intervals.len())
}

impl ChartData {
    /// Runs the day rollup and refreshes both version stamps.
    ///
    /// On failure the Days bucket is snipped back into step and left stale; Blocks is
    /// untouched either way.
    pub fn roll_up_days(&mut self) -> Result<usize, RollupError> {
        let result = roll_up(&self.blocks, &mut self.days);
        match &result {
            Ok(0) => {},
            Ok(added) => {
                debug!("rolled up {} new day(s)", added);
                self.bump_days_stamp();
            },
            Err(_) => {
                self.days.repair("days");
            },
        }
        self.refresh_blocks_stamp();
        result
    }
}
