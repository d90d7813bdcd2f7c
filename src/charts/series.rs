//! Growable numeric columns.
//!
//! A [`Series`] is an append-only run of numbers indexed `0..len`. Nothing is ever
//! removed except through [`Series::snip`], which is reserved for length recovery and
//! reorg rollback. [`Column`] erases the numeric type so a bucket can keep integer and
//! floating columns side by side in one map.

use std::fmt;
use std::ops::Range;

use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

/// Numbers a [`Series`] can hold.
pub trait Sample: Copy + Zero + ToPrimitive + PartialOrd + fmt::Debug + Send + Sync {}

impl Sample for u64 {}
impl Sample for f64 {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Series<T> {
    values: Vec<T>,
}

impl<T: Sample> Series<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: T) {
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.values.get(index).copied()
    }

    pub fn last(&self) -> Option<T> {
        self.values.last().copied()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    /// Truncates to `len` entries. No-op when already that short.
    pub fn snip(&mut self, len: usize) {
        self.values.truncate(len);
    }

    /// Sum over `[a, b)`, clamped to the series bounds.
    pub fn sum(&self, a: usize, b: usize) -> T {
        self.window(a, b)
            .iter()
            .fold(T::zero(), |acc, v| acc + *v)
    }

    /// Mean over `[a, b)`, clamped to the series bounds. An empty window averages to 0.
    pub fn avg(&self, a: usize, b: usize) -> f64 {
        let window = self.window(a, b);
        if window.is_empty() {
            return 0.0;
        }
        let total: f64 = window.iter().filter_map(|v| v.to_f64()).sum();
        total / window.len() as f64
    }

    /// Running total, used for cumulative charts (chain size, coin supply).
    pub fn accumulate(&self) -> Vec<T> {
        let mut total = T::zero();
        self.values
            .iter()
            .map(|v| {
                total = total + *v;
                total
            })
            .collect()
    }

    fn window(&self, a: usize, b: usize) -> &[T] {
        let b = b.min(self.values.len());
        let a = a.min(b);
        &self.values[a..b]
    }
}

impl<T: Sample> From<Vec<T>> for Series<T> {
    fn from(values: Vec<T>) -> Self {
        Self { values }
    }
}

/// Numeric type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Uint,
    Float,
}

/// A single typed value moving between columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Uint(u64),
    Float(f64),
}

/// A type-erased [`Series`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    Uint(Series<u64>),
    Float(Series<f64>),
}

impl Column {
    pub fn new(kind: Kind, capacity: usize) -> Self {
        match kind {
            Kind::Uint => Column::Uint(Series::with_capacity(capacity)),
            Kind::Float => Column::Float(Series::with_capacity(capacity)),
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Column::Uint(_) => Kind::Uint,
            Column::Float(_) => Kind::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Uint(s) => s.len(),
            Column::Float(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snip(&mut self, len: usize) {
        match self {
            Column::Uint(s) => s.snip(len),
            Column::Float(s) => s.snip(len),
        }
    }

    /// Appends `value`, refusing a value of the wrong kind. Integers widen into float
    /// columns since averaged day columns are always floating.
    pub fn push(&mut self, value: Value) -> Result<(), Kind> {
        match (self, value) {
            (Column::Uint(s), Value::Uint(v)) => s.push(v),
            (Column::Float(s), Value::Float(v)) => s.push(v),
            (Column::Float(s), Value::Uint(v)) => s.push(v as f64),
            (Column::Uint(_), Value::Float(_)) => return Err(Kind::Float),
        }
        Ok(())
    }

    pub fn sum(&self, range: Range<usize>) -> Value {
        match self {
            Column::Uint(s) => Value::Uint(s.sum(range.start, range.end)),
            Column::Float(s) => Value::Float(s.sum(range.start, range.end)),
        }
    }

    pub fn avg(&self, range: Range<usize>) -> f64 {
        match self {
            Column::Uint(s) => s.avg(range.start, range.end),
            Column::Float(s) => s.avg(range.start, range.end),
        }
    }

    pub fn as_uint(&self) -> Option<&Series<u64>> {
        match self {
            Column::Uint(s) => Some(s),
            Column::Float(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<&Series<f64>> {
        match self {
            Column::Float(s) => Some(s),
            Column::Uint(_) => None,
        }
    }

    /// JSON array of the column values.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Column::Uint(s) => serde_json::Value::from(s.as_slice().to_vec()),
            Column::Float(s) => serde_json::Value::from(s.as_slice().to_vec()),
        }
    }

    /// JSON array of the running total of the column values.
    pub fn accumulated_json(&self) -> serde_json::Value {
        match self {
            Column::Uint(s) => serde_json::Value::from(s.accumulate()),
            Column::Float(s) => serde_json::Value::from(s.accumulate()),
        }
    }
}
