//! Updaters extend a store from one external data feed.
//!
//! Each updater is a fetch/append pair. `fetch` runs without the data lock and may be
//! slow; `append` runs under the write lock and should only copy rows into the buckets.
//! Rows are opaque to the store: they travel from an updater's `fetch` to the same
//! updater's `append` and nowhere else.

use std::any::Any;
use std::fmt;

use anyhow::anyhow;
use async_trait::async_trait;

use super::data::ChartData;

/// Release callback attached to a fetch, run exactly once when dropped.
///
/// Use it to give back whatever the fetch is still holding, such as an open cursor.
#[derive(Default)]
pub struct Release(Option<Box<dyn FnOnce() + Send>>);

impl Release {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(release)))
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Release").field(&self.0.is_some()).finish()
    }
}

/// Rows produced by a fetch together with the callback that releases them.
#[derive(Debug)]
pub struct Fetched<R> {
    pub rows: R,
    pub release: Release,
}

impl<R> Fetched<R> {
    /// Rows with nothing to release.
    pub fn new(rows: R) -> Self {
        Self {
            rows,
            release: Release::default(),
        }
    }

    pub fn with_release(rows: R, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rows,
            release: Release::new(release),
        }
    }
}

#[async_trait]
pub trait Updater: Send + Sync + 'static {
    type Rows: Send + 'static;

    /// Short name used in logs and errors.
    fn tag(&self) -> &str;

    async fn fetch(&self) -> anyhow::Result<Fetched<Self::Rows>>;

    /// Copies `rows` into the store. Must tolerate rows that are already present.
    fn append(&self, data: &mut ChartData, rows: Self::Rows) -> anyhow::Result<()>;
}

pub(crate) type AnyRows = Box<dyn Any + Send>;

/// Object-safe form of [`Updater`] kept in a store's registry.
#[async_trait]
pub(crate) trait DynUpdater: Send + Sync {
    fn tag(&self) -> &str;

    async fn fetch_any(&self) -> anyhow::Result<Fetched<AnyRows>>;

    fn append_any(&self, data: &mut ChartData, rows: AnyRows) -> anyhow::Result<()>;
}

#[async_trait]
impl<U: Updater> DynUpdater for U {
    fn tag(&self) -> &str {
        Updater::tag(self)
    }

    async fn fetch_any(&self) -> anyhow::Result<Fetched<AnyRows>> {
        let Fetched { rows, release } = self.fetch().await?;
        Ok(Fetched {
            rows: Box::new(rows) as AnyRows,
            release,
        })
    }

    fn append_any(&self, data: &mut ChartData, rows: AnyRows) -> anyhow::Result<()> {
        let rows = rows
            .downcast::<U::Rows>()
            .map_err(|_| anyhow!("{}: rows handed to the wrong appender", Updater::tag(self)))?;
        self.append(data, *rows)
    }
}
