//! On-disk snapshot of the Blocks bucket.
//!
//! Only blocks are written. Days are rolled up again on load and supplementary series
//! are refetched. A snapshot that cannot be read for any reason is ignored and the store
//! rebuilds from its updaters.

use std::io;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::bucket::{Bucket, ChainFamily, LengthMismatch};
use super::error::UpdateError;
use super::store::ChartStore;

/// Bumped whenever the encoded layout of [`Bucket`] changes.
pub const SNAPSHOT_VERSION: &str = "1";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot encoding: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("snapshot version {found}, expected {expected}")]
    Version { found: String, expected: String },
    #[error("snapshot columns do not match this chain")]
    Shape,
    #[error("snapshot columns out of step: {0}")]
    Lengths(#[from] LengthMismatch),
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: String,
    blocks: &'a Bucket,
}

#[derive(Deserialize)]
struct Snapshot {
    version: String,
    blocks: Bucket,
}

fn version_tag(family: ChainFamily) -> String {
    format!("{}/{}", SNAPSHOT_VERSION, family.as_str())
}

impl ChartStore {
    /// Writes the Blocks bucket to `path`, replacing any previous snapshot.
    pub async fn dump(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        let (bytes, count) = {
            let data = self.data.read();
            let bytes = bincode::serialize(&SnapshotRef {
                version: version_tag(self.family()),
                blocks: &data.blocks,
            })?;
            (bytes, data.blocks.len())
        };

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(e) => return Err(e.into()),
        }
        tokio::fs::write(path, bytes).await?;

        info!(
            "{}: dumped {} block(s) to {}",
            self.chain(),
            count,
            path.display()
        );
        Ok(())
    }

    /// Restores blocks from `path`, rebuilds days, then runs one update cycle.
    ///
    /// A missing or unreadable snapshot is logged and the store starts empty.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<(), UpdateError> {
        let path = path.as_ref();
        match self.read_snapshot(path).await {
            Ok(blocks) => self.restore(blocks),
            Err(e) => warn!(
                "{}: ignoring snapshot {}: {}. Rebuilding from scratch",
                self.chain(),
                path.display(),
                e
            ),
        }
        self.run_update().await
    }

    async fn read_snapshot(&self, path: &Path) -> Result<Bucket, SnapshotError> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: Snapshot = bincode::deserialize(&bytes)?;

        let expected = version_tag(self.family());
        if snapshot.version != expected {
            return Err(SnapshotError::Version {
                found: snapshot.version,
                expected,
            });
        }
        if !snapshot.blocks.same_shape(&Bucket::blocks(self.family(), 0)) {
            return Err(SnapshotError::Shape);
        }
        snapshot.blocks.validate_lengths()?;
        Ok(snapshot.blocks)
    }

    fn restore(&self, blocks: Bucket) {
        let mut data = self.data.write();
        data.blocks = blocks;
        data.bump_epoch();
        data.days = Bucket::days(self.family(), self.day_capacity());

        match data.roll_up_days() {
            Ok(days) => info!(
                "{}: restored {} block(s) and {} day(s) from snapshot",
                self.chain(),
                data.blocks.len(),
                days
            ),
            Err(e) => {
                warn!(
                    "{}: snapshot blocks failed day rollup ({}), starting empty",
                    self.chain(),
                    e
                );
                data.reset();
            },
        }
        drop(data);
        self.clear_cache();
    }
}
