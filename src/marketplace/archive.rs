//! On-disk copies of submitted feed documents

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

/// Directory receiving one JSON file per submitted batch
#[derive(Debug, Clone)]
pub struct FeedArchive {
    dir: PathBuf,
}

impl FeedArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{store}_feed_batch{N}_{YYYYmmdd_HHMMSS}.json`, with `N` one-based
    pub fn file_name(store_id: &str, batch_number: usize, at: DateTime<Utc>) -> String {
        format!(
            "{}_feed_batch{}_{}.json",
            store_id,
            batch_number,
            at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Write a batch body
    pub async fn save(
        &self,
        store_id: &str,
        batch_number: usize,
        body: &[u8],
        at: DateTime<Utc>,
    ) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::file_name(store_id, batch_number, at));
        tokio::fs::write(&path, body).await?;
        debug!(store = store_id, batch = batch_number, path = %path.display(), "Feed archived");
        Ok(path)
    }
}
