//! Failure snapshots
//!
//! Each phase 1 run writes exactly one CSV snapshot of the SKUs it could not
//! refresh, named `{store}_failures_{YYYYmmdd_HHMMSS}.csv`. A second run in
//! the same second gets a `_2`, `_3`, ... suffix. Snapshots are never
//! rewritten; the recheck pass reads the newest one for its store.
//!
//! Columns are `sku,reason,timestamp` followed by the union of every
//! record's diagnostic keys in first-seen order.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::FailureLogError;
use crate::models::FailureRecord;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const FIXED_COLUMNS: [&str; 3] = ["sku", "reason", "timestamp"];

/// Directory of failure snapshots
#[derive(Debug, Clone)]
pub struct FailureLog {
    dir: PathBuf,
}

impl FailureLog {
    /// Snapshot store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name of the snapshot a store writes at `at`
    pub fn snapshot_name(store_id: &str, at: DateTime<Utc>) -> String {
        format!("{}_failures_{}.csv", store_id, at.format(TIMESTAMP_FORMAT))
    }

    /// File name of the `seq`-th snapshot written within the same second
    fn sequenced_name(store_id: &str, at: DateTime<Utc>, seq: u32) -> String {
        if seq <= 1 {
            return Self::snapshot_name(store_id, at);
        }
        format!(
            "{}_failures_{}_{}.csv",
            store_id,
            at.format(TIMESTAMP_FORMAT),
            seq
        )
    }

    /// Write one run's failures
    ///
    /// A run without failures still writes a header-only snapshot so the
    /// next recheck does not pick up an older, already-resolved one.
    pub async fn write_snapshot(
        &self,
        store_id: &str,
        records: &[FailureRecord],
        at: DateTime<Utc>,
    ) -> Result<PathBuf, FailureLogError> {
        let body = encode_snapshot(records)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let mut seq = 1;
        let (path, mut file) = loop {
            let path = self.dir.join(Self::sequenced_name(store_id, at, seq));
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => seq += 1,
                Err(e) => return Err(e.into()),
            }
        };
        file.write_all(&body).await?;
        file.flush().await?;

        info!(
            store = store_id,
            failures = records.len(),
            path = %path.display(),
            "Failure snapshot written"
        );
        Ok(path)
    }

    /// Newest snapshot for a store, if any
    pub async fn latest_snapshot(&self, store_id: &str) -> Result<Option<PathBuf>, FailureLogError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}_failures_", store_id);
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(".csv") {
                names.push(name);
            }
        }

        debug!(store = store_id, candidates = names.len(), "Scanning failure snapshots");
        Ok(pick_latest(store_id, &names).map(|name| self.dir.join(name)))
    }

    /// Read every record of a snapshot
    pub async fn read_snapshot(&self, path: &Path) -> Result<Vec<FailureRecord>, FailureLogError> {
        let bytes = tokio::fs::read(path).await?;
        decode_snapshot(&bytes)
    }
}

/// Timestamp embedded in a snapshot name
pub fn snapshot_timestamp(store_id: &str, name: &str) -> Option<NaiveDateTime> {
    snapshot_order(store_id, name).map(|(at, _)| at)
}

/// Timestamp and same-second sequence number of a snapshot name
fn snapshot_order(store_id: &str, name: &str) -> Option<(NaiveDateTime, u32)> {
    let stamp = name
        .strip_prefix(store_id)?
        .strip_prefix("_failures_")?
        .strip_suffix(".csv")?;
    if let Ok(at) = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT) {
        return Some((at, 1));
    }

    let (base, seq) = stamp.rsplit_once('_')?;
    let seq = seq.parse().ok()?;
    NaiveDateTime::parse_from_str(base, TIMESTAMP_FORMAT)
        .ok()
        .map(|at| (at, seq))
}

/// Pick the newest snapshot name; names without a parsable timestamp sort last
pub fn pick_latest<'a>(store_id: &str, names: &'a [String]) -> Option<&'a String> {
    let mut ranked: Vec<(Option<(NaiveDateTime, u32)>, &String)> = names
        .iter()
        .map(|name| (snapshot_order(store_id, name), name))
        .collect();

    // None < Some, so a descending sort puts unparsable names at the end.
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(a.1)));
    ranked.into_iter().next().map(|(_, name)| name)
}

fn encode_snapshot(records: &[FailureRecord]) -> Result<Vec<u8>, FailureLogError> {
    let mut extra_columns: Vec<&str> = Vec::new();
    for record in records {
        for (key, _) in &record.extras {
            if !extra_columns.contains(&key.as_str()) {
                extra_columns.push(key);
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(FIXED_COLUMNS.iter().copied().chain(extra_columns.iter().copied()))?;

    for record in records {
        let timestamp = record.timestamp.to_rfc3339();
        let mut row = vec![record.sku.as_str(), record.reason.as_str(), timestamp.as_str()];
        row.extend(
            extra_columns
                .iter()
                .map(|column| record.extra(column).unwrap_or("")),
        );
        writer.write_record(&row)?;
    }

    writer
        .into_inner()
        .map_err(|e| FailureLogError::Io(e.into_error()))
}

fn decode_snapshot(bytes: &[u8]) -> Result<Vec<FailureRecord>, FailureLogError> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers()?.clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let sku = row.get(0).unwrap_or_default().trim();
        if sku.is_empty() {
            continue;
        }

        let timestamp = row
            .get(2)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let mut record = FailureRecord::new(sku, row.get(1).unwrap_or_default()).at(timestamp);
        for (column, value) in headers.iter().zip(row.iter()).skip(FIXED_COLUMNS.len()) {
            if !value.is_empty() {
                record = record.with_extra(column, value);
            }
        }
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    // Test 1: Snapshot name embeds the timestamp
    #[test]
    fn test_snapshot_name() {
        let name = FailureLog::snapshot_name("bestbuy", at(9, 5, 7));
        assert_eq!(name, "bestbuy_failures_20240301_090507.csv");
        assert_eq!(
            snapshot_timestamp("bestbuy", &name),
            Some(at(9, 5, 7).naive_utc())
        );
        assert_eq!(snapshot_timestamp("vitacost", &name), None);
    }

    // Test 2: Newest parsable name wins; unparsable names sort last
    #[test]
    fn test_pick_latest() {
        let names = vec![
            "bb_failures_garbage.csv".to_string(),
            "bb_failures_20240301_090000.csv".to_string(),
            "bb_failures_20240302_080000.csv".to_string(),
            "bb_failures_20240301_235959.csv".to_string(),
        ];

        assert_eq!(
            pick_latest("bb", &names).map(String::as_str),
            Some("bb_failures_20240302_080000.csv")
        );

        let only_bad = vec!["bb_failures_garbage.csv".to_string()];
        assert_eq!(
            pick_latest("bb", &only_bad).map(String::as_str),
            Some("bb_failures_garbage.csv")
        );
        assert!(pick_latest("bb", &[]).is_none());
    }

    // Test 3: Header carries the union of extras in first-seen order
    #[tokio::test]
    async fn test_write_snapshot_columns() {
        let dir = TempDir::new().unwrap();
        let log = FailureLog::new(dir.path());

        let records = vec![
            FailureRecord::new("A", "timeout").with_extra("status", "504"),
            FailureRecord::new("B", "not found")
                .with_extra("attempts", "3")
                .with_extra("status", "404"),
        ];

        let path = log.write_snapshot("bb", &records, at(10, 0, 0)).await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();

        assert_eq!(lines.next(), Some("sku,reason,timestamp,status,attempts"));
        assert!(lines.next().unwrap().starts_with("A,timeout,"));
        assert!(lines.next().unwrap().ends_with(",404,3"));
        assert!(lines.next().is_none());
    }

    // Test 4: Written snapshot reads back with extras
    #[tokio::test]
    async fn test_read_snapshot() {
        let dir = TempDir::new().unwrap();
        let log = FailureLog::new(dir.path());

        let records = vec![
            FailureRecord::new("A", "HTTP 500, retries exhausted").with_extra("provider", "bb"),
            FailureRecord::new("B", "not found"),
        ];
        let path = log.write_snapshot("bb", &records, at(10, 0, 0)).await.unwrap();

        let read = log.read_snapshot(&path).await.unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].sku, "A");
        assert_eq!(read[0].reason, "HTTP 500, retries exhausted");
        assert_eq!(read[0].extra("provider"), Some("bb"));
        assert!(read[1].extras.is_empty());
    }

    // Test 5: Empty run still writes a header-only snapshot
    #[tokio::test]
    async fn test_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        let log = FailureLog::new(dir.path().join("nested"));

        let path = log.write_snapshot("bb", &[], at(10, 0, 0)).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap().trim(),
            "sku,reason,timestamp"
        );
        assert!(log.read_snapshot(&path).await.unwrap().is_empty());
    }

    // Test 6: latest_snapshot scopes by store and handles a missing directory
    #[tokio::test]
    async fn test_latest_snapshot() {
        let dir = TempDir::new().unwrap();
        let log = FailureLog::new(dir.path());

        assert!(log.latest_snapshot("bb").await.unwrap().is_none());

        log.write_snapshot("bb", &[], at(9, 0, 0)).await.unwrap();
        log.write_snapshot("bb", &[], at(11, 0, 0)).await.unwrap();
        log.write_snapshot("vc", &[], at(12, 0, 0)).await.unwrap();

        let latest = log.latest_snapshot("bb").await.unwrap().unwrap();
        assert!(latest.ends_with("bb_failures_20240301_110000.csv"));

        let missing = FailureLog::new(dir.path().join("does-not-exist"));
        assert!(missing.latest_snapshot("bb").await.unwrap().is_none());
    }

    // Test 7: Runs within the same second get distinct snapshots, newest last
    #[tokio::test]
    async fn test_same_second_snapshots() {
        let dir = TempDir::new().unwrap();
        let log = FailureLog::new(dir.path());

        let first = log
            .write_snapshot("bb", &[FailureRecord::new("A", "timeout")], at(10, 0, 0))
            .await
            .unwrap();
        let second = log
            .write_snapshot("bb", &[FailureRecord::new("B", "not found")], at(10, 0, 0))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert!(second.ends_with("bb_failures_20240301_100000_2.csv"));
        assert_eq!(log.read_snapshot(&first).await.unwrap()[0].sku, "A");

        let latest = log.latest_snapshot("bb").await.unwrap().unwrap();
        assert_eq!(latest, second);
        assert_eq!(
            snapshot_timestamp("bb", "bb_failures_20240301_100000_2.csv"),
            Some(at(10, 0, 0).naive_utc())
        );
    }
}
