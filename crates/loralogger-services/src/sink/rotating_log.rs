//! Rotating log sink — one append-only text file per day.
//!
//! Files live at `<root>/YYYY/MM/DD/<file_name>`, dated by the record's
//! receive time (UTC). Directories are created on first use and files are
//! only ever opened for append, so a restart mid-day keeps adding to the
//! same file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{Sink, SinkError};
use crate::record::Record;

/// The file currently open for appending.
struct Partition {
    date: NaiveDate,
    path: PathBuf,
    file: File,
}

pub struct RotatingLogSink {
    root: PathBuf,
    file_name: String,
    current: Mutex<Option<Partition>>,
}

impl RotatingLogSink {
    pub fn new(root: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            file_name: file_name.into(),
            current: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the partition a timestamp falls into.
    pub fn partition_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.root
            .join(at.format("%Y").to_string())
            .join(at.format("%m").to_string())
            .join(at.format("%d").to_string())
            .join(&self.file_name)
    }

    async fn open_partition(&self, at: DateTime<Utc>) -> Result<Partition, SinkError> {
        let path = self.partition_path(at);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await.map_err(|e| SinkError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| SinkError::Io {
                path: path.clone(),
                source: e,
            })?;
        tracing::info!(path = %path.display(), "opened log partition");
        Ok(Partition {
            date: at.date_naive(),
            path,
            file,
        })
    }
}

#[async_trait]
impl Sink for RotatingLogSink {
    fn name(&self) -> &'static str {
        "rotating_log"
    }

    async fn write(&self, record: &Record) -> Result<(), SinkError> {
        let line = record.log_line();
        let date = record.received_at.date_naive();

        // Held across the write so concurrent lines never interleave.
        let mut current = self.current.lock().await;

        let reopen = current.as_ref().map_or(true, |p| p.date != date);
        if reopen {
            *current = Some(self.open_partition(record.received_at).await?);
        }

        let Some(partition) = current.as_mut() else {
            return Err(SinkError::Unavailable("no open log partition".into()));
        };

        let result = async {
            partition.file.write_all(line.as_bytes()).await?;
            partition.file.flush().await
        }
        .await;

        if let Err(e) = result {
            let path = partition.path.clone();
            // Reopen on the next write instead of reusing a broken handle.
            *current = None;
            return Err(SinkError::Io { path, source: e });
        }
        Ok(())
    }
}
