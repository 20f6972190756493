//! JSON-lines record sink
//!
//! Appends one JSON object per line to a file. The file is opened in append
//! mode, so records from a resumed epoch follow those written before the
//! restart.

use crate::output::traits::{CrawlRecord, RecordSink, SinkResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Opens `path` for appending, creating it if needed
    pub async fn open(path: &Path) -> SinkResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn write(&self, record: &CrawlRecord) -> SinkResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        Ok(())
    }

    async fn flush(&self) -> SinkResult<()> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }
}
