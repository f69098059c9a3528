//! Result sink: where extracted products go after a successful Target.
//!
//! `JsonlSink` is an append-only JSON Lines file:
//! - one record per line
//! - rotation when the file exceeds `MAX_SINK_SIZE` (50MB)
//! - rotated files named `.1`, `.2`, etc. (max 5 generations)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Maximum sink size before rotation (50 MB).
const MAX_SINK_SIZE: u64 = 50 * 1024 * 1024;

/// Number of rotated generations to keep.
const MAX_ROTATIONS: u32 = 5;

/// One product as handed to the external store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub molecule_name: String,
    pub category: String,
    pub stage: String,
    pub company_name: String,
    pub source_url: String,
    pub recorded_at: DateTime<Utc>,
}

/// Destination for a Target's product records.
#[async_trait]
pub trait ResultSink: Send {
    async fn store(&mut self, records: &[ProductRecord]) -> Result<()>;
}

/// Append-only JSONL sink with automatic rotation.
pub struct JsonlSink {
    file: File,
    path: PathBuf,
    /// Approximate current size, re-read on open.
    current_size: u64,
    max_size: u64,
}

impl JsonlSink {
    /// Open or create the sink file.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_limit(path, MAX_SINK_SIZE)
    }

    /// Open with a custom rotation threshold.
    pub fn open_with_limit(path: &Path, max_size: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let file = open_append(path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            current_size,
            max_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, record: &ProductRecord) -> Result<()> {
        if self.current_size >= self.max_size {
            self.rotate()?;
        }

        let json = serde_json::to_string(record)?;
        writeln!(self.file, "{json}")
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    /// products.jsonl → products.jsonl.1, .1 → .2, and so on.
    fn rotate(&mut self) -> Result<()> {
        self.file.flush()?;

        let oldest = rotation_path(&self.path, MAX_ROTATIONS);
        if oldest.exists() {
            if let Err(e) = std::fs::remove_file(&oldest) {
                warn!(
                    path = %oldest.display(),
                    error = %e,
                    "failed to drop oldest sink generation"
                );
            }
        }

        for i in (1..MAX_ROTATIONS).rev() {
            let from = rotation_path(&self.path, i);
            if from.exists() {
                let to = rotation_path(&self.path, i + 1);
                if let Err(e) = std::fs::rename(&from, &to) {
                    warn!(
                        from = %from.display(),
                        to = %to.display(),
                        error = %e,
                        "failed to shift sink generation"
                    );
                }
            }
        }

        std::fs::rename(&self.path, rotation_path(&self.path, 1))
            .with_context(|| format!("failed to rotate {}", self.path.display()))?;

        self.file = open_append(&self.path)?;
        self.current_size = 0;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for JsonlSink {
    async fn store(&mut self, records: &[ProductRecord]) -> Result<()> {
        for record in records {
            self.append(record)?;
        }
        self.file.flush()?;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open sink: {}", path.display()))
}

/// Build path for a rotated file: `products.jsonl.1`, `products.jsonl.2`, etc.
fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("products.jsonl")
    );
    base.with_file_name(name)
}

/// In-memory sink; clones share the same record list.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<ProductRecord>>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<ProductRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn store(&mut self, records: &[ProductRecord]) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .extend_from_slice(records);
        Ok(())
    }
}
