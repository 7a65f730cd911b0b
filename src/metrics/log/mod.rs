
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Written in place of the matched reference when nothing matched
pub const NO_MATCH: &str = "None";

/// One row of the metrics log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsLogEntry {
    pub query: String,
    pub best_match: String,
    pub response: String,
    pub cosine_similarity: f64,
    pub rouge1: f64,
    pub rouge2: f64,
    #[serde(rename = "rougeL")]
    pub rouge_l: f64,
    pub response_time: f64,
}

/// Append-only CSV log of scored interactions.
///
/// The header row is written only when the file is created or empty.
#[derive(Debug)]
pub struct MetricsLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl MetricsLog {
    #[inline]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn append(&self, entry: &MetricsLogEntry) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Metrics log lock poisoned"))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create metrics directory: {}", parent.display())
            })?;
        }

        let needs_header = !matches!(std::fs::metadata(&self.path), Ok(m) if m.len() > 0);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open metrics log: {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer
            .serialize(entry)
            .context("Failed to write metrics log row")?;
        writer.flush().context("Failed to flush metrics log")?;

        debug!("Logged metrics for query to {}", self.path.display());
        Ok(())
    }

    /// Every row logged so far
    #[inline]
    pub fn read_entries(&self) -> Result<Vec<MetricsLogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Failed to open metrics log: {}", self.path.display()))?;

        reader
            .deserialize()
            .collect::<Result<Vec<MetricsLogEntry>, csv::Error>>()
            .context("Failed to parse metrics log")
    }
}
