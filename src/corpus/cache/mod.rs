
use itertools::Itertools;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{CorpusRecord, CorpusSource, RawRow, parse_embedding};
use crate::{RagError, Result};

pub const DEFAULT_CACHE_CAPACITY: usize = 8;
const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of decoding one table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub dropped: usize,
}

struct CachedSnapshot {
    // holds an `Arc<[R]>` for the record type the table was loaded as
    records: Box<dyn Any + Send + Sync>,
    last_used: AtomicU64,
    report: LoadReport,
}

/// Per-table memo of decoded corpus snapshots.
///
/// A table is read in full on first access and kept until invalidated or evicted.
/// Snapshots are immutable and shared; a refresh replaces the whole snapshot.
pub struct CorpusCache {
    source: Arc<dyn CorpusSource>,
    capacity: usize,
    load_timeout: Duration,
    clock: AtomicU64,
    entries: RwLock<HashMap<String, CachedSnapshot>>,
}

impl std::fmt::Debug for CorpusCache {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorpusCache")
            .field("capacity", &self.capacity)
            .field("load_timeout", &self.load_timeout)
            .finish_non_exhaustive()
    }
}

impl CorpusCache {
    #[inline]
    pub fn new(source: Arc<dyn CorpusSource>) -> Self {
        Self {
            source,
            capacity: DEFAULT_CACHE_CAPACITY,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            clock: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Maximum number of tables kept at once, at least 1
    #[inline]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    #[inline]
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    #[inline]
    pub fn source(&self) -> &Arc<dyn CorpusSource> {
        &self.source
    }

    /// Snapshot of `table`, reading it from the source on a miss.
    ///
    /// A failed read is returned as an error and leaves every cached table as it was.
    #[inline]
    pub async fn load<R: CorpusRecord>(&self, table: &str) -> Result<Arc<[R]>> {
        if let Some(records) = self.cached::<R>(table).await {
            debug!("Corpus cache hit for table {}", table);
            return Ok(records);
        }

        debug!("Corpus cache miss for table {}", table);
        let (records, report) = self.fetch_snapshot::<R>(table).await?;
        self.insert(table, Arc::clone(&records), report).await;
        Ok(records)
    }

    /// Re-read `table` and swap in the new snapshot.
    ///
    /// The source is read before the cached entry is touched, so a failed read
    /// keeps serving the previous snapshot.
    #[inline]
    pub async fn refresh<R: CorpusRecord>(&self, table: &str) -> Result<LoadReport> {
        let (records, report) = self.fetch_snapshot::<R>(table).await?;
        self.insert(table, records, report).await;
        Ok(report)
    }

    async fn fetch_snapshot<R: CorpusRecord>(
        &self,
        table: &str,
    ) -> Result<(Arc<[R]>, LoadReport)> {
        let rows = tokio::time::timeout(
            self.load_timeout,
            self.source.fetch_rows(table, R::COLUMNS),
        )
        .await
        .map_err(|_| {
            RagError::Timeout(format!(
                "Loading table {} exceeded {:?}",
                table, self.load_timeout
            ))
        })?
        .map_err(|e| RagError::Database(format!("Failed to load table {table}: {e:#}")))?;

        let (records, report) = decode_rows::<R>(table, rows);

        info!(
            "Loaded {} records from {} ({} dropped)",
            report.loaded, table, report.dropped
        );

        Ok((records.into(), report))
    }

    async fn cached<R: CorpusRecord>(&self, table: &str) -> Option<Arc<[R]>> {
        let entries = self.entries.read().await;
        let snapshot = entries.get(table)?;
        let records = snapshot.records.downcast_ref::<Arc<[R]>>()?;
        snapshot.last_used.store(self.tick(), Ordering::Relaxed);
        Some(Arc::clone(records))
    }

    async fn insert<R: CorpusRecord>(&self, table: &str, records: Arc<[R]>, report: LoadReport) {
        let mut entries = self.entries.write().await;

        if !entries.contains_key(table) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, snapshot)| snapshot.last_used.load(Ordering::Relaxed))
                .map(|(name, _)| name.clone());
            if let Some(oldest) = oldest {
                debug!("Evicting table {} from corpus cache", oldest);
                entries.remove(&oldest);
            }
        }

        entries.insert(
            table.to_string(),
            CachedSnapshot {
                records: Box::new(records),
                last_used: AtomicU64::new(self.tick()),
                report,
            },
        );
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Drop the snapshot for `table`. Returns whether one was cached.
    #[inline]
    pub async fn invalidate(&self, table: &str) -> bool {
        let removed = self.entries.write().await.remove(table).is_some();
        if removed {
            info!("Invalidated corpus cache for table {}", table);
        }
        removed
    }

    #[inline]
    pub async fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        info!("Invalidated {} cached corpus tables", count);
        count
    }

    /// Decode statistics of the cached snapshot for `table`
    #[inline]
    pub async fn report(&self, table: &str) -> Option<LoadReport> {
        self.entries.read().await.get(table).map(|s| s.report)
    }

    #[inline]
    pub async fn cached_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.entries.read().await.keys().cloned().collect();
        tables.sort();
        tables
    }
}

/// Turn raw rows into records, dropping rows with an unusable embedding.
///
/// The expected dimensionality is the most common length among the rows that
/// parse, earliest length winning a tie. Rows of any other length are dropped.
#[inline]
pub fn decode_rows<R: CorpusRecord>(table: &str, rows: Vec<RawRow>) -> (Vec<R>, LoadReport) {
    let mut report = LoadReport::default();

    let parsed: Vec<(usize, Vec<Option<String>>, Vec<f32>)> = rows
        .into_iter()
        .enumerate()
        .filter_map(|(index, row)| match parse_embedding(&row.embedding) {
            Ok(embedding) => Some((index, row.fields, embedding)),
            Err(e) => {
                warn!("Skipping row {} of {}: invalid embedding: {}", index, table, e);
                report.dropped += 1;
                None
            }
        })
        .collect();

    let expected = modal_dimension(parsed.iter().map(|(_, _, embedding)| embedding.len()));
    let mut records = Vec::with_capacity(parsed.len());

    for (index, fields, embedding) in parsed {
        if Some(embedding.len()) != expected {
            warn!(
                "Skipping row {} of {}: embedding has {} dimensions, expected {:?}",
                index,
                table,
                embedding.len(),
                expected
            );
            report.dropped += 1;
            continue;
        }

        records.push(R::from_parts(fields, embedding));
        report.loaded += 1;
    }

    (records, report)
}

fn modal_dimension(lengths: impl Iterator<Item = usize> + Clone) -> Option<usize> {
    let counts = lengths.clone().counts();
    lengths.fold(None, |best, length| match best {
        Some(best) if counts[&best] >= counts[&length] => Some(best),
        _ => Some(length),
    })
}
