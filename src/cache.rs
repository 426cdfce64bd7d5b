//! Dataset Cache
//!
//! Loads each (source, table) pair from the backing store at most once per
//! process and hands out the same `Arc<Table>` afterwards. Concurrent first
//! requests for one key share a single in-flight read: the per-key
//! `OnceCell` is the single-flight marker, and late arrivals await it.
//! A failed read leaves the cell empty, so a later request reads again.

use crate::dataset::{Table, TableKey, TableKind, TableSource};
use crate::error::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub struct DatasetCache {
    source: Arc<dyn TableSource>,
    entries: DashMap<TableKey, Arc<OnceCell<Arc<Table>>>>,
    backing_reads: AtomicUsize,
}

impl DatasetCache {
    pub fn new(source: Arc<dyn TableSource>) -> Self {
        Self {
            source,
            entries: DashMap::new(),
            backing_reads: AtomicUsize::new(0),
        }
    }

    /// Return the table for `(source_id, table_id)`, reading and validating
    /// it as `kind` on first use.
    pub async fn load(&self, source_id: &str, table_id: &str, kind: TableKind) -> Result<Arc<Table>> {
        let key = TableKey::new(source_id, table_id);

        // Clone the cell out so no map shard lock is held across the await.
        let cell = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        if let Some(table) = cell.get() {
            debug!("Cache hit for {}", key);
            return Ok(Arc::clone(table));
        }

        let table = cell
            .get_or_try_init(|| async {
                self.backing_reads.fetch_add(1, Ordering::SeqCst);
                info!("Loading {} table {} from backing store", kind, key);
                let df = self.source.read_table(source_id, table_id).await.map_err(|e| {
                    warn!("Failed to load {}: {}", key, e);
                    e
                })?;
                let table = Table::from_frame(key.clone(), kind, &df)?;
                info!("Cached {} ({} rows)", key, table.len());
                Ok::<_, crate::error::ReportError>(Arc::new(table))
            })
            .await?;

        Ok(Arc::clone(table))
    }

    /// Number of times the backing store has been read.
    pub fn backing_reads(&self) -> usize {
        self.backing_reads.load(Ordering::SeqCst)
    }

    pub fn is_cached(&self, source_id: &str, table_id: &str) -> bool {
        self.entries
            .get(&TableKey::new(source_id, table_id))
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// Number of tables held in memory.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
