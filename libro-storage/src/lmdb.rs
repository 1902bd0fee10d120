//! LMDB-backed result store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped,
//! transactional store shared by every engine process on the host.
//!
//! # Layout
//!
//! Two named databases:
//! - `results`: [`ResultKey`] -> JSON [`AnalysisResult`]
//! - `history`: [`HistoryKey`] -> JSON [`HistoryRecord`]
//!
//! # Thread Safety
//!
//! LMDB serializes write transactions. `put_if_absent` does its covering
//! check and its insert inside one write transaction, so two writers racing
//! on the same content cannot both insert. Lookup statistics are atomic
//! counters; entry counts are read from the databases.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use libro_core::{
    AnalysisResult, CacheKey, ContentIdentity, HistoryRecord, RequesterRef, StoreConfig, StoreError,
    StoreResult,
};
use tracing::{debug, info};

use crate::key::{HistoryKey, ResultKey};
use crate::{ensure_matches_key, select_best, select_covering, LookupOutcome, ResultStore, StoreStats};

const RESULTS_DB: &str = "results";
const HISTORY_DB: &str = "history";

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::EnvOpen(_) | LmdbStoreError::DbOpen(_) | LmdbStoreError::Io(_) => {
                StoreError::Unavailable {
                    reason: e.to_string(),
                }
            }
            LmdbStoreError::Transaction(_) => StoreError::TransactionFailed {
                reason: e.to_string(),
            },
            LmdbStoreError::Serialization(_) | LmdbStoreError::Deserialization(_) => {
                StoreError::Serialization {
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

#[derive(Debug, Default)]
struct LookupCounters {
    hits: AtomicU64,
    partial_hits: AtomicU64,
    misses: AtomicU64,
}

/// Durable [`ResultStore`] on LMDB.
///
/// # Example
///
/// ```ignore
/// use libro_storage::{LmdbResultStore, ResultStore};
///
/// let store = LmdbResultStore::open("/var/lib/libro/cache", 512, 100)?;
/// let best = store.get(&key).await?;
/// ```
pub struct LmdbResultStore {
    env: Env,
    results: Database<Bytes, Bytes>,
    history: Database<Bytes, Bytes>,
    counters: LookupCounters,
    history_max_page: usize,
}

impl LmdbResultStore {
    /// Open (or create) a store under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - A database cannot be created
    pub fn open<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        history_max_page: usize,
    ) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let results: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(RESULTS_DB))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let history: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(HISTORY_DB))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        info!(
            path = %path.as_ref().display(),
            max_size_mb,
            "Opened LMDB result store"
        );

        Ok(Self {
            env,
            results,
            history,
            counters: LookupCounters::default(),
            history_max_page: history_max_page.max(1),
        })
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self, LmdbStoreError> {
        Self::open(&config.path, config.max_size_mb, config.history_max_page)
    }

    /// Every stored entry for `identity`.
    fn entries_for(
        &self,
        rtxn: &RoTxn<'_>,
        identity: &ContentIdentity,
    ) -> Result<Vec<AnalysisResult>, LmdbStoreError> {
        let prefix = ResultKey::identity_prefix(identity);
        let iter = self.results.prefix_iter(rtxn, &prefix[..]).map_err(txn_err)?;

        let mut entries = Vec::new();
        for item in iter {
            let (_, bytes) = item.map_err(txn_err)?;
            let entry: AnalysisResult = serde_json::from_slice(bytes)
                .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn record(&self, outcome: LookupOutcome) {
        let counter = match outcome {
            LookupOutcome::Hit => &self.counters.hits,
            LookupOutcome::Partial => &self.counters.partial_hits,
            LookupOutcome::Miss => &self.counters.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl ResultStore for LmdbResultStore {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<AnalysisResult>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let entries = self.entries_for(&rtxn, &key.identity())?;
        let found = select_best(&entries, key.perspectives()).cloned();
        self.record(LookupOutcome::of(found.as_ref(), key.perspectives()));
        Ok(found)
    }

    async fn put_if_absent(&self, key: &CacheKey, result: AnalysisResult) -> StoreResult<AnalysisResult> {
        ensure_matches_key(key, &result)?;

        let value = serde_json::to_vec(&result)
            .map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
        let encoded_key = ResultKey::for_cache_key(key).encode();

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let existing = {
            let entries = self.entries_for(&wtxn, &key.identity())?;
            select_covering(&entries, key.perspectives()).cloned()
        };
        if let Some(existing) = existing {
            debug!(
                key = %key,
                result_id = %existing.result_id,
                "Covering entry already stored"
            );
            return Ok(existing);
        }

        self.results
            .put(&mut wtxn, &encoded_key, &value)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        debug!(key = %key, result_id = %result.result_id, bytes = value.len(), "Stored result");
        Ok(result)
    }

    async fn append_history(&self, record: HistoryRecord) -> StoreResult<()> {
        let encoded_key =
            HistoryKey::new(&record.requester, record.requested_at, record.record_id).encode();
        let value = serde_json::to_vec(&record)
            .map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.history
            .put(&mut wtxn, &encoded_key, &value)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn list_history(
        &self,
        requester: &RequesterRef,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<HistoryRecord>> {
        let prefix = HistoryKey::requester_prefix(requester);
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let iter = self
            .history
            .prefix_iter(&rtxn, &prefix[..])
            .map_err(txn_err)?;

        let mut records = Vec::new();
        for item in iter.skip(offset).take(limit.min(self.history_max_page)) {
            let (_, bytes) = item.map_err(txn_err)?;
            let record: HistoryRecord = serde_json::from_slice(bytes)
                .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let result_entries = self.results.len(&rtxn).map_err(txn_err)?;
        let history_records = self.history.len(&rtxn).map_err(txn_err)?;
        Ok(StoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            partial_hits: self.counters.partial_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            result_entries,
            history_records,
        })
    }
}
