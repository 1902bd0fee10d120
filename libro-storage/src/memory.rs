//! In-memory result store.
//!
//! Same selection and insert-if-absent semantics as the LMDB backend,
//! without durability. Failure switches let tests exercise the
//! orchestrator's degraded paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use libro_core::{
    AnalysisResult, CacheKey, ContentIdentity, HistoryRecord, RequesterRef, StoreConfig, StoreError,
    StoreResult,
};

use crate::{ensure_matches_key, select_best, select_covering, LookupOutcome, ResultStore, StoreStats};

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    partial_hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

#[derive(Debug, Default)]
struct FailureSwitches {
    reads: AtomicBool,
    writes: AtomicBool,
    history: AtomicBool,
}

/// Process-local [`ResultStore`].
#[derive(Debug, Clone)]
pub struct InMemoryResultStore {
    results: Arc<RwLock<HashMap<ContentIdentity, Vec<AnalysisResult>>>>,
    history: Arc<RwLock<Vec<HistoryRecord>>>,
    counters: Arc<Counters>,
    failures: Arc<FailureSwitches>,
    history_max_page: usize,
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::with_history_max_page(StoreConfig::default().history_max_page)
    }

    pub fn with_history_max_page(history_max_page: usize) -> Self {
        Self {
            results: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(Vec::new())),
            counters: Arc::new(Counters::default()),
            failures: Arc::new(FailureSwitches::default()),
            history_max_page: history_max_page.max(1),
        }
    }

    /// Make every `get` fail with [`StoreError::Unavailable`].
    pub fn fail_reads(&self, fail: bool) {
        self.failures.reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `put_if_absent` fail with [`StoreError::TransactionFailed`].
    pub fn fail_writes(&self, fail: bool) {
        self.failures.writes.store(fail, Ordering::SeqCst);
    }

    /// Make every `append_history` fail.
    pub fn fail_history(&self, fail: bool) {
        self.failures.history.store(fail, Ordering::SeqCst);
    }

    /// Number of entries actually written by `put_if_absent`.
    pub fn insert_count(&self) -> u64 {
        self.counters.inserts.load(Ordering::SeqCst)
    }

    /// Every stored entry for `identity`, in insertion order.
    pub fn entries_for(&self, identity: &ContentIdentity) -> StoreResult<Vec<AnalysisResult>> {
        let results = self.results.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(results.get(identity).cloned().unwrap_or_default())
    }

    /// Insert without the covering check. Seeds fixtures.
    pub fn seed(&self, result: AnalysisResult) -> StoreResult<()> {
        let mut results = self.results.write().map_err(|_| StoreError::LockPoisoned)?;
        results.entry(result.identity).or_default().push(result);
        Ok(())
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
impl ResultStore for InMemoryResultStore {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<AnalysisResult>> {
        if self.failures.reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "injected read failure".to_string(),
            });
        }
        let results = self.results.read().map_err(|_| StoreError::LockPoisoned)?;
        let found = results
            .get(&key.identity())
            .and_then(|entries| select_best(entries, key.perspectives()))
            .cloned();
        self.record(LookupOutcome::of(found.as_ref(), key.perspectives()));
        Ok(found)
    }

    async fn put_if_absent(&self, key: &CacheKey, result: AnalysisResult) -> StoreResult<AnalysisResult> {
        if self.failures.writes.load(Ordering::SeqCst) {
            return Err(StoreError::TransactionFailed {
                reason: "injected write failure".to_string(),
            });
        }
        ensure_matches_key(key, &result)?;

        let mut results = self.results.write().map_err(|_| StoreError::LockPoisoned)?;
        let entries = results.entry(key.identity()).or_default();
        if let Some(existing) = select_covering(entries.iter(), key.perspectives()) {
            return Ok(existing.clone());
        }
        entries.push(result.clone());
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        Ok(result)
    }

    async fn append_history(&self, record: HistoryRecord) -> StoreResult<()> {
        if self.failures.history.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "injected history failure".to_string(),
            });
        }
        self.history
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .push(record);
        Ok(())
    }

    async fn list_history(
        &self,
        requester: &RequesterRef,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<HistoryRecord>> {
        let history = self.history.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut records: Vec<HistoryRecord> = history
            .iter()
            .filter(|record| &record.requester == requester)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.requested_at
                .cmp(&a.requested_at)
                .then_with(|| b.record_id.cmp(&a.record_id))
        });
        Ok(records
            .into_iter()
            .skip(offset)
            .take(limit.min(self.history_max_page))
            .collect())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let result_entries = self
            .results
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .values()
            .map(|entries| entries.len() as u64)
            .sum();
        let history_records = self
            .history
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .len() as u64;
        Ok(StoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            partial_hits: self.counters.partial_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            result_entries,
            history_records,
        })
    }
}
