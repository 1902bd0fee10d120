//! Libro Storage - Result Store
//!
//! The durable, shared, append-only cache of generated analyses and the
//! request history, reached only through the [`ResultStore`] trait.
//!
//! Two backends:
//! - [`LmdbResultStore`]: heed/LMDB, durable on commit
//! - [`InMemoryResultStore`]: process-local, with failure injection for tests
//!
//! Entries are never mutated. A request whose perspectives span several
//! narrower entries is answered by storing a new superset entry; lookups
//! pick the most complete match.

use async_trait::async_trait;
use libro_core::{
    AnalysisResult, CacheKey, HistoryRecord, PerspectiveSet, RequesterRef, StoreError, StoreResult,
};

pub mod key;
pub mod lmdb;
pub mod memory;

pub use key::{HistoryKey, ResultKey};
pub use lmdb::LmdbResultStore;
pub use memory::InMemoryResultStore;

// ============================================================================
// RESULT STORE TRAIT
// ============================================================================

/// Persistent cache of analysis results and request history.
///
/// Implementations must be safe for concurrent readers and writers. Writes
/// are durable before the returned future resolves.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Most complete stored result for the key's content identity.
    ///
    /// Prefers entries covering every requested perspective (largest set,
    /// then newest). Otherwise returns the entry with the largest overlap,
    /// so the caller can generate only the missing perspectives. `None`
    /// when nothing overlaps.
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<AnalysisResult>>;

    /// Atomically insert `result` unless an entry covering `key`'s
    /// perspectives already exists, in which case that entry is returned
    /// and nothing is written.
    ///
    /// `result` must cover exactly `key`'s perspectives for `key`'s content.
    async fn put_if_absent(&self, key: &CacheKey, result: AnalysisResult) -> StoreResult<AnalysisResult>;

    /// Append one history record.
    async fn append_history(&self, record: HistoryRecord) -> StoreResult<()>;

    /// A requester's history, most recent first.
    ///
    /// `limit` is clamped to the store's maximum page size.
    async fn list_history(
        &self,
        requester: &RequesterRef,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<HistoryRecord>>;

    /// Usage statistics.
    async fn stats(&self) -> StoreResult<StoreStats>;
}

/// Statistics about store usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Lookups answered with an entry covering every requested perspective.
    pub hits: u64,
    /// Lookups answered with a partial entry.
    pub partial_hits: u64,
    /// Lookups with no overlapping entry.
    pub misses: u64,
    /// Result entries currently stored.
    pub result_entries: u64,
    /// History records currently stored.
    pub history_records: u64,
}

impl StoreStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.partial_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Outcome of a lookup, for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LookupOutcome {
    Hit,
    Partial,
    Miss,
}

impl LookupOutcome {
    pub(crate) fn of(found: Option<&AnalysisResult>, wanted: &PerspectiveSet) -> Self {
        match found {
            Some(result) if result.covers(wanted) => LookupOutcome::Hit,
            Some(_) => LookupOutcome::Partial,
            None => LookupOutcome::Miss,
        }
    }
}

// ============================================================================
// SELECTION
// ============================================================================

/// Pick the most complete entry for `wanted` among entries of one identity.
///
/// Ranking: covering entries first; then larger overlap; then larger
/// perspective set; then newer `generated_at`; `result_id` breaks any
/// remaining tie so the choice is deterministic. Entries with no overlap
/// are never selected.
pub fn select_best<'a, I>(entries: I, wanted: &PerspectiveSet) -> Option<&'a AnalysisResult>
where
    I: IntoIterator<Item = &'a AnalysisResult>,
{
    entries
        .into_iter()
        .filter(|entry| entry.overlap(wanted) > 0)
        .max_by_key(|entry| {
            (
                entry.covers(wanted),
                entry.overlap(wanted),
                entry.perspectives.len(),
                entry.generated_at,
                entry.result_id,
            )
        })
}

/// Best entry that covers every perspective of `wanted`.
pub fn select_covering<'a, I>(entries: I, wanted: &PerspectiveSet) -> Option<&'a AnalysisResult>
where
    I: IntoIterator<Item = &'a AnalysisResult>,
{
    select_best(entries.into_iter().filter(|e| e.covers(wanted)), wanted)
}

/// Reject a result that does not cover exactly `key`'s perspectives of
/// `key`'s content.
pub fn ensure_matches_key(key: &CacheKey, result: &AnalysisResult) -> StoreResult<()> {
    if result.identity != key.identity() || &result.perspective_set() != key.perspectives() {
        return Err(StoreError::KeyMismatch {
            expected: key.fingerprint(),
            got: result.cache_key().fingerprint(),
        });
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_select_prefers_covering_entry() {
        let partial = result(&["catholic", "lutheran", "baptist", "methodist"]);
        let covering = result(&["catholic"]);
        let wanted = set(&["catholic"]);
        let entries = vec![partial.clone(), covering];
        // Both cover {catholic}; the larger covering set wins.
        assert_eq!(select_best(&entries, &wanted), Some(&partial));
    }

    #[test]
    fn test_select_covering_beats_larger_partial() {
        let big_partial = result(&["catholic", "lutheran", "methodist"]);
        let exact = result(&["catholic", "baptist"]);
        let wanted = set(&["catholic", "baptist"]);
        let entries = vec![big_partial, exact.clone()];
        assert_eq!(select_best(&entries, &wanted), Some(&exact));
    }

    #[test]
    fn test_select_newest_on_tie() {
        let older = aged(result(&["catholic"]), 60);
        let newer = aged(result(&["catholic"]), 1);
        let wanted = set(&["catholic"]);
        let entries = vec![newer.clone(), older];
        assert_eq!(select_best(&entries, &wanted), Some(&newer));
    }

    #[test]
    fn test_select_largest_overlap_when_nothing_covers() {
        let one = result(&["catholic"]);
        let two = result(&["catholic", "lutheran"]);
        let wanted = set(&["catholic", "lutheran", "baptist"]);
        let entries = vec![one, two.clone()];
        assert_eq!(select_best(&entries, &wanted), Some(&two));
        assert_eq!(select_covering(&entries, &wanted), None);
    }

    #[test]
    fn test_select_ignores_disjoint() {
        let entries = vec![result(&["moravian"])];
        assert_eq!(select_best(&entries, &set(&["catholic"])), None);
    }

    #[test]
    fn test_ensure_matches_key() {
        let r = result(&["catholic", "baptist"]);
        assert!(ensure_matches_key(&key(&["baptist", "catholic"]), &r).is_ok());
        assert!(matches!(
            ensure_matches_key(&key(&["catholic"]), &r),
            Err(StoreError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn test_hit_rate() {
        let stats = StoreStats {
            hits: 3,
            partial_hits: 0,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(StoreStats::default().hit_rate(), 0.0);
    }
}
