//! # Query Module
//!
//! Read side of the triage engine and the dashboard view model.
//!
//! - Thin, stateless passthroughs over an explicit `StoreHandle`
//! - `NotFound` on a bucket listing becomes an empty list
//! - Dashboard expansion fans out in parallel and keeps store order
//! - Property JSON is byte-identical for a given dump

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use crate::config::QueryConfig;
use crate::store::{StoreHandle, check_range};
use crate::{Bucket, BucketId, Dump, DumpId, Timestamp, TriageError};

// =============================================================================
// WINDOW
// =============================================================================

/// Half-open time window `[start, end)` over `last_updated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Inclusive lower bound.
    pub start: Timestamp,
    /// Exclusive upper bound.
    pub end: Timestamp,
}

impl Window {
    /// Create a window, rejecting `start >= end`.
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, TriageError> {
        check_range(start, end)?;
        Ok(Self { start, end })
    }

    /// The dashboard window: from midnight `window_days` days ago until
    /// `lookahead_days` days past `now`.
    #[must_use]
    pub fn trailing(now: Timestamp, window_days: i64, lookahead_days: i64) -> Self {
        Self {
            start: now.start_of_day().plus_days(-window_days),
            end: now.plus_days(lookahead_days),
        }
    }
}

// =============================================================================
// VIEW MODEL
// =============================================================================

/// Everything a dashboard page needs, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardView {
    /// Window start (RFC 3339).
    pub window_start: String,
    /// Window end (RFC 3339).
    pub window_end: String,
    /// Active buckets, most recently updated first.
    pub buckets: Vec<BucketEntry>,
}

/// One bucket row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketEntry {
    pub id: String,
    pub signature: String,
    pub created_at: String,
    pub last_updated: String,
    pub dump_count: u64,
    /// Member dumps, oldest first.
    pub dumps: Vec<DumpEntry>,
}

/// One dump row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpEntry {
    pub dump_id: String,
    pub timestamp: String,
    /// Pre-serialized property JSON.
    pub properties_json: String,
}

// =============================================================================
// JSON CACHE
// =============================================================================

/// Bounded FIFO cache of property JSON.
///
/// Properties are write-once, so an entry never goes stale.
#[derive(Debug)]
struct JsonCache {
    capacity: usize,
    entries: BTreeMap<DumpId, String>,
    order: VecDeque<DumpId>,
}

impl JsonCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: BTreeMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, id: &DumpId) -> Option<String> {
        self.entries.get(id).cloned()
    }

    fn insert(&mut self, id: DumpId, json: String) {
        if self.capacity == 0 || self.entries.contains_key(&id) {
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(id.clone());
        self.entries.insert(id, json);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// =============================================================================
// QUERY SERVICE
// =============================================================================

/// Read-only facade over the triage store.
pub struct QueryService {
    store: StoreHandle,
    cache: Mutex<JsonCache>,
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("cached", &self.cached_json_entries())
            .finish_non_exhaustive()
    }
}

impl QueryService {
    /// Create a query service over a store handle.
    #[must_use]
    pub fn new(store: StoreHandle, config: &QueryConfig) -> Self {
        Self {
            store,
            cache: Mutex::new(JsonCache::new(config.json_cache_capacity)),
        }
    }

    /// Buckets updated within `[start, end)`, most recent first.
    ///
    /// Returns `TriageError::InvalidRange` unless `start < end`.
    pub fn list_active_buckets(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Bucket>, TriageError> {
        check_range(start, end)?;
        self.store.get_buckets_in_range(start, end)
    }

    /// Dumps of a bucket, oldest first. An unknown bucket yields an empty list.
    pub fn list_dumps(&self, bucket: &BucketId) -> Result<Vec<Dump>, TriageError> {
        match self.store.get_dumps_for_bucket(bucket) {
            Ok(dumps) => Ok(dumps),
            Err(TriageError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Compact JSON object of a dump's properties, keys in byte order.
    ///
    /// Returns `TriageError::NotFound` for an unknown dump.
    pub fn get_properties_json(&self, dump: &DumpId) -> Result<String, TriageError> {
        if let Some(json) = self.lock_cache().get(dump) {
            return Ok(json);
        }
        let json = self.store.get_properties(dump)?.to_json()?;
        self.lock_cache().insert(dump.clone(), json.clone());
        Ok(json)
    }

    /// Build the dashboard view for a window.
    ///
    /// Buckets, and the dumps within each bucket, are expanded in parallel;
    /// the result keeps the order of `list_active_buckets` and `list_dumps`.
    pub fn dashboard(&self, window: &Window) -> Result<DashboardView, TriageError> {
        let buckets = self.list_active_buckets(window.start, window.end)?;
        let entries = buckets
            .into_par_iter()
            .map(|bucket| self.bucket_entry(bucket))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(buckets = entries.len(), "built dashboard");
        Ok(DashboardView {
            window_start: window.start.to_string(),
            window_end: window.end.to_string(),
            buckets: entries,
        })
    }

    /// Number of property JSON strings currently cached.
    #[must_use]
    pub fn cached_json_entries(&self) -> usize {
        self.lock_cache().len()
    }

    fn bucket_entry(&self, bucket: Bucket) -> Result<BucketEntry, TriageError> {
        let dumps = self
            .list_dumps(&bucket.id)?
            .into_par_iter()
            .map(|dump| {
                Ok(DumpEntry {
                    properties_json: self.get_properties_json(&dump.id)?,
                    dump_id: dump.id.0,
                    timestamp: dump.timestamp.to_string(),
                })
            })
            .collect::<Result<Vec<_>, TriageError>>()?;

        Ok(BucketEntry {
            id: bucket.id.0,
            signature: bucket.signature.0,
            created_at: bucket.created_at.to_string(),
            last_updated: bucket.last_updated.to_string(),
            dump_count: bucket.dump_count,
            dumps,
        })
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, JsonCache> {
        // Cache contents are always consistent; a panic elsewhere cannot
        // leave a half-inserted entry.
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// TESTS
// =============================================================================
