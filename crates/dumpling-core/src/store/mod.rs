//! # Triage Store
//!
//! Durable mapping of buckets ↔ dumps ↔ properties.
//!
//! This module defines the `TriageStore` trait and its two backends:
//! - `MemoryStore`: `RwLock` over `BTreeMap` indexes (fast, volatile)
//! - `RedbStore`: redb embedded database (ACID, persistent)
//!
//! ## Write Semantics
//!
//! Every write is idempotent: re-applying it with identical arguments is a
//! no-op reported as `WriteOutcome::Unchanged`. Writing different content
//! under an existing id is a `TriageError::Conflict`, since dumps,
//! properties and dump→bucket assignments are write-once.
//!
//! ## Read Semantics
//!
//! Readers never observe a partially written association: the association
//! record, the member index and the bucket's counters change together.

mod memory;
mod redb_store;

pub use self::memory::MemoryStore;
pub use self::redb_store::RedbStore;

use crate::{Bucket, BucketId, Dump, DumpId, PropertySet, Timestamp, TriageError};
use std::cmp::Ordering;
use std::sync::Arc;

/// Shared, explicitly passed store handle.
///
/// Acquired once at process start and handed to the classifier, the
/// ingest pipeline and the query service.
pub type StoreHandle = Arc<dyn TriageStore>;

/// Result of an idempotent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write changed the store.
    Inserted,
    /// An identical record was already present; nothing changed.
    Unchanged,
}

impl WriteOutcome {
    /// Whether the write changed the store.
    #[must_use]
    pub fn is_inserted(self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// Result of `TriageStore::record_dump`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    /// The bucket the dump belongs to.
    pub bucket: BucketId,
    /// Whether this call created the bucket.
    pub bucket_created: bool,
    /// `Inserted` if this call assigned the dump, `Unchanged` if it was
    /// already assigned.
    pub assigned: WriteOutcome,
}

/// Record counts, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct StoreStats {
    /// Number of buckets.
    pub buckets: u64,
    /// Number of dumps.
    pub dumps: u64,
    /// Number of dump→bucket assignments.
    pub associations: u64,
}

/// The TriageStore trait defines the persistence operations of the engine.
///
/// All methods take `&self`; backends synchronize internally so one handle
/// can serve concurrent ingest and query calls.
///
/// All fallible operations return `Result<T, TriageError>` so that
/// in-memory and persistent backends behave uniformly. Backing-storage
/// failures surface as `TriageError::StoreUnavailable`.
pub trait TriageStore: Send + Sync {
    /// Store a dump. Idempotent; a different dump under the same id is a conflict.
    fn put_dump(&self, dump: &Dump) -> Result<WriteOutcome, TriageError>;

    /// Store a bucket record. Idempotent; a different record under the same id is a conflict.
    fn put_bucket(&self, bucket: &Bucket) -> Result<WriteOutcome, TriageError>;

    /// Compare-and-create keyed by bucket id.
    ///
    /// Returns the stored bucket and `Inserted` if this call created it, or
    /// the existing bucket and `Unchanged`. The check and the insert are one
    /// atomic step: concurrent callers with the same id create one bucket.
    fn insert_bucket_if_absent(&self, bucket: &Bucket)
    -> Result<(Bucket, WriteOutcome), TriageError>;

    /// Assign a dump to a bucket.
    ///
    /// Atomically records the assignment, adds the dump to the bucket's
    /// member index, increments `dump_count` and advances `last_updated`.
    /// Re-assigning to the same bucket is `Unchanged`; to another bucket is
    /// a conflict. Unknown dump or bucket is `NotFound`.
    fn associate_dump_with_bucket(
        &self,
        dump: &DumpId,
        bucket: &BucketId,
    ) -> Result<WriteOutcome, TriageError>;

    /// Store a dump and file it under its bucket in one atomic step.
    ///
    /// Combines `put_dump`, `insert_bucket_if_absent(candidate)` and
    /// `associate_dump_with_bucket` in a single write: either all of them
    /// apply or none does, and readers never see the dump without its
    /// bucket or a bucket without its first member. A dump that is already
    /// assigned keeps its bucket and `candidate` is ignored.
    fn record_dump(&self, dump: &Dump, candidate: &Bucket) -> Result<Recorded, TriageError>;

    /// Buckets with `start <= last_updated < end`, most recently updated first.
    fn get_buckets_in_range(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Bucket>, TriageError>;

    /// Dumps assigned to a bucket, oldest first. Unknown bucket is `NotFound`.
    fn get_dumps_for_bucket(&self, bucket: &BucketId) -> Result<Vec<Dump>, TriageError>;

    /// Properties of a dump. Unknown dump is `NotFound`.
    fn get_properties(&self, dump: &DumpId) -> Result<PropertySet, TriageError>;

    /// Look up a bucket.
    fn get_bucket(&self, id: &BucketId) -> Result<Option<Bucket>, TriageError>;

    /// Look up a dump.
    fn get_dump(&self, id: &DumpId) -> Result<Option<Dump>, TriageError>;

    /// The bucket a dump is assigned to, if any.
    fn bucket_of(&self, dump: &DumpId) -> Result<Option<BucketId>, TriageError>;

    /// Record counts.
    fn stats(&self) -> Result<StoreStats, TriageError>;
}

// =============================================================================
// SHARED ORDERING HELPERS
// =============================================================================

/// Dashboard order: `last_updated` descending, ties by id ascending.
pub(crate) fn by_activity(a: &Bucket, b: &Bucket) -> Ordering {
    b.last_updated
        .cmp(&a.last_updated)
        .then_with(|| a.id.cmp(&b.id))
}

/// Member order: dump timestamp ascending, ties by id ascending.
pub(crate) fn by_arrival(a: &Dump, b: &Dump) -> Ordering {
    a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id))
}

/// Validate a range before scanning.
pub(crate) fn check_range(start: Timestamp, end: Timestamp) -> Result<(), TriageError> {
    if start < end {
        Ok(())
    } else {
        Err(TriageError::InvalidRange { start, end })
    }
}

fn conflict(kind: &str, id: &str) -> TriageError {
    TriageError::Conflict(format!("{} '{}' already stored with different content", kind, id))
}
