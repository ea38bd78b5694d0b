//! # redb-backed Triage Store
//!
//! A disk-backed store using the redb embedded database.
//!
//! redb provides ACID write transactions with a single writer at a time and
//! MVCC snapshots for readers. Each store operation runs in one transaction,
//! which gives:
//! - compare-and-create of buckets (check and insert share a transaction)
//! - atomic associations (assignment, member index, counters, activity index)
//! - readers that never see a half-applied write
//!
//! ## Key Layout
//!
//! Secondary indexes use composite string keys so redb's byte ordering
//! matches the query order. Timestamps are encoded as 16 hex digits of the
//! sign-flipped millisecond value, which sorts the same as the `i64`.

use super::{
    Recorded, StoreStats, TriageStore, WriteOutcome, by_activity, by_arrival, check_range,
    conflict,
};
use crate::{Bucket, BucketId, Dump, DumpId, EntityRef, PropertySet, Timestamp, TriageError};
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Table for dumps: DumpId -> serialized Dump
const DUMPS: TableDefinition<&str, &[u8]> = TableDefinition::new("dumps");

/// Table for buckets: BucketId -> serialized Bucket
const BUCKETS: TableDefinition<&str, &[u8]> = TableDefinition::new("buckets");

/// Table for assignments: DumpId -> BucketId
const ASSIGNMENTS: TableDefinition<&str, &str> = TableDefinition::new("assignments");

/// Member index: "bucket \0 ts \0 dump" -> DumpId
const MEMBERS: TableDefinition<&str, &str> = TableDefinition::new("members");

/// Activity index: "last_updated \0 bucket" -> BucketId
const ACTIVITY: TableDefinition<&str, &str> = TableDefinition::new("activity");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// On-disk layout version written at creation.
const SCHEMA_VERSION: u64 = 1;

/// A persistent `TriageStore` using redb.
pub struct RedbStore {
    /// The redb database handle.
    db: Database,
    /// Location of the database file.
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn unavailable<E: std::fmt::Display>(e: E) -> TriageError {
    TriageError::StoreUnavailable(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, TriageError> {
    postcard::to_allocvec(value).map_err(|e| TriageError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TriageError> {
    postcard::from_bytes(bytes).map_err(|e| TriageError::SerializationError(e.to_string()))
}

fn ordered(ts: Timestamp) -> String {
    format!("{:016x}", (ts.0 as u64) ^ (1u64 << 63))
}

fn member_key(bucket: &BucketId, ts: Timestamp, dump: &DumpId) -> String {
    format!("{}\0{}\0{}", bucket, ordered(ts), dump)
}

fn activity_key(ts: Timestamp, bucket: &BucketId) -> String {
    format!("{}\0{}", ordered(ts), bucket)
}

impl RedbStore {
    /// Open or create a triage database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::StoreUnavailable` if the file cannot be opened
    /// or was written by an incompatible layout version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TriageError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(unavailable)?;

        // Create every table up front so readers never hit a missing table.
        let write_txn = db.begin_write().map_err(unavailable)?;
        {
            let _ = write_txn.open_table(DUMPS).map_err(unavailable)?;
            let _ = write_txn.open_table(BUCKETS).map_err(unavailable)?;
            let _ = write_txn.open_table(ASSIGNMENTS).map_err(unavailable)?;
            let _ = write_txn.open_table(MEMBERS).map_err(unavailable)?;
            let _ = write_txn.open_table(ACTIVITY).map_err(unavailable)?;

            let mut meta = write_txn.open_table(METADATA).map_err(unavailable)?;
            let version = meta
                .get("schema_version")
                .map_err(unavailable)?
                .map(|v| v.value());
            match version {
                None => {
                    meta.insert("schema_version", SCHEMA_VERSION)
                        .map_err(unavailable)?;
                }
                Some(SCHEMA_VERSION) => {}
                Some(other) => {
                    return Err(TriageError::StoreUnavailable(format!(
                        "unsupported schema version {} (expected {})",
                        other, SCHEMA_VERSION
                    )));
                }
            }
        }
        write_txn.commit().map_err(unavailable)?;

        tracing::debug!(path = %path.display(), "opened redb triage store");
        Ok(Self { db, path })
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// WRITE STEPS
// =============================================================================
//
// Each step works inside a caller-owned write transaction and closes the
// tables it opens. An error return leaves the transaction uncommitted, and
// dropping it rolls back every step applied so far.

fn put_dump_in(txn: &WriteTransaction, dump: &Dump) -> Result<WriteOutcome, TriageError> {
    let mut table = txn.open_table(DUMPS).map_err(unavailable)?;
    let existing = table
        .get(dump.id.as_str())
        .map_err(unavailable)?
        .map(|v| v.value().to_vec());
    match existing {
        Some(bytes) => {
            let stored: Dump = decode(&bytes)?;
            if stored != *dump {
                return Err(conflict("dump", dump.id.as_str()));
            }
            Ok(WriteOutcome::Unchanged)
        }
        None => {
            let bytes = encode(dump)?;
            table
                .insert(dump.id.as_str(), bytes.as_slice())
                .map_err(unavailable)?;
            Ok(WriteOutcome::Inserted)
        }
    }
}

fn get_bucket_in(txn: &WriteTransaction, id: &str) -> Result<Option<Bucket>, TriageError> {
    let buckets = txn.open_table(BUCKETS).map_err(unavailable)?;
    let stored = buckets.get(id).map_err(unavailable)?;
    stored.map(|data| decode(data.value())).transpose()
}

fn create_bucket_in(txn: &WriteTransaction, bucket: &Bucket) -> Result<(), TriageError> {
    let bytes = encode(bucket)?;
    let mut buckets = txn.open_table(BUCKETS).map_err(unavailable)?;
    buckets
        .insert(bucket.id.as_str(), bytes.as_slice())
        .map_err(unavailable)?;
    let mut activity = txn.open_table(ACTIVITY).map_err(unavailable)?;
    activity
        .insert(
            activity_key(bucket.last_updated, &bucket.id).as_str(),
            bucket.id.as_str(),
        )
        .map_err(unavailable)?;
    Ok(())
}

fn insert_bucket_in(
    txn: &WriteTransaction,
    bucket: &Bucket,
) -> Result<(Bucket, WriteOutcome), TriageError> {
    match get_bucket_in(txn, bucket.id.as_str())? {
        Some(existing) => Ok((existing, WriteOutcome::Unchanged)),
        None => {
            create_bucket_in(txn, bucket)?;
            Ok((bucket.clone(), WriteOutcome::Inserted))
        }
    }
}

fn assignment_in(txn: &WriteTransaction, dump: &DumpId) -> Result<Option<BucketId>, TriageError> {
    let assignments = txn.open_table(ASSIGNMENTS).map_err(unavailable)?;
    Ok(assignments
        .get(dump.as_str())
        .map_err(unavailable)?
        .map(|v| BucketId::new(v.value())))
}

fn associate_in(
    txn: &WriteTransaction,
    dump: &DumpId,
    bucket: &BucketId,
) -> Result<WriteOutcome, TriageError> {
    let timestamp = {
        let dumps = txn.open_table(DUMPS).map_err(unavailable)?;
        match dumps.get(dump.as_str()).map_err(unavailable)? {
            Some(data) => decode::<Dump>(data.value())?.timestamp,
            None => return Err(TriageError::NotFound(EntityRef::Dump(dump.clone()))),
        }
    };

    match assignment_in(txn, dump)? {
        Some(current) if current == *bucket => return Ok(WriteOutcome::Unchanged),
        Some(current) => {
            return Err(TriageError::Conflict(format!(
                "dump '{}' is already assigned to bucket '{}'",
                dump, current
            )));
        }
        None => {}
    }

    let mut record = get_bucket_in(txn, bucket.as_str())?
        .ok_or_else(|| TriageError::NotFound(EntityRef::Bucket(bucket.clone())))?;

    let mut activity = txn.open_table(ACTIVITY).map_err(unavailable)?;
    activity
        .remove(activity_key(record.last_updated, bucket).as_str())
        .map_err(unavailable)?;
    record.record_member(timestamp);
    activity
        .insert(
            activity_key(record.last_updated, bucket).as_str(),
            bucket.as_str(),
        )
        .map_err(unavailable)?;

    let bytes = encode(&record)?;
    let mut buckets = txn.open_table(BUCKETS).map_err(unavailable)?;
    buckets
        .insert(bucket.as_str(), bytes.as_slice())
        .map_err(unavailable)?;
    let mut assignments = txn.open_table(ASSIGNMENTS).map_err(unavailable)?;
    assignments
        .insert(dump.as_str(), bucket.as_str())
        .map_err(unavailable)?;
    let mut members = txn.open_table(MEMBERS).map_err(unavailable)?;
    members
        .insert(member_key(bucket, timestamp, dump).as_str(), dump.as_str())
        .map_err(unavailable)?;

    Ok(WriteOutcome::Inserted)
}

impl TriageStore for RedbStore {
    fn put_dump(&self, dump: &Dump) -> Result<WriteOutcome, TriageError> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let outcome = put_dump_in(&write_txn, dump)?;
        write_txn.commit().map_err(unavailable)?;
        Ok(outcome)
    }

    fn put_bucket(&self, bucket: &Bucket) -> Result<WriteOutcome, TriageError> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let outcome = match get_bucket_in(&write_txn, bucket.id.as_str())? {
            Some(stored) if stored == *bucket => WriteOutcome::Unchanged,
            Some(_) => return Err(conflict("bucket", bucket.id.as_str())),
            None => {
                create_bucket_in(&write_txn, bucket)?;
                WriteOutcome::Inserted
            }
        };
        write_txn.commit().map_err(unavailable)?;
        Ok(outcome)
    }

    fn insert_bucket_if_absent(
        &self,
        bucket: &Bucket,
    ) -> Result<(Bucket, WriteOutcome), TriageError> {
        // redb serializes write transactions, so the lookup and the insert
        // cannot interleave with another writer.
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let result = insert_bucket_in(&write_txn, bucket)?;
        write_txn.commit().map_err(unavailable)?;
        Ok(result)
    }

    fn associate_dump_with_bucket(
        &self,
        dump: &DumpId,
        bucket: &BucketId,
    ) -> Result<WriteOutcome, TriageError> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let outcome = associate_in(&write_txn, dump, bucket)?;
        if outcome.is_inserted() {
            write_txn.commit().map_err(unavailable)?;
        }
        Ok(outcome)
    }

    fn record_dump(&self, dump: &Dump, candidate: &Bucket) -> Result<Recorded, TriageError> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;

        if !put_dump_in(&write_txn, dump)?.is_inserted() {
            if let Some(bucket) = assignment_in(&write_txn, &dump.id)? {
                return Ok(Recorded {
                    bucket,
                    bucket_created: false,
                    assigned: WriteOutcome::Unchanged,
                });
            }
        }

        let (bucket, created) = insert_bucket_in(&write_txn, candidate)?;
        let assigned = associate_in(&write_txn, &dump.id, &bucket.id)?;
        write_txn.commit().map_err(unavailable)?;

        Ok(Recorded {
            bucket: bucket.id,
            bucket_created: created.is_inserted(),
            assigned,
        })
    }

    fn get_buckets_in_range(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Bucket>, TriageError> {
        check_range(start, end)?;

        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let activity = read_txn.open_table(ACTIVITY).map_err(unavailable)?;
        let buckets = read_txn.open_table(BUCKETS).map_err(unavailable)?;

        // Keys of a given timestamp all extend `ordered(ts)`, so this range
        // covers start <= last_updated < end.
        let lower = ordered(start);
        let upper = ordered(end);

        let mut result = Vec::new();
        for entry in activity
            .range(lower.as_str()..upper.as_str())
            .map_err(unavailable)?
        {
            let (_, id) = entry.map_err(unavailable)?;
            if let Some(data) = buckets.get(id.value()).map_err(unavailable)? {
                result.push(decode::<Bucket>(data.value())?);
            }
        }
        result.sort_by(by_activity);
        Ok(result)
    }

    fn get_dumps_for_bucket(&self, bucket: &BucketId) -> Result<Vec<Dump>, TriageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let buckets = read_txn.open_table(BUCKETS).map_err(unavailable)?;
        if buckets.get(bucket.as_str()).map_err(unavailable)?.is_none() {
            return Err(TriageError::NotFound(EntityRef::Bucket(bucket.clone())));
        }

        let members = read_txn.open_table(MEMBERS).map_err(unavailable)?;
        let dumps = read_txn.open_table(DUMPS).map_err(unavailable)?;

        let lower = format!("{}\0", bucket);
        let upper = format!("{}\u{1}", bucket);

        let mut result = Vec::new();
        for entry in members
            .range(lower.as_str()..upper.as_str())
            .map_err(unavailable)?
        {
            let (_, id) = entry.map_err(unavailable)?;
            if let Some(data) = dumps.get(id.value()).map_err(unavailable)? {
                result.push(decode::<Dump>(data.value())?);
            }
        }
        result.sort_by(by_arrival);
        Ok(result)
    }

    fn get_properties(&self, dump: &DumpId) -> Result<PropertySet, TriageError> {
        self.get_dump(dump)?
            .map(|d| d.properties)
            .ok_or_else(|| TriageError::NotFound(EntityRef::Dump(dump.clone())))
    }

    fn get_bucket(&self, id: &BucketId) -> Result<Option<Bucket>, TriageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let table = read_txn.open_table(BUCKETS).map_err(unavailable)?;
        match table.get(id.as_str()).map_err(unavailable)? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    fn get_dump(&self, id: &DumpId) -> Result<Option<Dump>, TriageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let table = read_txn.open_table(DUMPS).map_err(unavailable)?;
        match table.get(id.as_str()).map_err(unavailable)? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    fn bucket_of(&self, dump: &DumpId) -> Result<Option<BucketId>, TriageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let table = read_txn.open_table(ASSIGNMENTS).map_err(unavailable)?;
        Ok(table
            .get(dump.as_str())
            .map_err(unavailable)?
            .map(|v| BucketId::new(v.value())))
    }

    fn stats(&self) -> Result<StoreStats, TriageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let buckets = read_txn.open_table(BUCKETS).map_err(unavailable)?;
        let dumps = read_txn.open_table(DUMPS).map_err(unavailable)?;
        let assignments = read_txn.open_table(ASSIGNMENTS).map_err(unavailable)?;
        Ok(StoreStats {
            buckets: buckets.len().map_err(unavailable)?,
            dumps: dumps.len().map_err(unavailable)?,
            associations: assignments.len().map_err(unavailable)?,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
