//! # In-memory Triage Store
//!
//! A volatile store keeping every index in `BTreeMap`/`BTreeSet` for
//! deterministic ordering. One `RwLock` guards all indexes, so each write
//! (including the compare-and-create of a bucket and the multi-index update
//! of an association) is atomic with respect to readers.

use super::{
    Recorded, StoreStats, TriageStore, WriteOutcome, by_activity, check_range, conflict,
};
use crate::{Bucket, BucketId, Dump, DumpId, EntityRef, PropertySet, Timestamp, TriageError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    /// DumpId -> Dump
    dumps: BTreeMap<DumpId, Dump>,
    /// BucketId -> Bucket
    buckets: BTreeMap<BucketId, Bucket>,
    /// DumpId -> BucketId (write-once)
    assignments: BTreeMap<DumpId, BucketId>,
    /// BucketId -> members ordered by (timestamp, dump id)
    members: BTreeMap<BucketId, BTreeSet<(Timestamp, DumpId)>>,
    /// (last_updated, bucket id), for range scans
    activity: BTreeSet<(Timestamp, BucketId)>,
}

/// Volatile `TriageStore` backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, TriageError> {
        self.tables
            .read()
            .map_err(|_| TriageError::StoreUnavailable("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, TriageError> {
        self.tables
            .write()
            .map_err(|_| TriageError::StoreUnavailable("memory store lock poisoned".to_string()))
    }
}

impl Tables {
    fn put_dump(&mut self, dump: &Dump) -> Result<WriteOutcome, TriageError> {
        match self.dumps.get(&dump.id) {
            Some(existing) if existing == dump => Ok(WriteOutcome::Unchanged),
            Some(_) => Err(conflict("dump", dump.id.as_str())),
            None => {
                self.dumps.insert(dump.id.clone(), dump.clone());
                Ok(WriteOutcome::Inserted)
            }
        }
    }

    fn insert_bucket_if_absent(&mut self, bucket: &Bucket) -> (Bucket, WriteOutcome) {
        if let Some(existing) = self.buckets.get(&bucket.id) {
            return (existing.clone(), WriteOutcome::Unchanged);
        }
        self.activity
            .insert((bucket.last_updated, bucket.id.clone()));
        self.buckets.insert(bucket.id.clone(), bucket.clone());
        (bucket.clone(), WriteOutcome::Inserted)
    }

    fn associate(&mut self, dump: &DumpId, bucket: &BucketId) -> Result<WriteOutcome, TriageError> {
        let timestamp = self
            .dumps
            .get(dump)
            .map(|d| d.timestamp)
            .ok_or_else(|| TriageError::NotFound(EntityRef::Dump(dump.clone())))?;

        match self.assignments.get(dump) {
            Some(current) if current == bucket => return Ok(WriteOutcome::Unchanged),
            Some(current) => {
                return Err(TriageError::Conflict(format!(
                    "dump '{}' is already assigned to bucket '{}'",
                    dump, current
                )));
            }
            None => {}
        }

        let record = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| TriageError::NotFound(EntityRef::Bucket(bucket.clone())))?;
        self.activity.remove(&(record.last_updated, bucket.clone()));
        record.record_member(timestamp);
        self.activity.insert((record.last_updated, bucket.clone()));

        self.assignments.insert(dump.clone(), bucket.clone());
        self.members
            .entry(bucket.clone())
            .or_default()
            .insert((timestamp, dump.clone()));

        Ok(WriteOutcome::Inserted)
    }
}

impl TriageStore for MemoryStore {
    fn put_dump(&self, dump: &Dump) -> Result<WriteOutcome, TriageError> {
        self.write()?.put_dump(dump)
    }

    fn put_bucket(&self, bucket: &Bucket) -> Result<WriteOutcome, TriageError> {
        let mut tables = self.write()?;
        match tables.buckets.get(&bucket.id) {
            Some(existing) if existing == bucket => Ok(WriteOutcome::Unchanged),
            Some(_) => Err(conflict("bucket", bucket.id.as_str())),
            None => Ok(tables.insert_bucket_if_absent(bucket).1),
        }
    }

    fn insert_bucket_if_absent(
        &self,
        bucket: &Bucket,
    ) -> Result<(Bucket, WriteOutcome), TriageError> {
        // The write lock is held across the check and the insert.
        Ok(self.write()?.insert_bucket_if_absent(bucket))
    }

    fn associate_dump_with_bucket(
        &self,
        dump: &DumpId,
        bucket: &BucketId,
    ) -> Result<WriteOutcome, TriageError> {
        self.write()?.associate(dump, bucket)
    }

    fn record_dump(&self, dump: &Dump, candidate: &Bucket) -> Result<Recorded, TriageError> {
        let mut tables = self.write()?;

        // A conflicting dump fails here, before anything is written.
        if !tables.put_dump(dump)?.is_inserted() {
            if let Some(bucket) = tables.assignments.get(&dump.id) {
                return Ok(Recorded {
                    bucket: bucket.clone(),
                    bucket_created: false,
                    assigned: WriteOutcome::Unchanged,
                });
            }
        }

        // The dump is stored and unassigned and the bucket exists, so the
        // association below cannot fail.
        let (bucket, created) = tables.insert_bucket_if_absent(candidate);
        let assigned = tables.associate(&dump.id, &bucket.id)?;
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
        let tables = self.read()?;
        let mut result: Vec<Bucket> = tables
            .activity
            .range((start, BucketId::default())..(end, BucketId::default()))
            .filter_map(|(_, id)| tables.buckets.get(id).cloned())
            .collect();
        result.sort_by(by_activity);
        Ok(result)
    }

    fn get_dumps_for_bucket(&self, bucket: &BucketId) -> Result<Vec<Dump>, TriageError> {
        let tables = self.read()?;
        if !tables.buckets.contains_key(bucket) {
            return Err(TriageError::NotFound(EntityRef::Bucket(bucket.clone())));
        }
        // The member set is already in (timestamp, id) order.
        Ok(tables
            .members
            .get(bucket)
            .map(|set| {
                set.iter()
                    .filter_map(|(_, id)| tables.dumps.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_properties(&self, dump: &DumpId) -> Result<PropertySet, TriageError> {
        self.read()?
            .dumps
            .get(dump)
            .map(|d| d.properties.clone())
            .ok_or_else(|| TriageError::NotFound(EntityRef::Dump(dump.clone())))
    }

    fn get_bucket(&self, id: &BucketId) -> Result<Option<Bucket>, TriageError> {
        Ok(self.read()?.buckets.get(id).cloned())
    }

    fn get_dump(&self, id: &DumpId) -> Result<Option<Dump>, TriageError> {
        Ok(self.read()?.dumps.get(id).cloned())
    }

    fn bucket_of(&self, dump: &DumpId) -> Result<Option<BucketId>, TriageError> {
        Ok(self.read()?.assignments.get(dump).cloned())
    }

    fn stats(&self) -> Result<StoreStats, TriageError> {
        let tables = self.read()?;
        Ok(StoreStats {
            buckets: tables.buckets.len() as u64,
            dumps: tables.dumps.len() as u64,
            associations: tables.assignments.len() as u64,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
