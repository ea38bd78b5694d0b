//! # Ingest Pipeline
//!
//! Extract → sign → record.
//!
//! - Malformed dumps are rejected before anything is written
//! - The dump, its bucket and the association are written in one store
//!   transaction (`TriageStore::record_dump`)
//! - Re-ingesting a dump is harmless and reported as a duplicate
//! - Batches run in parallel; writers are serialized inside the store

use rayon::prelude::*;

use crate::classifier::Classifier;
use crate::config::SignatureConfig;
use crate::extractor::{DumpFormat, Extractor};
use crate::primitives::MAX_BATCH_LENGTH;
use crate::store::StoreHandle;
use crate::{Bucket, BucketId, Dump, DumpId, TriageError};

/// What ingesting one dump did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// The dump opened a new bucket.
    NewBucket,
    /// The dump joined an existing bucket.
    Assigned,
    /// The dump was already stored and assigned.
    Duplicate,
}

/// Outcome of a successful ingest.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IngestOutcome {
    /// The ingested dump.
    pub dump: DumpId,
    /// The bucket it belongs to.
    pub bucket: BucketId,
    /// What changed.
    pub status: IngestStatus,
}

/// A raw dump awaiting ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDump {
    /// Raw payload bytes.
    pub bytes: Vec<u8>,
    /// Where the payload came from, if known.
    pub payload_ref: Option<String>,
}

/// Runs raw dumps through extraction, classification and storage.
pub struct IngestPipeline {
    extractor: Extractor,
    classifier: Classifier,
    store: StoreHandle,
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("extractor", &self.extractor)
            .field("classifier", &self.classifier)
            .finish_non_exhaustive()
    }
}

impl IngestPipeline {
    /// Create a pipeline writing to `store`.
    #[must_use]
    pub fn new(store: StoreHandle, config: &SignatureConfig) -> Self {
        Self {
            extractor: Extractor::new(config),
            classifier: Classifier::new(store.clone(), config),
            store,
        }
    }

    /// Force a source format instead of auto-detection.
    #[must_use]
    pub fn with_format(mut self, format: DumpFormat) -> Self {
        self.extractor = self.extractor.with_format(format);
        self
    }

    /// Ingest one raw dump.
    ///
    /// # Errors
    ///
    /// - `MalformedDump` if extraction fails (nothing is stored)
    /// - `Conflict` if a different dump was stored under the same id
    /// - Any store error
    pub fn ingest(
        &self,
        raw: &[u8],
        payload_ref: Option<&str>,
    ) -> Result<IngestOutcome, TriageError> {
        let properties = self.extractor.extract(raw).inspect_err(|e| {
            tracing::warn!(payload = payload_ref.unwrap_or("-"), error = %e, "rejected dump");
        })?;
        let dump = Dump::from_properties(properties, payload_ref.map(str::to_string))?;

        // Dump, bucket and association commit together.
        let candidate = Bucket::new(self.classifier.signature(&dump.properties), dump.timestamp);
        let recorded = self.store.record_dump(&dump, &candidate)?;

        if recorded.bucket_created {
            tracing::info!(bucket = %recorded.bucket, "created bucket");
        }
        let status = if recorded.bucket_created {
            IngestStatus::NewBucket
        } else if recorded.assigned.is_inserted() {
            IngestStatus::Assigned
        } else {
            IngestStatus::Duplicate
        };

        tracing::debug!(dump = %dump.id, bucket = %recorded.bucket, ?status, "ingested dump");
        Ok(IngestOutcome {
            dump: dump.id,
            bucket: recorded.bucket,
            status,
        })
    }

    /// Ingest many raw dumps in parallel.
    ///
    /// Results are returned in input order; one malformed dump does not
    /// affect the others.
    ///
    /// # Errors
    ///
    /// `MalformedDump` if the batch exceeds `MAX_BATCH_LENGTH`.
    pub fn ingest_batch(
        &self,
        batch: &[RawDump],
    ) -> Result<Vec<Result<IngestOutcome, TriageError>>, TriageError> {
        if batch.len() > MAX_BATCH_LENGTH {
            return Err(TriageError::malformed(
                "batch",
                &format!("{} dumps exceeds limit of {}", batch.len(), MAX_BATCH_LENGTH),
            ));
        }

        Ok(batch
            .par_iter()
            .map(|raw| self.ingest(&raw.bytes, raw.payload_ref.as_deref()))
            .collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Recorded, StoreStats, TriageStore, WriteOutcome};
    use crate::{PropertySet, Timestamp};
    use std::sync::Arc;

    /// Memory store that refuses every single-step write, and optionally
    /// the combined one too.
    struct OnlyCombinedWrites {
        inner: MemoryStore,
        fail_record: bool,
    }

    fn refused() -> TriageError {
        TriageError::StoreUnavailable("write refused".to_string())
    }

    impl TriageStore for OnlyCombinedWrites {
        fn put_dump(&self, _: &Dump) -> Result<WriteOutcome, TriageError> {
            Err(refused())
        }
        fn put_bucket(&self, _: &Bucket) -> Result<WriteOutcome, TriageError> {
            Err(refused())
        }
        fn insert_bucket_if_absent(
            &self,
            _: &Bucket,
        ) -> Result<(Bucket, WriteOutcome), TriageError> {
            Err(refused())
        }
        fn associate_dump_with_bucket(
            &self,
            _: &DumpId,
            _: &BucketId,
        ) -> Result<WriteOutcome, TriageError> {
            Err(refused())
        }
        fn record_dump(&self, dump: &Dump, candidate: &Bucket) -> Result<Recorded, TriageError> {
            if self.fail_record {
                return Err(refused());
            }
            self.inner.record_dump(dump, candidate)
        }
        fn get_buckets_in_range(
            &self,
            start: Timestamp,
            end: Timestamp,
        ) -> Result<Vec<Bucket>, TriageError> {
            self.inner.get_buckets_in_range(start, end)
        }
        fn get_dumps_for_bucket(&self, bucket: &BucketId) -> Result<Vec<Dump>, TriageError> {
            self.inner.get_dumps_for_bucket(bucket)
        }
        fn get_properties(&self, dump: &DumpId) -> Result<PropertySet, TriageError> {
            self.inner.get_properties(dump)
        }
        fn get_bucket(&self, id: &BucketId) -> Result<Option<Bucket>, TriageError> {
            self.inner.get_bucket(id)
        }
        fn get_dump(&self, id: &DumpId) -> Result<Option<Dump>, TriageError> {
            self.inner.get_dump(id)
        }
        fn bucket_of(&self, dump: &DumpId) -> Result<Option<BucketId>, TriageError> {
            self.inner.bucket_of(dump)
        }
        fn stats(&self) -> Result<StoreStats, TriageError> {
            self.inner.stats()
        }
    }

    fn guarded(fail_record: bool) -> (IngestPipeline, Arc<OnlyCombinedWrites>) {
        let store = Arc::new(OnlyCombinedWrites {
            inner: MemoryStore::new(),
            fail_record,
        });
        let pipeline = IngestPipeline::new(store.clone(), &SignatureConfig::default());
        (pipeline, store)
    }

    fn pipeline() -> (IngestPipeline, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let pipeline = IngestPipeline::new(store.clone(), &SignatureConfig::default());
        (pipeline, store)
    }

    fn json(id: &str, ts: &str, hash: &str) -> Vec<u8> {
        format!(r#"{{"dump_id":"{id}","timestamp":"{ts}","stack_hash":"{hash}"}}"#).into_bytes()
    }

    #[test]
    fn first_dump_opens_bucket_second_joins() {
        let (pipeline, store) = pipeline();

        let first = pipeline
            .ingest(&json("D1", "2024-01-10T00:00:00Z", "H1"), None)
            .expect("ingest");
        assert_eq!(first.status, IngestStatus::NewBucket);
        assert_eq!(first.bucket, BucketId::new("H1"));

        let second = pipeline
            .ingest(&json("D2", "2024-01-11T00:00:00Z", "H1"), None)
            .expect("ingest");
        assert_eq!(second.status, IngestStatus::Assigned);
        assert_eq!(second.bucket, first.bucket);

        assert_eq!(store.stats().expect("stats").associations, 2);
    }

    #[test]
    fn reingest_is_duplicate() {
        let (pipeline, store) = pipeline();
        let raw = json("D1", "2024-01-10T00:00:00Z", "H1");

        pipeline.ingest(&raw, Some("a.json")).expect("ingest");
        let again = pipeline.ingest(&raw, Some("a.json")).expect("ingest");
        assert_eq!(again.status, IngestStatus::Duplicate);

        let bucket = store
            .get_bucket(&BucketId::new("H1"))
            .expect("get")
            .expect("present");
        assert_eq!(bucket.dump_count, 1);
    }

    #[test]
    fn malformed_dump_stores_nothing() {
        let (pipeline, store) = pipeline();
        let err = pipeline
            .ingest(br#"{"timestamp":"2024-01-10T00:00:00Z"}"#, None)
            .unwrap_err();
        assert!(matches!(err, TriageError::MalformedDump { .. }));

        let stats = store.stats().expect("stats");
        assert_eq!(stats.dumps, 0);
        assert_eq!(stats.buckets, 0);
    }

    #[test]
    fn ingest_writes_through_one_store_call() {
        let (pipeline, store) = guarded(false);
        let outcome = pipeline
            .ingest(&json("D1", "2024-01-10T00:00:00Z", "H1"), None)
            .expect("ingest");
        assert_eq!(outcome.status, IngestStatus::NewBucket);

        let stats = store.stats().expect("stats");
        assert_eq!((stats.buckets, stats.dumps, stats.associations), (1, 1, 1));
    }

    #[test]
    fn failed_write_leaves_no_empty_bucket() {
        let (pipeline, store) = guarded(true);
        let err = pipeline
            .ingest(&json("D1", "2024-01-10T00:00:00Z", "H1"), None)
            .unwrap_err();
        assert!(err.is_retryable());

        assert_eq!(store.stats().expect("stats"), StoreStats::default());
        let active = store
            .get_buckets_in_range(Timestamp::from_millis(0), Timestamp::from_millis(i64::MAX))
            .expect("range");
        assert!(active.is_empty());
    }

    #[test]
    fn batch_keeps_input_order() {
        let (pipeline, _store) = pipeline();
        let batch: Vec<RawDump> = (0..20)
            .map(|i| RawDump {
                bytes: json(&format!("D{i:02}"), "2024-01-10T00:00:00Z", "H1"),
                payload_ref: None,
            })
            .chain(std::iter::once(RawDump {
                bytes: b"garbage".to_vec(),
                payload_ref: None,
            }))
            .collect();

        let results = pipeline.ingest_batch(&batch).expect("batch");
        assert_eq!(results.len(), 21);
        for (i, result) in results.iter().take(20).enumerate() {
            assert_eq!(result.as_ref().expect("ok").dump, DumpId::new(format!("D{i:02}")));
        }
        assert!(results[20].is_err());

        let created = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .filter(|o| o.status == IngestStatus::NewBucket)
            .count();
        assert_eq!(created, 1);
    }
}
