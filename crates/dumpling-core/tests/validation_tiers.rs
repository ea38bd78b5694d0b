//! # Validation Tier Tests (T0-T3)
//!
//! If ANY tier fails, the triage engine is INVALID.
//!
//! ## Tiers
//! - T0: Extraction Integrity
//! - T1: Deterministic Classification
//! - T2: Store Semantics (both backends)
//! - T3: Query Semantics and end-to-end scenarios

use dumpling_core::{
    BucketId, DumpId, IngestPipeline, IngestStatus, MemoryStore, QueryConfig, QueryService,
    RedbStore, SignatureConfig, StoreHandle, Timestamp, TriageError, TriageStore, Window,
};
use std::sync::Arc;
use tempfile::TempDir;

fn ts(s: &str) -> Timestamp {
    Timestamp::parse_rfc3339(s).expect("timestamp")
}

fn dump_json(id: &str, timestamp: &str, stack_hash: &str) -> Vec<u8> {
    format!(r#"{{"dump_id":"{id}","timestamp":"{timestamp}","stack_hash":"{stack_hash}"}}"#)
        .into_bytes()
}

/// Every backend under test. The `TempDir` keeps the redb file alive.
fn backends() -> Vec<(&'static str, StoreHandle, Option<TempDir>)> {
    let dir = tempfile::tempdir().expect("temp dir");
    let memory: StoreHandle = Arc::new(MemoryStore::new());
    let redb: StoreHandle =
        Arc::new(RedbStore::open(dir.path().join("triage.redb")).expect("open db"));
    vec![("memory", memory, None), ("redb", redb, Some(dir))]
}

// =============================================================================
// TIER T0: EXTRACTION INTEGRITY
// =============================================================================

mod t0_extraction_integrity {
    use super::*;
    use dumpling_core::Extractor;

    /// T0.1: A dump without its id is malformed.
    #[test]
    fn missing_id_rejected() {
        let result = Extractor::default().extract(br#"{"timestamp":"2024-01-10T00:00:00Z"}"#);
        assert!(matches!(
            result,
            Err(TriageError::MalformedDump { ref field, .. }) if field == "dump_id"
        ));
    }

    /// T0.2: A dump without a parseable timestamp is malformed.
    #[test]
    fn bad_timestamp_rejected() {
        let result = Extractor::default().extract(br#"{"dump_id":"D1","timestamp":"yesterday"}"#);
        assert!(matches!(result, Err(TriageError::MalformedDump { .. })));
    }

    /// T0.3: Unknown optional fields never fail extraction.
    #[test]
    fn unknown_fields_tolerated() {
        let props = Extractor::default()
            .extract(br#"{"dump_id":"D1","timestamp":0,"vendor_blob":{"x":[1,2]}}"#)
            .expect("extract");
        assert!(props.contains("vendor_blob"));
    }

    /// T0.4: Extraction is deterministic.
    #[test]
    fn extraction_deterministic() {
        let raw = b"DumpId: D1\nTimestamp: 2024-01-10T00:00:00Z\nStack:\n  app.exe!main+0x1\n";
        let a = Extractor::default().extract(raw).expect("extract");
        let b = Extractor::default().extract(raw).expect("extract");
        assert_eq!(a, b);
    }
}

// =============================================================================
// TIER T1: DETERMINISTIC CLASSIFICATION
// =============================================================================

mod t1_classification {
    use super::*;
    use dumpling_core::{Classifier, PropertySet};

    /// T1.1: Equal signatures classify to the same bucket.
    #[test]
    fn equal_signatures_same_bucket() {
        let classifier = Classifier::new(Arc::new(MemoryStore::new()), &SignatureConfig::default());
        let p1 = PropertySet::new()
            .with("stack_hash", "H1")
            .with("timestamp", 10i64)
            .with("build", "1.0");
        let p2 = PropertySet::new()
            .with("stack_hash", "H1")
            .with("timestamp", 99i64)
            .with("build", "2.0");

        assert_eq!(classifier.signature(&p1), classifier.signature(&p2));
        let c1 = classifier.classify(&p1).expect("classify");
        let c2 = classifier.classify(&p2).expect("classify");
        assert_eq!(c1.bucket, c2.bucket);
        assert!(c1.created);
        assert!(!c2.created);
    }

    /// T1.2: Different fault types split buckets by default.
    #[test]
    fn fault_type_splits_buckets() {
        let classifier = Classifier::new(Arc::new(MemoryStore::new()), &SignatureConfig::default());
        let p1 = PropertySet::new()
            .with("stack_hash", "H1")
            .with("exception_code", "0xc0000005");
        let p2 = PropertySet::new()
            .with("stack_hash", "H1")
            .with("exception_code", "0xc0000409");
        assert_ne!(classifier.signature(&p1), classifier.signature(&p2));
    }
}

// =============================================================================
// TIER T2: STORE SEMANTICS
// =============================================================================

mod t2_store {
    use super::*;
    use dumpling_core::{Bucket, Dump, PropertySet, Signature, WriteOutcome};

    fn dump(id: &str, at: &str) -> Dump {
        Dump {
            id: DumpId::new(id),
            timestamp: ts(at),
            payload_ref: None,
            properties: PropertySet::new().with("dump_id", id).with("timestamp", at),
        }
    }

    /// T2.1: Writes are idempotent on every backend.
    #[test]
    fn writes_idempotent() {
        for (name, store, _dir) in backends() {
            let d = dump("D1", "2024-01-10T00:00:00Z");
            let b = Bucket::new(Signature("H1".into()), d.timestamp);

            store.put_dump(&d).expect("put");
            store.put_bucket(&b).expect("put");
            store
                .associate_dump_with_bucket(&d.id, &b.id)
                .expect("assoc");
            let before = store.stats().expect("stats");
            let bucket_before = store.get_bucket(&b.id).expect("get");

            assert_eq!(store.put_dump(&d).expect("put"), WriteOutcome::Unchanged, "{name}");
            assert_eq!(
                store
                    .associate_dump_with_bucket(&d.id, &b.id)
                    .expect("assoc"),
                WriteOutcome::Unchanged,
                "{name}"
            );

            assert_eq!(store.stats().expect("stats"), before, "{name}");
            assert_eq!(store.get_bucket(&b.id).expect("get"), bucket_before, "{name}");
        }
    }

    /// T2.2: Range queries are half-open and ordered by activity.
    #[test]
    fn range_half_open_descending() {
        for (name, store, _dir) in backends() {
            for (sig, at) in [
                ("A", "2024-01-01T00:00:00Z"),
                ("B", "2024-01-03T00:00:00Z"),
                ("C", "2024-01-05T00:00:00Z"),
                ("D", "2024-01-03T00:00:00Z"),
            ] {
                store
                    .put_bucket(&Bucket::new(Signature(sig.into()), ts(at)))
                    .expect("bucket");
            }

            let found = store
                .get_buckets_in_range(ts("2024-01-01T00:00:00Z"), ts("2024-01-05T00:00:00Z"))
                .expect("range");
            let ids: Vec<_> = found.iter().map(|b| b.id.as_str()).collect();
            assert_eq!(ids, vec!["B", "D", "A"], "{name}");
        }
    }

    /// T2.3: An inverted range is rejected.
    #[test]
    fn inverted_range_rejected() {
        for (name, store, _dir) in backends() {
            let result =
                store.get_buckets_in_range(ts("2024-01-05T00:00:00Z"), ts("2024-01-01T00:00:00Z"));
            assert!(
                matches!(result, Err(TriageError::InvalidRange { .. })),
                "{name}"
            );
        }
    }
}

// =============================================================================
// TIER T3: QUERY SEMANTICS AND SCENARIOS
// =============================================================================

mod t3_scenarios {
    use super::*;

    /// T3.1: D1 creates "H1", D2 joins it, the bucket advances, ListDumps is [D1, D2].
    #[test]
    fn two_dumps_one_bucket() {
        for (name, store, _dir) in backends() {
            let pipeline = IngestPipeline::new(store.clone(), &SignatureConfig::default());
            let query = QueryService::new(store.clone(), &QueryConfig::default());

            let first = pipeline
                .ingest(&dump_json("D1", "2024-01-10T00:00:00Z", "H1"), None)
                .expect("ingest D1");
            assert_eq!(first.status, IngestStatus::NewBucket, "{name}");
            assert_eq!(first.bucket, BucketId::new("H1"), "{name}");

            let second = pipeline
                .ingest(&dump_json("D2", "2024-01-12T08:00:00Z", "H1"), None)
                .expect("ingest D2");
            assert_eq!(second.status, IngestStatus::Assigned, "{name}");
            assert_eq!(second.bucket, BucketId::new("H1"), "{name}");

            let bucket = store
                .get_bucket(&BucketId::new("H1"))
                .expect("get")
                .expect("bucket exists");
            assert_eq!(bucket.last_updated, ts("2024-01-12T08:00:00Z"), "{name}");
            assert_eq!(bucket.created_at, ts("2024-01-10T00:00:00Z"), "{name}");
            assert_eq!(bucket.dump_count, 2, "{name}");

            let ids: Vec<_> = query
                .list_dumps(&BucketId::new("H1"))
                .expect("list")
                .into_iter()
                .map(|d| d.id.0)
                .collect();
            assert_eq!(ids, vec!["D1", "D2"], "{name}");
        }
    }

    /// T3.2: A window before the only bucket's activity is empty.
    #[test]
    fn window_before_activity_is_empty() {
        for (name, store, _dir) in backends() {
            let pipeline = IngestPipeline::new(store.clone(), &SignatureConfig::default());
            let query = QueryService::new(store.clone(), &QueryConfig::default());
            pipeline
                .ingest(&dump_json("D1", "2024-01-10T00:00:00Z", "H1"), None)
                .expect("ingest");

            let active = query
                .list_active_buckets(ts("2024-01-01T00:00:00Z"), ts("2024-01-05T00:00:00Z"))
                .expect("list");
            assert!(active.is_empty(), "{name}");
        }
    }

    /// T3.3: A dump missing its id fails and is invisible to every query.
    #[test]
    fn malformed_dump_invisible() {
        for (name, store, _dir) in backends() {
            let pipeline = IngestPipeline::new(store.clone(), &SignatureConfig::default());
            let query = QueryService::new(store.clone(), &QueryConfig::default());

            let result = pipeline.ingest(
                br#"{"timestamp":"2024-01-10T00:00:00Z","stack_hash":"H9"}"#,
                None,
            );
            assert!(
                matches!(result, Err(TriageError::MalformedDump { .. })),
                "{name}"
            );

            let active = query
                .list_active_buckets(ts("2000-01-01T00:00:00Z"), ts("2100-01-01T00:00:00Z"))
                .expect("list");
            assert!(active.is_empty(), "{name}");
            assert!(
                query
                    .list_dumps(&BucketId::new("H9"))
                    .expect("list")
                    .is_empty(),
                "{name}"
            );
            assert_eq!(store.stats().expect("stats").dumps, 0, "{name}");
        }
    }

    /// T3.4: The dashboard reflects ingest order and window.
    #[test]
    fn dashboard_end_to_end() {
        for (name, store, _dir) in backends() {
            let pipeline = IngestPipeline::new(store.clone(), &SignatureConfig::default());
            let query = QueryService::new(store.clone(), &QueryConfig::default());

            for (id, at, hash) in [
                ("D1", "2024-01-10T00:00:00Z", "H1"),
                ("D2", "2024-01-11T00:00:00Z", "H2"),
                ("D3", "2024-01-12T00:00:00Z", "H1"),
            ] {
                pipeline.ingest(&dump_json(id, at, hash), None).expect("ingest");
            }

            let window = Window::trailing(ts("2024-01-20T12:00:00Z"), 30, 1);
            let view = query.dashboard(&window).expect("dashboard");

            let buckets: Vec<_> = view.buckets.iter().map(|b| b.id.as_str()).collect();
            assert_eq!(buckets, vec!["H1", "H2"], "{name}");
            let h1: Vec<_> = view.buckets[0]
                .dumps
                .iter()
                .map(|d| d.dump_id.as_str())
                .collect();
            assert_eq!(h1, vec!["D1", "D3"], "{name}");
            assert_eq!(view.window_start, "2023-12-21T00:00:00.000Z", "{name}");
        }
    }
}
