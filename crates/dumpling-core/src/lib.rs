//! # dumpling-core
//!
//! The crash-triage engine for Dumpling.
//!
//! This crate ingests raw crash dumps, extracts their properties, groups
//! them into buckets by canonical signature and answers the read queries a
//! triage dashboard needs.
//!
//! ## Architecture
//!
//! - `extractor`: raw dump → validated `PropertySet`
//! - `classifier`: `PropertySet` → `Signature` → bucket (exact match)
//! - `store`: the `TriageStore` trait, in-memory and redb backends
//! - `pipeline`: extract → store → classify → associate
//! - `query`: read facade and the typed dashboard view model
//!
//! ## Constraints
//!
//! - Every store access goes through an explicit `StoreHandle`
//! - Writes are idempotent; dumps and assignments are write-once
//! - Ordering is deterministic (BTreeMap indexes, integer timestamps)
//! - NO async, NO network dependencies

// =============================================================================
// MODULES
// =============================================================================

pub mod classifier;
pub mod config;
pub mod extractor;
pub mod pipeline;
pub mod primitives;
pub mod query;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Bucket, BucketId, Dump, DumpId, EntityRef, PropertySet, PropertyValue, Signature, Timestamp,
    TriageError,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use classifier::{Classification, Classifier};
pub use config::{QueryConfig, SignatureConfig, TriageConfig};
pub use extractor::{DumpFormat, Extractor};
pub use pipeline::{IngestOutcome, IngestPipeline, IngestStatus, RawDump};
pub use query::{BucketEntry, DashboardView, DumpEntry, QueryService, Window};
pub use store::{
    MemoryStore, Recorded, RedbStore, StoreHandle, StoreStats, TriageStore, WriteOutcome,
};
