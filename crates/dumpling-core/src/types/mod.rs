//! # Core Type Definitions
//!
//! This module contains all core types for the dumpling triage engine:
//! - Identifiers (`DumpId`, `BucketId`, `Signature`)
//! - Time (`Timestamp`)
//! - Extracted properties (`PropertyValue`, `PropertySet`)
//! - Records (`Dump`, `Bucket`)
//! - Error types (`TriageError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Use saturating arithmetic for counters to prevent overflow

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::primitives::{MAX_ID_LENGTH, props};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique, immutable identifier of a crash dump.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct DumpId(pub String);

impl DumpId {
    /// Create a new dump identifier.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that the identifier is usable as a store key.
    ///
    /// Identifiers must be non-empty, at most `MAX_ID_LENGTH` bytes and free
    /// of control characters (the redb member index uses `\0` as separator).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid_key(&self.0)
    }
}

impl fmt::Display for DumpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier (and display name) of a bucket.
///
/// A bucket's id is the signature string it was created for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct BucketId(pub String);

impl BucketId {
    /// Create a new bucket identifier.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Signature> for BucketId {
    fn from(signature: &Signature) -> Self {
        Self(signature.0.clone())
    }
}

/// Canonical signature derived from a dump's properties.
///
/// Two dumps with equal signatures always land in the same bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Signature(pub String);

impl Signature {
    /// Get the signature as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_valid_key(s: &str) -> bool {
    !s.is_empty() && s.len() <= MAX_ID_LENGTH && !s.chars().any(char::is_control)
}

// =============================================================================
// TIMESTAMP
// =============================================================================

/// Milliseconds since the Unix epoch, UTC.
///
/// Integer only so that ordering, range checks and storage keys never
/// depend on floating-point or timezone state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Milliseconds in one day.
    pub const DAY_MS: i64 = 86_400_000;

    /// Create a timestamp from raw milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Create a timestamp from whole seconds since the epoch.
    ///
    /// `None` if the instant is outside the representable calendar range.
    #[must_use]
    pub fn from_secs(secs: i64) -> Option<Self> {
        secs.checked_mul(1000)
            .map(Self)
            .filter(|ts| ts.to_datetime().is_some())
    }

    /// Get the raw millisecond value.
    #[must_use]
    pub const fn millis(self) -> i64 {
        self.0
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Parse an RFC 3339 string (`2024-01-10T00:00:00Z`).
    pub fn parse_rfc3339(s: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| Self::from(dt.with_timezone(&Utc)))
    }

    /// Shift by a number of whole days (saturating).
    #[must_use]
    pub const fn plus_days(self, days: i64) -> Self {
        Self(self.0.saturating_add(days.saturating_mul(Self::DAY_MS)))
    }

    /// Truncate to midnight UTC of the same day.
    #[must_use]
    pub const fn start_of_day(self) -> Self {
        Self(self.0.div_euclid(Self::DAY_MS).saturating_mul(Self::DAY_MS))
    }

    /// Convert to a chrono `DateTime`, if representable.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

// =============================================================================
// PROPERTIES
// =============================================================================

/// A single extracted property value.
///
/// Serializes to JSON as a plain string, number or boolean
/// (see `PropertySet::to_json`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Free-form text.
    Text(String),
    /// Signed integer.
    Integer(i64),
    /// Boolean flag.
    Flag(bool),
}

impl PropertyValue {
    /// Get the value as text, if it is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer, if it is an integer.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Byte length used for size limits.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Integer(_) => 8,
            Self::Flag(_) => 1,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Integer(n) => serde_json::Value::from(*n),
            Self::Flag(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Flag(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

/// Ordered mapping from property name to value.
///
/// Written once at ingest, read many times afterwards. Iteration order is
/// the byte order of the keys, which makes serialization deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PropertySet(BTreeMap<String, PropertyValue>);

impl PropertySet {
    /// Create an empty property set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a property.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.0.get(name)
    }

    /// Look up a text property.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(PropertyValue::as_text)
    }

    /// Check whether a property is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set has no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The mandatory dump identifier.
    pub fn dump_id(&self) -> Result<DumpId, TriageError> {
        let id = match self.get(props::DUMP_ID) {
            Some(PropertyValue::Text(s)) => DumpId::new(s.clone()),
            Some(PropertyValue::Integer(n)) => DumpId::new(n.to_string()),
            _ => return Err(TriageError::malformed(props::DUMP_ID, "missing")),
        };
        if !id.is_valid() {
            return Err(TriageError::malformed(
                props::DUMP_ID,
                "must be 1..=256 bytes without control characters",
            ));
        }
        Ok(id)
    }

    /// The mandatory dump timestamp.
    ///
    /// Stored either as RFC 3339 text or as integer epoch seconds, the same
    /// units a raw dump uses.
    pub fn timestamp(&self) -> Result<Timestamp, TriageError> {
        let value = self
            .get(props::TIMESTAMP)
            .ok_or_else(|| TriageError::malformed(props::TIMESTAMP, "missing"))?;
        if let Some(secs) = value.as_integer() {
            return Timestamp::from_secs(secs)
                .ok_or_else(|| TriageError::malformed(props::TIMESTAMP, "out of range"));
        }
        value
            .as_text()
            .and_then(Timestamp::parse_rfc3339)
            .ok_or_else(|| TriageError::malformed(props::TIMESTAMP, "invalid RFC 3339"))
    }

    /// Deterministic compact JSON object of the properties.
    ///
    /// Keys appear in byte order; strings, integers and booleans are
    /// emitted as native JSON values.
    pub fn to_json(&self) -> Result<String, TriageError> {
        let map: serde_json::Map<String, serde_json::Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::to_string(&serde_json::Value::Object(map))
            .map_err(|e| TriageError::SerializationError(e.to_string()))
    }
}

impl FromIterator<(String, PropertyValue)> for PropertySet {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// =============================================================================
// DUMP
// =============================================================================

/// A single crash report after extraction.
///
/// Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dump {
    /// Unique dump identifier.
    pub id: DumpId,
    /// Arrival timestamp (the dump's mandatory `timestamp` field).
    pub timestamp: Timestamp,
    /// Where the raw payload lives (file path, blob URI), if known.
    pub payload_ref: Option<String>,
    /// Extracted properties.
    pub properties: PropertySet,
}

impl Dump {
    /// Build a dump from an extracted property set.
    pub fn from_properties(
        properties: PropertySet,
        payload_ref: Option<String>,
    ) -> Result<Self, TriageError> {
        Ok(Self {
            id: properties.dump_id()?,
            timestamp: properties.timestamp()?,
            payload_ref,
            properties,
        })
    }
}

// =============================================================================
// BUCKET
// =============================================================================

/// A cluster of dumps sharing one signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Bucket identifier (equal to the signature text).
    pub id: BucketId,
    /// Canonical signature of every member.
    pub signature: Signature,
    /// Timestamp of the dump that created the bucket.
    pub created_at: Timestamp,
    /// Latest timestamp of any member dump.
    pub last_updated: Timestamp,
    /// Number of distinct member dumps.
    pub dump_count: u64,
}

impl Bucket {
    /// Create a fresh, empty bucket for a signature.
    #[must_use]
    pub fn new(signature: Signature, created_at: Timestamp) -> Self {
        Self {
            id: BucketId::from(&signature),
            signature,
            created_at,
            last_updated: created_at,
            dump_count: 0,
        }
    }

    /// Record a new member dump.
    ///
    /// `last_updated` never moves backwards.
    pub fn record_member(&mut self, timestamp: Timestamp) {
        self.dump_count = self.dump_count.saturating_add(1);
        self.last_updated = self.last_updated.max(timestamp);
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// The entity a `NotFound` error refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    /// A bucket.
    Bucket(BucketId),
    /// A dump.
    Dump(DumpId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bucket(id) => write!(f, "bucket '{id}'"),
            Self::Dump(id) => write!(f, "dump '{id}'"),
        }
    }
}

/// Errors that can occur in the triage engine.
///
/// - No silent failures
/// - Every kind is distinguishable so callers can pick a policy per kind
/// - The core never retries; see `is_retryable`
#[derive(Debug, Error)]
pub enum TriageError {
    /// A mandatory field could not be parsed, or a hard limit was exceeded.
    #[error("Malformed dump: {field}: {reason}")]
    MalformedDump { field: String, reason: String },

    /// A referenced bucket or dump does not exist.
    #[error("Not found: {0}")]
    NotFound(EntityRef),

    /// A query window with `start >= end`.
    #[error("Invalid range: start {start} is not before end {end}")]
    InvalidRange { start: Timestamp, end: Timestamp },

    /// The backing store failed or timed out.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A write-once record was written again with different content.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl TriageError {
    /// Shorthand for `MalformedDump`.
    pub fn malformed(field: &str, reason: &str) -> Self {
        Self::MalformedDump {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the caller may retry the operation with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_rfc3339_round_trip() {
        let ts = Timestamp::parse_rfc3339("2024-01-10T00:00:00Z").expect("parse");
        assert_eq!(ts.millis(), 1_704_844_800_000);
        assert_eq!(ts.to_string(), "2024-01-10T00:00:00.000Z");
    }

    #[test]
    fn timestamp_rejects_garbage() {
        assert!(Timestamp::parse_rfc3339("yesterday").is_none());
    }

    #[test]
    fn start_of_day_truncates() {
        let ts = Timestamp::parse_rfc3339("2024-01-10T17:45:12Z").expect("parse");
        let day = Timestamp::parse_rfc3339("2024-01-10T00:00:00Z").expect("parse");
        assert_eq!(ts.start_of_day(), day);
        assert_eq!(day.plus_days(-30).start_of_day(), day.plus_days(-30));
    }

    #[test]
    fn start_of_day_before_epoch() {
        let ts = Timestamp::from_millis(-1);
        assert_eq!(ts.start_of_day(), Timestamp::from_millis(-Timestamp::DAY_MS));
    }

    #[test]
    fn integer_timestamp_is_epoch_seconds() {
        let props = PropertySet::new().with(props::TIMESTAMP, 1_704_844_800i64);
        assert_eq!(
            props.timestamp().expect("timestamp"),
            Timestamp::parse_rfc3339("2024-01-10T00:00:00Z").expect("parse")
        );
    }

    #[test]
    fn unrepresentable_seconds_are_rejected() {
        assert!(Timestamp::from_secs(99_999_999_999_999).is_none());
        assert!(Timestamp::from_secs(i64::MAX).is_none());
        let props = PropertySet::new().with(props::TIMESTAMP, 99_999_999_999_999i64);
        assert!(matches!(
            props.timestamp(),
            Err(TriageError::MalformedDump { .. })
        ));
    }

    #[test]
    fn property_set_json_is_sorted_and_typed() {
        let props = PropertySet::new()
            .with("zeta", "last")
            .with("alpha", 7)
            .with("mid", true);
        assert_eq!(
            props.to_json().expect("json"),
            r#"{"alpha":7,"mid":true,"zeta":"last"}"#
        );
    }

    #[test]
    fn dump_id_accepts_integer_property() {
        let props = PropertySet::new().with(props::DUMP_ID, 42);
        assert_eq!(props.dump_id().expect("id"), DumpId::new("42"));
    }

    #[test]
    fn dump_id_rejects_control_characters() {
        let props = PropertySet::new().with(props::DUMP_ID, "a\0b");
        assert!(matches!(
            props.dump_id(),
            Err(TriageError::MalformedDump { .. })
        ));
    }

    #[test]
    fn bucket_last_updated_is_monotonic() {
        let mut bucket = Bucket::new(Signature("H1".into()), Timestamp::from_millis(100));
        bucket.record_member(Timestamp::from_millis(300));
        bucket.record_member(Timestamp::from_millis(200));
        assert_eq!(bucket.last_updated, Timestamp::from_millis(300));
        assert_eq!(bucket.dump_count, 2);
        assert_eq!(bucket.id, BucketId::new("H1"));
    }

    #[test]
    fn only_store_unavailable_is_retryable() {
        assert!(TriageError::StoreUnavailable("down".into()).is_retryable());
        assert!(!TriageError::Conflict("x".into()).is_retryable());
        assert!(!TriageError::malformed("dump_id", "missing").is_retryable());
    }
}
