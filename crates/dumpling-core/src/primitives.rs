//! # Triage Primitives
//!
//! Hardcoded limits and well-known names for the triage engine.
//!
//! These are compiled into the binary and are immutable at runtime.
//! Tunables that operators may change live in `config` instead.

/// Well-known property names produced by the extractor.
pub mod props {
    /// Mandatory unique dump identifier.
    pub const DUMP_ID: &str = "dump_id";
    /// Mandatory crash/arrival timestamp.
    pub const TIMESTAMP: &str = "timestamp";
    /// Hash of the top stack frames (given by the source or computed).
    pub const STACK_HASH: &str = "stack_hash";
    /// Normalized stack frames, one `module!function` per line.
    pub const STACK: &str = "stack";
    /// Faulting module.
    pub const MODULE: &str = "module";
    /// Exception or signal code (the fault type).
    pub const EXCEPTION_CODE: &str = "exception_code";
    /// Offset of the faulting instruction within its module.
    pub const FAULT_OFFSET: &str = "fault_offset";
}

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum size of a raw dump accepted by the extractor (16 MiB).
///
/// This prevents memory exhaustion from malicious or malformed input.
pub const MAX_DUMP_BYTES: usize = 16 * 1024 * 1024;

/// Maximum number of properties extracted from one dump.
pub const MAX_PROPERTIES: usize = 1024;

/// Maximum length for property names.
pub const MAX_PROPERTY_NAME_LENGTH: usize = 256;

/// Maximum length for property values (64KB).
pub const MAX_PROPERTY_VALUE_LENGTH: usize = 65536;

/// Maximum length of dump and bucket identifiers.
pub const MAX_ID_LENGTH: usize = 256;

/// Maximum number of raw dumps in a single batch ingest.
pub const MAX_BATCH_LENGTH: usize = 10000;

// =============================================================================
// CLASSIFICATION DEFAULTS
// =============================================================================

/// Number of top stack frames hashed into a computed `stack_hash`.
pub const DEFAULT_SIGNATURE_FRAMES: usize = 5;

/// Hex characters kept from the BLAKE3 digest of the stack.
pub const STACK_HASH_HEX_LEN: usize = 32;

/// Signature base used when a dump carries no stack information.
pub const NO_STACK_PREFIX: &str = "nostack:";

// =============================================================================
// QUERY DEFAULTS
// =============================================================================

/// Days of history shown by the dashboard.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Days past "now" included at the end of the dashboard window.
pub const DEFAULT_LOOKAHEAD_DAYS: i64 = 1;

/// Bound on a single store access made by an adapter.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

/// Entries kept in the property JSON cache.
pub const DEFAULT_JSON_CACHE_CAPACITY: usize = 4096;
