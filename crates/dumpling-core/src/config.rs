//! Engine configuration with sane defaults.
//!
//! Every section deserializes with `#[serde(default)]`, so a config file only
//! needs to name the values it changes.

use serde::{Deserialize, Serialize};

use crate::primitives::{
    DEFAULT_JSON_CACHE_CAPACITY, DEFAULT_LOOKAHEAD_DAYS, DEFAULT_SIGNATURE_FRAMES,
    DEFAULT_STORE_TIMEOUT_MS, DEFAULT_WINDOW_DAYS,
};

/// Root configuration of the triage engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageConfig {
    /// How signatures are derived.
    #[serde(default)]
    pub signature: SignatureConfig,
    /// Query service tunables.
    #[serde(default)]
    pub query: QueryConfig,
}

/// Tunables for signature derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Max stack frames hashed into a computed `stack_hash`.
    pub max_frames: usize,
    /// Append the exception code (fault type) to the signature.
    pub include_fault_type: bool,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_SIGNATURE_FRAMES,
            include_fault_type: true,
        }
    }
}

/// Tunables for the read side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Days of history in the dashboard window.
    pub window_days: i64,
    /// Days past "now" at the end of the dashboard window.
    pub lookahead_days: i64,
    /// Bound on a single store access, in milliseconds.
    pub store_timeout_ms: u64,
    /// Property JSON cache entries (0 disables the cache).
    pub json_cache_capacity: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            json_cache_capacity: DEFAULT_JSON_CACHE_CAPACITY,
        }
    }
}
