//! # Bucket Classifier
//!
//! Maps a dump's properties to a bucket.
//!
//! - Signature derivation is a pure function of the properties and the
//!   `SignatureConfig`
//! - Matching is exact: equal signatures share a bucket, nothing else does
//! - Bucket creation is a store-level compare-and-create, so concurrent
//!   classification of the same new signature yields one bucket

use crate::config::SignatureConfig;
use crate::primitives::{NO_STACK_PREFIX, props};
use crate::store::StoreHandle;
use crate::{Bucket, BucketId, PropertySet, Signature, TriageError};

/// Result of classifying one dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Bucket the dump belongs to.
    pub bucket: BucketId,
    /// Whether this call created the bucket.
    pub created: bool,
}

/// Assigns dumps to buckets by signature.
pub struct Classifier {
    store: StoreHandle,
    policy: SignatureConfig,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Classifier {
    /// Create a classifier over a store handle.
    #[must_use]
    pub fn new(store: StoreHandle, policy: &SignatureConfig) -> Self {
        Self {
            store,
            policy: policy.clone(),
        }
    }

    /// Derive the canonical signature of a property set.
    ///
    /// The base is `stack_hash`, or `nostack:<module>` when the dump has no
    /// stack. With `include_fault_type`, `/<exception_code>` is appended.
    #[must_use]
    pub fn signature(&self, properties: &PropertySet) -> Signature {
        let mut text = match properties.get(props::STACK_HASH) {
            Some(hash) => hash.to_string(),
            None => {
                let module = properties
                    .get(props::MODULE)
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                format!("{}{}", NO_STACK_PREFIX, module)
            }
        };

        if self.policy.include_fault_type {
            if let Some(code) = properties.get(props::EXCEPTION_CODE) {
                text.push('/');
                text.push_str(&code.to_string());
            }
        }

        text.retain(|c| !c.is_control());
        Signature(text)
    }

    /// Find or create the bucket for a dump.
    ///
    /// # Errors
    ///
    /// `MalformedDump` if the timestamp is missing, or any store error.
    pub fn classify(&self, properties: &PropertySet) -> Result<Classification, TriageError> {
        let signature = self.signature(properties);
        let candidate = Bucket::new(signature, properties.timestamp()?);
        let (bucket, outcome) = self.store.insert_bucket_if_absent(&candidate)?;

        if outcome.is_inserted() {
            tracing::info!(bucket = %bucket.id, "created bucket");
        }

        Ok(Classification {
            bucket: bucket.id,
            created: outcome.is_inserted(),
        })
    }
}
