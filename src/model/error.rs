//! # Model Errors
//!
//! Failure classes surfaced by the transport and secret-store seams.
//!
//! Handlers treat these by class, not by backend detail: `NotLeader` and
//! `RelationNotFound` are ordinary lifecycle races that degrade to no-ops,
//! while `Backend` variants are genuine faults that propagate.

use thiserror::Error;

use super::types::{Bucket, RelationId, SecretUri};

/// Errors raised by relation bag access.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A leader-gated write was attempted by a non-leader unit
    #[error("unit is not the application leader")]
    NotLeader,

    /// The relation has departed or never existed from this side
    #[error("{0} no longer exists")]
    RelationNotFound(RelationId),

    /// The bucket is not writable from this side
    #[error("bucket {0} is read-only for this participant")]
    ReadOnlyBucket(Bucket),

    /// The backing transport failed
    #[error("transport backend error: {0}")]
    Backend(String),
}

/// Errors raised by secret resolution and granting.
///
/// `NotFound`, `AccessDenied` and `Timeout` are recoverable: the reference
/// stays tracked and resolution is retried on the next notification.
#[derive(Debug, Error)]
pub enum SecretStoreError {
    /// No secret exists behind the URI
    #[error("secret '{0}' does not exist")]
    NotFound(SecretUri),

    /// The secret exists but has not been granted to this application
    #[error("permission for secret '{0}' has not been granted")]
    AccessDenied(SecretUri),

    /// Resolution did not complete within the configured timeout
    #[error("secret resolution timed out")]
    Timeout,

    /// The backing store failed
    #[error("secret store backend error: {0}")]
    Backend(String),
}

impl SecretStoreError {
    /// Recoverable failures leave the tracked reference in place and are
    /// retried on the next notification instead of propagating.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SecretStoreError::NotFound(_)
                | SecretStoreError::AccessDenied(_)
                | SecretStoreError::Timeout
        )
    }
}
