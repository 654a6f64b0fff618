//! # Model Abstraction
//!
//! Boundary traits between the relation protocol and whatever hosts it.
//!
//! The protocol layer never talks to a concrete runtime. Everything it
//! needs from the outside world comes through three seams:
//!
//! - [`RelationTransport`] reads and writes per-relation key-value bags
//! - [`SecretStore`] resolves and grants secrets addressed by URI
//! - [`LeadershipOracle`] answers whether this unit currently leads
//!
//! [`InMemoryModel`] is the reference implementation backing tests and the
//! `simulate` subcommand: a two-sided model with change-only notifications
//! and versioned secrets.

pub mod error;
pub mod memory;
pub mod types;

use std::collections::BTreeMap;

use async_trait::async_trait;

pub use error::{SecretStoreError, TransportError};
pub use memory::{InMemoryModel, ModelHandle};
pub use types::{Bucket, RelationId, SecretContent, SecretUri};

/// Access to relation data bags, scoped to one participant application.
#[async_trait]
pub trait RelationTransport: Send + Sync {
    /// Lists the live relations this application participates in.
    async fn relations(&self) -> Result<Vec<RelationId>, TransportError>;

    /// Returns the counterpart application's name, if already known.
    async fn remote_app(&self, relation: RelationId) -> Result<Option<String>, TransportError>;

    /// Reads the full contents of one bucket.
    async fn read_bag(
        &self,
        relation: RelationId,
        bucket: Bucket,
    ) -> Result<BTreeMap<String, String>, TransportError>;

    /// Merges `entries` into one bucket. Keys absent from `entries` are left
    /// untouched; an empty map is a no-op. Writing [`Bucket::LocalApp`]
    /// requires leadership, re-checked by the transport at write time.
    async fn write_bag(
        &self,
        relation: RelationId,
        bucket: Bucket,
        entries: &BTreeMap<String, String>,
    ) -> Result<(), TransportError>;
}

/// Access to secrets addressed by `secret:` URIs.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetches the content behind a secret URI. With `refresh` set the
    /// latest revision is returned even if an older one was observed
    /// before; resolution after rotation must never serve stale content.
    async fn resolve(
        &self,
        uri: &SecretUri,
        refresh: bool,
    ) -> Result<SecretContent, SecretStoreError>;

    /// Grants the applications on `relation` access to the secret.
    /// Granting an already-granted secret is a no-op.
    async fn grant(&self, uri: &SecretUri, relation: RelationId) -> Result<(), SecretStoreError>;
}

/// Answers whether this unit currently leads its application.
///
/// Leadership can move between units at any time, so callers ask again
/// before every gated write instead of caching the answer.
#[async_trait]
pub trait LeadershipOracle: Send + Sync {
    async fn is_leader(&self) -> Result<bool, TransportError>;
}
