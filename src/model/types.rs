//! # Model Types
//!
//! Identifiers and value types shared by every transport implementation.

use std::collections::BTreeMap;
use std::fmt;

use zeroize::Zeroize;

use crate::constants::SECRET_URI_SCHEME;

/// Opaque identifier of a single relation between two applications.
///
/// Displays as `relation-<n>`, which doubles as the deterministic default
/// container name a requirer claims when none is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationId(pub u32);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relation-{}", self.0)
    }
}

/// The three views a participant has onto a relation's data bags.
///
/// Writes are only legal against the two local buckets; the remote
/// application's bag is read-only from this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// This application's shared bag (leader-writable only)
    LocalApp,
    /// This unit's private bag
    LocalUnit,
    /// The counterpart application's shared bag
    RemoteApp,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::LocalApp => "local-app",
            Bucket::LocalUnit => "local-unit",
            Bucket::RemoteApp => "remote-app",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a secret held by a secret store, e.g. `secret:9f1c2d`.
///
/// Only the reference travels through relation bags; the content behind it
/// is fetched through [`SecretStore::resolve`](crate::model::SecretStore).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretUri(String);

impl SecretUri {
    /// Accepts a raw string as a secret URI if it carries the `secret:`
    /// scheme and a non-empty remainder.
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.strip_prefix(SECRET_URI_SCHEME)?;
        if rest.is_empty() {
            return None;
        }
        Some(Self(value.to_string()))
    }

    /// Mints a URI for a freshly created secret with the given identifier.
    pub fn mint(id: &str) -> Self {
        Self(format!("{SECRET_URI_SCHEME}{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decrypted content of one secret revision.
///
/// Values are wiped from memory when the content is dropped, and the
/// `Debug` form only ever shows field names.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretContent {
    fields: BTreeMap<String, String>,
}

impl SecretContent {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<BTreeMap<String, String>> for SecretContent {
    fn from(fields: BTreeMap<String, String>) -> Self {
        Self::new(fields)
    }
}

impl fmt::Debug for SecretContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never leak values through debug logging
        f.debug_struct("SecretContent")
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Drop for SecretContent {
    fn drop(&mut self) {
        for value in self.fields.values_mut() {
            value.zeroize();
        }
    }
}
