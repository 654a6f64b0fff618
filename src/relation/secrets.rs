//! # Secret References
//!
//! Keeps plaintext out of relation bags. A designated secret field `f`
//! travels as the wire key `<f>-ref` holding a `secret:` URI; the content
//! behind it moves only through the secret store. This module tracks
//! which references each relation currently carries and resolves them on
//! demand, always force-refreshing so rotation is never served stale.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::constants::{DEFAULT_SECRET_RESOLVE_TIMEOUT_SECS, SECRET_FIELDS, SECRET_REF_SUFFIX};
use crate::model::{RelationId, SecretContent, SecretStore, SecretStoreError, SecretUri};

/// Wire key carrying the reference for a secret field.
pub fn reference_key(field: &str) -> String {
    format!("{field}{SECRET_REF_SUFFIX}")
}

/// Resolves one URI against the store, bounded by `timeout`.
pub async fn resolve_with_timeout(
    store: &dyn SecretStore,
    uri: &SecretUri,
    timeout: Duration,
) -> Result<SecretContent, SecretStoreError> {
    match tokio::time::timeout(timeout, store.resolve(uri, true)).await {
        Ok(result) => result,
        Err(_) => Err(SecretStoreError::Timeout),
    }
}

type TrackedRefs = BTreeMap<(RelationId, String), SecretUri>;

/// Requirer-side registry of secret references seen on relations.
///
/// References stay tracked across failed resolutions; a secret that is
/// not resolvable right now simply leaves its field unassembled until
/// the next notification.
pub struct SecretFieldResolver {
    store: Arc<dyn SecretStore>,
    timeout: Duration,
    tracked: Mutex<TrackedRefs>,
}

impl fmt::Debug for SecretFieldResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretFieldResolver")
            .field("timeout", &self.timeout)
            .field("tracked", &self.tracked)
            .finish_non_exhaustive()
    }
}

impl SecretFieldResolver {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self::with_timeout(store, Duration::from_secs(DEFAULT_SECRET_RESOLVE_TIMEOUT_SECS))
    }

    pub fn with_timeout(store: Arc<dyn SecretStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            tracked: Mutex::new(BTreeMap::new()),
        }
    }

    fn tracked(&self) -> MutexGuard<'_, TrackedRefs> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers references for any secret field whose wire key appears
    /// in `touched`. Values that do not parse as secret URIs are ignored
    /// with a warning; a conforming provider never puts plaintext there.
    pub fn register_from_bag(
        &self,
        relation: RelationId,
        touched: &BTreeSet<String>,
        bag: &BTreeMap<String, String>,
    ) {
        for field in SECRET_FIELDS {
            let key = reference_key(field);
            if !touched.contains(&key) {
                continue;
            }
            let Some(raw) = bag.get(&key) else { continue };
            match SecretUri::parse(raw) {
                Some(uri) => {
                    debug!(relation = %relation, field, uri = %uri, "tracking secret reference");
                    self.tracked().insert((relation, (*field).to_string()), uri);
                }
                None => {
                    warn!(relation = %relation, field, "ignoring non-URI value under secret reference key");
                }
            }
        }
    }

    /// Relations currently holding a reference to `uri`.
    pub fn relations_tracking(&self, uri: &SecretUri) -> Vec<RelationId> {
        let tracked = self.tracked();
        let mut relations: Vec<RelationId> = tracked
            .iter()
            .filter(|(_, tracked_uri)| *tracked_uri == uri)
            .map(|((relation, _), _)| *relation)
            .collect();
        relations.dedup();
        relations
    }

    /// Drops everything tracked for a departed relation.
    pub fn forget(&self, relation: RelationId) {
        self.tracked()
            .retain(|(tracked_relation, _), _| *tracked_relation != relation);
    }

    /// Resolves every reference tracked for `relation` and returns the
    /// merged secret fields. Recoverable failures (missing, ungranted,
    /// timed out) are logged and skipped; the reference stays tracked
    /// for the next attempt.
    pub async fn resolve_tracked(&self, relation: RelationId) -> BTreeMap<String, String> {
        let refs: Vec<(String, SecretUri)> = {
            let tracked = self.tracked();
            tracked
                .iter()
                .filter(|((tracked_relation, _), _)| *tracked_relation == relation)
                .map(|((_, field), uri)| (field.clone(), uri.clone()))
                .collect()
        };
        let mut resolved = BTreeMap::new();
        for (field, uri) in refs {
            match resolve_with_timeout(self.store.as_ref(), &uri, self.timeout).await {
                Ok(content) => {
                    for (content_field, value) in content.fields() {
                        resolved.insert(content_field.clone(), value.clone());
                    }
                }
                Err(err) if err.is_recoverable() => {
                    warn!(relation = %relation, field, error = %err, "secret unresolved; retrying on next notification");
                }
                Err(err) => {
                    error!(relation = %relation, field, error = %err, "secret store failed while resolving reference");
                }
            }
        }
        resolved
    }
}
