//! # Provider Side
//!
//! The provider publishes connection fields into its application bag and
//! watches requirer bags for container requests. Every publish is gated
//! on a fresh leadership check: followers observe, only the leader
//! writes protocol state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::constants::{CONTAINER_FIELD, SECRET_FIELDS};
use crate::model::{
    Bucket, LeadershipOracle, RelationId, RelationTransport, SecretStore, SecretUri,
    TransportError,
};

use super::diff::compute_diff;
use super::events::{CredentialEvent, EventHandler, ModelEvent};
use super::secrets::reference_key;
use super::ProtocolError;

/// Write access to the provider's side of the protocol.
#[derive(Clone)]
pub struct ProviderStore {
    transport: Arc<dyn RelationTransport>,
    secrets: Arc<dyn SecretStore>,
    leadership: Arc<dyn LeadershipOracle>,
}

impl fmt::Debug for ProviderStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderStore").finish_non_exhaustive()
    }
}

impl ProviderStore {
    pub fn new(
        transport: Arc<dyn RelationTransport>,
        secrets: Arc<dyn SecretStore>,
        leadership: Arc<dyn LeadershipOracle>,
    ) -> Self {
        Self {
            transport,
            secrets,
            leadership,
        }
    }

    /// Live relations on the provider endpoint.
    pub async fn relations(&self) -> Result<Vec<RelationId>, TransportError> {
        self.transport.relations().await
    }

    /// Fresh leadership check; the answer is never cached.
    pub async fn is_leader(&self) -> Result<bool, TransportError> {
        self.leadership.is_leader().await
    }

    /// Publishes connection fields into the relation's application bag.
    ///
    /// Plain fields merge as-is. A secret field must carry a `secret:`
    /// URI; the secret is granted to the relation and only the reference
    /// key lands in the bag. Plaintext under a secret field is refused.
    ///
    /// Returns whether a write happened. On follower units, and on
    /// relations that departed mid-flight, publishing is a silent no-op.
    pub async fn publish(
        &self,
        relation: RelationId,
        fields: &BTreeMap<String, String>,
    ) -> Result<bool, ProtocolError> {
        if !self.is_leader().await? {
            debug!(relation = %relation, "not the leader; skipping publish");
            return Ok(false);
        }
        let mut entries = BTreeMap::new();
        for (field, value) in fields {
            if SECRET_FIELDS.contains(&field.as_str()) {
                let Some(uri) = SecretUri::parse(value) else {
                    warn!(relation = %relation, field, "refusing to publish plaintext under a secret field");
                    continue;
                };
                // Grant before the reference becomes visible, so a
                // requirer that sees the key can already resolve it
                self.secrets.grant(&uri, relation).await?;
                entries.insert(reference_key(field), uri.to_string());
            } else {
                entries.insert(field.clone(), value.clone());
            }
        }
        if entries.is_empty() {
            return Ok(false);
        }
        match self
            .transport
            .write_bag(relation, Bucket::LocalApp, &entries)
            .await
        {
            Ok(()) => {
                info!(relation = %relation, fields = entries.len(), "published connection fields");
                Ok(true)
            }
            // Leadership moved or the relation departed between the check
            // and the write; both degrade to a no-op
            Err(TransportError::NotLeader) => Ok(false),
            Err(TransportError::RelationNotFound(_)) => {
                debug!(relation = %relation, "relation departed before publish");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Publishes a single secret field by reference.
    pub async fn publish_secret_field(
        &self,
        relation: RelationId,
        field: &str,
        uri: &SecretUri,
    ) -> Result<bool, ProtocolError> {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), uri.to_string());
        self.publish(relation, &fields).await
    }

    /// Confirms or overrides the container for one relation.
    pub async fn set_container(
        &self,
        relation: RelationId,
        container: &str,
    ) -> Result<bool, ProtocolError> {
        let mut fields = BTreeMap::new();
        fields.insert(CONTAINER_FIELD.to_string(), container.to_string());
        self.publish(relation, &fields).await
    }
}

/// Reacts to remote bag changes by detecting container requests.
pub struct ProviderHandler {
    store: ProviderStore,
}

impl fmt::Debug for ProviderHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandler").finish_non_exhaustive()
    }
}

impl ProviderHandler {
    pub fn new(store: ProviderStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ProviderStore {
        &self.store
    }

    /// A request exists exactly when `container` newly appeared in the
    /// requirer's bag; later edits to other fields change nothing here.
    async fn on_bag_changed(
        &self,
        relation: RelationId,
    ) -> Result<Vec<CredentialEvent>, ProtocolError> {
        if !self.store.is_leader().await? {
            debug!(relation = %relation, "not the leader; ignoring bag change");
            return Ok(Vec::new());
        }
        let diff = match compute_diff(self.store.transport.as_ref(), relation).await {
            Ok(diff) => diff,
            Err(TransportError::RelationNotFound(_)) => {
                debug!(relation = %relation, "bag change raced relation departure");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };
        if !diff.added.contains(CONTAINER_FIELD) {
            return Ok(Vec::new());
        }
        let bag = match self
            .store
            .transport
            .read_bag(relation, Bucket::RemoteApp)
            .await
        {
            Ok(bag) => bag,
            Err(TransportError::RelationNotFound(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let container = bag.get(CONTAINER_FIELD).cloned();
        let remote_app = self.store.transport.remote_app(relation).await.unwrap_or_default();
        info!(
            relation = %relation,
            container = container.as_deref().unwrap_or("<unset>"),
            "requirer requested credentials"
        );
        Ok(vec![CredentialEvent::CredentialsRequested {
            relation,
            container,
            remote_app,
        }])
    }
}

#[async_trait]
impl EventHandler for ProviderHandler {
    async fn handle(&self, event: &ModelEvent) -> Result<Vec<CredentialEvent>, ProtocolError> {
        match event {
            ModelEvent::BagChanged { relation } => self.on_bag_changed(*relation).await,
            ModelEvent::RelationJoined { relation } => {
                // Nothing to publish yet; the requirer speaks first
                debug!(relation = %relation, "relation joined; waiting for a container request");
                Ok(Vec::new())
            }
            ModelEvent::RelationBroken { relation } => {
                debug!(relation = %relation, "relation broken");
                Ok(Vec::new())
            }
            ModelEvent::SecretRotated { .. } => Ok(Vec::new()),
        }
    }
}
