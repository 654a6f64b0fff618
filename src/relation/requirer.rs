//! # Requirer Side
//!
//! The requirer claims a container when a relation forms, watches the
//! provider's bag for connection fields, resolves secret references, and
//! reports only complete credential sets. Incomplete data is withheld
//! rather than surfaced as a partial signal.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::constants::CONTAINER_FIELD;
use crate::model::{
    Bucket, LeadershipOracle, RelationId, RelationTransport, SecretUri, TransportError,
};

use super::assembler::{assemble, missing_required};
use super::diff::compute_diff;
use super::events::{CredentialEvent, EventHandler, ModelEvent};
use super::secrets::SecretFieldResolver;
use super::ProtocolError;

/// Write access to the requirer's side of the protocol.
#[derive(Clone)]
pub struct RequirerStore {
    transport: Arc<dyn RelationTransport>,
    leadership: Arc<dyn LeadershipOracle>,
    container: Option<String>,
}

impl fmt::Debug for RequirerStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequirerStore")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl RequirerStore {
    /// `container` is the name this requirer asks for on every relation;
    /// leave it unset to claim a deterministic per-relation default.
    pub fn new(
        transport: Arc<dyn RelationTransport>,
        leadership: Arc<dyn LeadershipOracle>,
        container: Option<String>,
    ) -> Self {
        Self {
            transport,
            leadership,
            container,
        }
    }

    /// Live relations on the requirer endpoint.
    pub async fn relations(&self) -> Result<Vec<RelationId>, TransportError> {
        self.transport.relations().await
    }

    pub async fn is_leader(&self) -> Result<bool, TransportError> {
        self.leadership.is_leader().await
    }

    /// Container claimed on one relation: the configured name, or the
    /// relation's own name as a collision-free default.
    pub fn container_for(&self, relation: RelationId) -> String {
        self.container
            .clone()
            .unwrap_or_else(|| relation.to_string())
    }

    /// Merges entries into the requirer's application bag. Follower
    /// units and departed relations skip silently.
    pub async fn update(
        &self,
        relation: RelationId,
        entries: &BTreeMap<String, String>,
    ) -> Result<bool, TransportError> {
        if !self.is_leader().await? {
            debug!(relation = %relation, "not the leader; skipping bag update");
            return Ok(false);
        }
        match self
            .transport
            .write_bag(relation, Bucket::LocalApp, entries)
            .await
        {
            Ok(()) => Ok(true),
            Err(TransportError::NotLeader) => Ok(false),
            Err(TransportError::RelationNotFound(_)) => {
                debug!(relation = %relation, "relation departed before update");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

/// Drives the requirer's half of the exchange.
pub struct RequirerHandler {
    store: RequirerStore,
    resolver: SecretFieldResolver,
}

impl fmt::Debug for RequirerHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequirerHandler").finish_non_exhaustive()
    }
}

impl RequirerHandler {
    pub fn new(store: RequirerStore, resolver: SecretFieldResolver) -> Self {
        Self { store, resolver }
    }

    pub fn store(&self) -> &RequirerStore {
        &self.store
    }

    pub fn resolver(&self) -> &SecretFieldResolver {
        &self.resolver
    }

    async fn on_relation_joined(
        &self,
        relation: RelationId,
    ) -> Result<Vec<CredentialEvent>, ProtocolError> {
        let container = self.store.container_for(relation);
        info!(relation = %relation, container, "claiming container on new relation");
        let mut entries = BTreeMap::new();
        entries.insert(CONTAINER_FIELD.to_string(), container);
        self.store.update(relation, &entries).await?;
        Ok(Vec::new())
    }

    async fn on_bag_changed(
        &self,
        relation: RelationId,
    ) -> Result<Vec<CredentialEvent>, ProtocolError> {
        let diff = match compute_diff(self.store.transport.as_ref(), relation).await {
            Ok(diff) => diff,
            Err(TransportError::RelationNotFound(_)) => {
                debug!(relation = %relation, "bag change raced relation departure");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };
        if diff.is_empty() {
            // Redelivered notification; the snapshot already matches
            debug!(relation = %relation, "no effective change");
            return Ok(Vec::new());
        }
        debug!(
            relation = %relation,
            added = diff.added.len(),
            changed = diff.changed.len(),
            deleted = diff.deleted.len(),
            "remote bag changed"
        );
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
        self.resolver.register_from_bag(relation, &diff.touched(), &bag);
        Ok(self.evaluate(relation, &bag).await.into_iter().collect())
    }

    async fn on_secret_rotated(
        &self,
        uri: &SecretUri,
    ) -> Result<Vec<CredentialEvent>, ProtocolError> {
        let relations = self.resolver.relations_tracking(uri);
        if relations.is_empty() {
            debug!(uri = %uri, "rotated secret is not referenced on any relation");
            return Ok(Vec::new());
        }
        let mut events = Vec::new();
        for relation in relations {
            let bag = match self
                .store
                .transport
                .read_bag(relation, Bucket::RemoteApp)
                .await
            {
                Ok(bag) => bag,
                Err(TransportError::RelationNotFound(_)) => continue,
                Err(err) => return Err(err.into()),
            };
            events.extend(self.evaluate(relation, &bag).await);
        }
        Ok(events)
    }

    async fn on_relation_broken(
        &self,
        relation: RelationId,
    ) -> Result<Vec<CredentialEvent>, ProtocolError> {
        info!(relation = %relation, "relation broken; credentials are gone");
        self.resolver.forget(relation);
        Ok(vec![CredentialEvent::CredentialsGone { relation }])
    }

    /// Assembles current connection data and reports it only when every
    /// required field is present and non-empty.
    async fn evaluate(
        &self,
        relation: RelationId,
        bag: &BTreeMap<String, String>,
    ) -> Option<CredentialEvent> {
        let resolved = self.resolver.resolve_tracked(relation).await;
        let connection = assemble(bag, &resolved);
        let missing = missing_required(&connection);
        if missing.is_empty() {
            let remote_app = self.store.transport.remote_app(relation).await.unwrap_or_default();
            info!(relation = %relation, "connection data complete");
            Some(CredentialEvent::CredentialsChanged {
                relation,
                remote_app,
            })
        } else {
            warn!(relation = %relation, missing = ?missing, "connection data incomplete; withholding");
            None
        }
    }

    /// Fully assembled connection data for one relation, complete or not.
    pub async fn connection_info(
        &self,
        relation: RelationId,
    ) -> Result<BTreeMap<String, String>, ProtocolError> {
        let bag = self
            .store
            .transport
            .read_bag(relation, Bucket::RemoteApp)
            .await?;
        // Pick up references that were published before this process
        // existed and therefore never went through a diff
        let keys: BTreeSet<String> = bag.keys().cloned().collect();
        self.resolver.register_from_bag(relation, &keys, &bag);
        let resolved = self.resolver.resolve_tracked(relation).await;
        Ok(assemble(&bag, &resolved))
    }

    /// Connection data of the first relation carrying any; empty when no
    /// provider has published yet.
    pub async fn first_connection_info(
        &self,
    ) -> Result<BTreeMap<String, String>, ProtocolError> {
        for relation in self.store.relations().await? {
            match self.connection_info(relation).await {
                Ok(info) if !info.is_empty() => return Ok(info),
                Ok(_) => {}
                Err(ProtocolError::Transport(TransportError::RelationNotFound(_))) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(BTreeMap::new())
    }
}

#[async_trait]
impl EventHandler for RequirerHandler {
    async fn handle(&self, event: &ModelEvent) -> Result<Vec<CredentialEvent>, ProtocolError> {
        match event {
            ModelEvent::RelationJoined { relation } => self.on_relation_joined(*relation).await,
            ModelEvent::BagChanged { relation } => self.on_bag_changed(*relation).await,
            ModelEvent::RelationBroken { relation } => self.on_relation_broken(*relation).await,
            ModelEvent::SecretRotated { uri } => self.on_secret_rotated(uri).await,
        }
    }
}
