//! # In-Memory Model
//!
//! Reference implementation of the transport, secret-store and leadership
//! seams, backing the test suite and the `simulate` subcommand.
//!
//! The model holds both sides of every relation, so one instance can drive
//! a provider application and a requirer application against each other.
//! Bag writes are merges, and a counterpart is only notified when a merge
//! actually changed something; writing identical values back is silent,
//! which is what keeps snapshot persistence from ringing endlessly between
//! the two sides.
//!
//! Secrets are versioned. Resolving without `refresh` serves the revision
//! this application last observed; resolving with `refresh` serves the
//! latest and records it as observed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::relation::events::ModelEvent;

use super::error::{SecretStoreError, TransportError};
use super::types::{Bucket, RelationId, SecretContent, SecretUri};
use super::{LeadershipOracle, RelationTransport, SecretStore};

/// Owner label for secrets created by an operator rather than an application.
const USER_OWNER: &str = "user";

fn app_bag_key(app: &str) -> String {
    format!("app:{app}")
}

fn unit_bag_key(unit: &str) -> String {
    format!("unit:{unit}")
}

fn lock(state: &Mutex<ModelState>) -> MutexGuard<'_, ModelState> {
    // The state stays structurally valid even if a test thread panicked
    // while holding the guard.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct AppState {
    leader: bool,
    events: Option<mpsc::UnboundedSender<ModelEvent>>,
}

#[derive(Debug)]
struct RelationState {
    endpoint: String,
    provider: String,
    requirer: String,
    alive: bool,
    /// Bags keyed by owner, `app:<name>` or `unit:<name>/<n>`
    bags: BTreeMap<String, BTreeMap<String, String>>,
}

impl RelationState {
    fn counterpart(&self, app: &str) -> Option<&str> {
        if self.provider == app {
            Some(&self.requirer)
        } else if self.requirer == app {
            Some(&self.provider)
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct SecretState {
    owner: String,
    revisions: Vec<SecretContent>,
    /// Revision index each application last observed
    observed: BTreeMap<String, usize>,
    granted_apps: BTreeSet<String>,
    granted_relations: BTreeSet<RelationId>,
}

#[derive(Debug, Default)]
struct ModelState {
    apps: BTreeMap<String, AppState>,
    relations: BTreeMap<RelationId, RelationState>,
    secrets: BTreeMap<SecretUri, SecretState>,
    next_relation: u32,
}

impl ModelState {
    fn notify(&self, app: &str, event: ModelEvent) {
        if let Some(sender) = self.apps.get(app).and_then(|a| a.events.as_ref()) {
            if sender.send(event).is_err() {
                tracing::debug!(app, "event subscriber dropped; notification lost");
            }
        }
    }

    /// An application can reach a secret as its owner, through a direct
    /// grant, or through a grant on a live relation it participates in.
    fn secret_access(&self, app: &str, secret: &SecretState) -> bool {
        if secret.owner == app || secret.granted_apps.contains(app) {
            return true;
        }
        secret.granted_relations.iter().any(|id| {
            self.relations
                .get(id)
                .is_some_and(|rel| rel.alive && rel.counterpart(app).is_some())
        })
    }
}

/// Two-sided in-memory model of relations, bags and secrets.
#[derive(Debug, Default)]
pub struct InMemoryModel {
    state: Arc<Mutex<ModelState>>,
}

impl InMemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle scoped to `app`, acting as its only unit `<app>/0`.
    pub fn handle(&self, app: &str) -> ModelHandle {
        lock(&self.state).apps.entry(app.to_string()).or_default();
        ModelHandle {
            state: Arc::clone(&self.state),
            app: app.to_string(),
            unit: format!("{app}/0"),
        }
    }

    /// Subscribes `app` to model events. One subscriber per application;
    /// a later call replaces the earlier receiver.
    pub fn subscribe(&self, app: &str) -> mpsc::UnboundedReceiver<ModelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state).apps.entry(app.to_string()).or_default().events = Some(tx);
        rx
    }

    pub fn set_leader(&self, app: &str, leader: bool) {
        lock(&self.state).apps.entry(app.to_string()).or_default().leader = leader;
    }

    /// Relates two applications over `endpoint` and notifies both sides.
    pub fn join(&self, endpoint: &str, provider: &str, requirer: &str) -> RelationId {
        let mut state = lock(&self.state);
        let id = RelationId(state.next_relation);
        state.next_relation += 1;
        state.apps.entry(provider.to_string()).or_default();
        state.apps.entry(requirer.to_string()).or_default();
        state.relations.insert(
            id,
            RelationState {
                endpoint: endpoint.to_string(),
                provider: provider.to_string(),
                requirer: requirer.to_string(),
                alive: true,
                bags: BTreeMap::new(),
            },
        );
        tracing::debug!(relation = %id, endpoint, provider, requirer, "relation joined");
        state.notify(provider, ModelEvent::RelationJoined { relation: id });
        state.notify(requirer, ModelEvent::RelationJoined { relation: id });
        id
    }

    /// Marks the relation departed and notifies both sides. Any bag access
    /// afterwards fails with [`TransportError::RelationNotFound`].
    pub fn break_relation(&self, relation: RelationId) {
        let mut state = lock(&self.state);
        let Some(rel) = state.relations.get_mut(&relation) else {
            return;
        };
        if !rel.alive {
            return;
        }
        rel.alive = false;
        let endpoint = rel.endpoint.clone();
        let provider = rel.provider.clone();
        let requirer = rel.requirer.clone();
        tracing::debug!(relation = %relation, endpoint, "relation broken");
        state.notify(&provider, ModelEvent::RelationBroken { relation });
        state.notify(&requirer, ModelEvent::RelationBroken { relation });
    }

    /// Creates an application-owned secret and returns its URI.
    pub fn add_secret(&self, owner: &str, content: SecretContent) -> SecretUri {
        let uri = SecretUri::mint(&Uuid::new_v4().simple().to_string());
        let mut state = lock(&self.state);
        state.secrets.insert(
            uri.clone(),
            SecretState {
                owner: owner.to_string(),
                revisions: vec![content],
                observed: BTreeMap::new(),
                granted_apps: BTreeSet::new(),
                granted_relations: BTreeSet::new(),
            },
        );
        tracing::debug!(uri = %uri, owner, "secret created");
        uri
    }

    /// Creates an operator-owned secret, the way an admin would out of band.
    pub fn add_user_secret(&self, content: SecretContent) -> SecretUri {
        self.add_secret(USER_OWNER, content)
    }

    /// Grants one application direct access to a secret.
    pub fn grant_app(&self, uri: &SecretUri, app: &str) {
        let mut state = lock(&self.state);
        match state.secrets.get_mut(uri) {
            Some(secret) => {
                secret.granted_apps.insert(app.to_string());
            }
            None => tracing::warn!(uri = %uri, "cannot grant unknown secret"),
        }
    }

    /// Appends a new revision and notifies every holder except the owner.
    pub fn rotate_secret(&self, uri: &SecretUri, content: SecretContent) {
        let mut state = lock(&self.state);
        let Some(secret) = state.secrets.get_mut(uri) else {
            tracing::warn!(uri = %uri, "cannot rotate unknown secret");
            return;
        };
        secret.revisions.push(content);
        let owner = secret.owner.clone();
        let mut holders: BTreeSet<String> = secret.granted_apps.clone();
        let granted_relations: Vec<RelationId> = secret.granted_relations.iter().copied().collect();
        for id in granted_relations {
            if let Some(rel) = state.relations.get(&id) {
                if rel.alive {
                    holders.insert(rel.provider.clone());
                    holders.insert(rel.requirer.clone());
                }
            }
        }
        holders.remove(&owner);
        tracing::debug!(uri = %uri, holders = holders.len(), "secret rotated");
        for app in holders {
            state.notify(&app, ModelEvent::SecretRotated { uri: uri.clone() });
        }
    }

    /// Snapshot of an application's shared bag on one relation, for
    /// assertions. Unknown relations read as empty.
    pub fn app_bag(&self, relation: RelationId, app: &str) -> BTreeMap<String, String> {
        let state = lock(&self.state);
        state
            .relations
            .get(&relation)
            .and_then(|rel| rel.bags.get(&app_bag_key(app)))
            .cloned()
            .unwrap_or_default()
    }
}

/// One participant's view of the model. Implements all three seams, so a
/// single handle wires up a whole protocol side.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    state: Arc<Mutex<ModelState>>,
    app: String,
    unit: String,
}

impl ModelHandle {
    pub fn app(&self) -> &str {
        &self.app
    }
}

#[async_trait]
impl RelationTransport for ModelHandle {
    async fn relations(&self) -> Result<Vec<RelationId>, TransportError> {
        let state = lock(&self.state);
        Ok(state
            .relations
            .iter()
            .filter(|(_, rel)| rel.alive && rel.counterpart(&self.app).is_some())
            .map(|(id, _)| *id)
            .collect())
    }

    async fn remote_app(&self, relation: RelationId) -> Result<Option<String>, TransportError> {
        let state = lock(&self.state);
        let rel = state
            .relations
            .get(&relation)
            .filter(|rel| rel.alive)
            .ok_or(TransportError::RelationNotFound(relation))?;
        let other = rel
            .counterpart(&self.app)
            .ok_or(TransportError::RelationNotFound(relation))?;
        Ok(Some(other.to_string()))
    }

    async fn read_bag(
        &self,
        relation: RelationId,
        bucket: Bucket,
    ) -> Result<BTreeMap<String, String>, TransportError> {
        let state = lock(&self.state);
        let rel = state
            .relations
            .get(&relation)
            .filter(|rel| rel.alive)
            .ok_or(TransportError::RelationNotFound(relation))?;
        let other = rel
            .counterpart(&self.app)
            .ok_or(TransportError::RelationNotFound(relation))?;
        let key = match bucket {
            Bucket::LocalApp => app_bag_key(&self.app),
            Bucket::LocalUnit => unit_bag_key(&self.unit),
            Bucket::RemoteApp => app_bag_key(other),
        };
        Ok(rel.bags.get(&key).cloned().unwrap_or_default())
    }

    async fn write_bag(
        &self,
        relation: RelationId,
        bucket: Bucket,
        entries: &BTreeMap<String, String>,
    ) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        match bucket {
            Bucket::RemoteApp => return Err(TransportError::ReadOnlyBucket(bucket)),
            Bucket::LocalApp => {
                // Leadership is re-checked on every write, never cached
                if !state.apps.get(&self.app).is_some_and(|a| a.leader) {
                    return Err(TransportError::NotLeader);
                }
            }
            Bucket::LocalUnit => {}
        }
        let rel = state
            .relations
            .get_mut(&relation)
            .filter(|rel| rel.alive)
            .ok_or(TransportError::RelationNotFound(relation))?;
        let counterpart = rel
            .counterpart(&self.app)
            .ok_or(TransportError::RelationNotFound(relation))?
            .to_string();
        let key = match bucket {
            Bucket::LocalApp => app_bag_key(&self.app),
            Bucket::LocalUnit => unit_bag_key(&self.unit),
            Bucket::RemoteApp => unreachable!("rejected above"),
        };
        let bag = rel.bags.entry(key).or_default();
        let mut changed = false;
        for (field, value) in entries {
            if bag.get(field) != Some(value) {
                bag.insert(field.clone(), value.clone());
                changed = true;
            }
        }
        if changed {
            state.notify(&counterpart, ModelEvent::BagChanged { relation });
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for ModelHandle {
    async fn resolve(
        &self,
        uri: &SecretUri,
        refresh: bool,
    ) -> Result<SecretContent, SecretStoreError> {
        let mut state = lock(&self.state);
        let has_access = {
            let secret = state
                .secrets
                .get(uri)
                .ok_or_else(|| SecretStoreError::NotFound(uri.clone()))?;
            state.secret_access(&self.app, secret)
        };
        if !has_access {
            return Err(SecretStoreError::AccessDenied(uri.clone()));
        }
        let app = self.app.clone();
        let secret = state
            .secrets
            .get_mut(uri)
            .ok_or_else(|| SecretStoreError::NotFound(uri.clone()))?;
        let latest = secret.revisions.len().saturating_sub(1);
        let index = if refresh {
            latest
        } else {
            *secret.observed.get(&app).unwrap_or(&latest)
        };
        secret.observed.insert(app, index);
        secret
            .revisions
            .get(index)
            .cloned()
            .ok_or_else(|| SecretStoreError::Backend(format!("secret '{uri}' has no revision {index}")))
    }

    async fn grant(&self, uri: &SecretUri, relation: RelationId) -> Result<(), SecretStoreError> {
        let mut state = lock(&self.state);
        let live_party = state
            .relations
            .get(&relation)
            .is_some_and(|rel| rel.alive && rel.counterpart(&self.app).is_some());
        if !live_party {
            return Err(SecretStoreError::Backend(format!(
                "{relation} is not a live relation of {}",
                self.app
            )));
        }
        let has_access = {
            let secret = state
                .secrets
                .get(uri)
                .ok_or_else(|| SecretStoreError::NotFound(uri.clone()))?;
            state.secret_access(&self.app, secret)
        };
        if !has_access {
            return Err(SecretStoreError::AccessDenied(uri.clone()));
        }
        let secret = state
            .secrets
            .get_mut(uri)
            .ok_or_else(|| SecretStoreError::NotFound(uri.clone()))?;
        secret.granted_relations.insert(relation);
        Ok(())
    }
}

#[async_trait]
impl LeadershipOracle for ModelHandle {
    async fn is_leader(&self) -> Result<bool, TransportError> {
        Ok(lock(&self.state).apps.get(&self.app).is_some_and(|a| a.leader))
    }
}
