//! # Azure Storage Integrator
//!
//! The provider application wrapped around the protocol core. It holds
//! the operator's configuration, publishes it to every live relation,
//! answers container requests, re-validates when the credentials secret
//! rotates, and reports unit status.
//!
//! Operator mistakes (missing options, a dangling secret reference) are
//! never protocol faults: they surface through [`UnitStatus`] and the
//! integrator keeps running.

pub mod config;
pub mod status;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::constants::{AZURE_OPTIONS, DEFAULT_SECRET_RESOLVE_TIMEOUT_SECS, SECRET_KEY_FIELD};
use crate::model::{LeadershipOracle, RelationId, RelationTransport, SecretStore, SecretUri};
use crate::relation::events::{CredentialEvent, EventHandler, ModelEvent};
use crate::relation::secrets::resolve_with_timeout;
use crate::relation::{ProtocolError, ProviderHandler, ProviderStore};

pub use config::IntegratorConfig;
pub use status::{StatusTracker, UnitStatus};

/// Provider application: configuration in, published relation data and
/// unit status out.
pub struct Integrator {
    handler: ProviderHandler,
    store: ProviderStore,
    secrets: Arc<dyn SecretStore>,
    config: Mutex<IntegratorConfig>,
    status: Mutex<StatusTracker>,
    resolve_timeout: Duration,
}

impl fmt::Debug for Integrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integrator")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Integrator {
    pub fn new(
        config: IntegratorConfig,
        transport: Arc<dyn RelationTransport>,
        secrets: Arc<dyn SecretStore>,
        leadership: Arc<dyn LeadershipOracle>,
    ) -> Self {
        let store = ProviderStore::new(transport, Arc::clone(&secrets), leadership);
        Self {
            handler: ProviderHandler::new(store.clone()),
            store,
            secrets,
            config: Mutex::new(config),
            status: Mutex::new(StatusTracker::new()),
            resolve_timeout: Duration::from_secs(DEFAULT_SECRET_RESOLVE_TIMEOUT_SECS),
        }
    }

    fn config(&self) -> MutexGuard<'_, IntegratorConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status_tracker(&self) -> MutexGuard<'_, StatusTracker> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> &ProviderStore {
        &self.store
    }

    pub fn status(&self) -> UnitStatus {
        self.status_tracker().current().clone()
    }

    pub fn current_config(&self) -> IntegratorConfig {
        self.config().clone()
    }

    /// Bag fields implied by a config. The credentials option becomes the
    /// secret-key field carrying its URI; `publish` turns that into a
    /// granted reference on the wire.
    fn desired_fields(config: &IntegratorConfig) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        for option in AZURE_OPTIONS {
            let Some(value) = config.get(option) else {
                continue;
            };
            if *option == "credentials" {
                fields.insert(SECRET_KEY_FIELD.to_string(), value.to_string());
            } else {
                fields.insert((*option).to_string(), value.to_string());
            }
        }
        fields
    }

    /// Applies a new configuration: validates it, republishes to every
    /// live relation (leader only), and refreshes unit status.
    pub async fn on_config_changed(&self, new_config: IntegratorConfig) -> Result<()> {
        if let Err(err) = new_config.validate() {
            let message = format!("{err:#}");
            warn!("rejecting invalid configuration: {message}");
            *self.config() = new_config;
            self.status_tracker().set(UnitStatus::Blocked(message));
            return Err(err);
        }
        *self.config() = new_config.clone();
        if !self
            .store
            .is_leader()
            .await
            .context("Failed to check leadership")?
        {
            debug!("not the leader; configuration stored without publishing");
            return Ok(());
        }

        let mut fields = Self::desired_fields(&new_config);
        // A credentials secret that does not resolve is withheld rather
        // than published as a dangling reference
        if fields.contains_key(SECRET_KEY_FIELD) {
            if let Err(err) = self.validate_credentials_secret(&new_config).await {
                warn!("credentials withheld from publish: {err:#}");
                fields.remove(SECRET_KEY_FIELD);
            }
        }

        let relations = self
            .store
            .relations()
            .await
            .context("Failed to list relations")?;
        info!(relations = relations.len(), "configuration changed; republishing");
        for relation in relations {
            if let Err(err) = self.store.publish(relation, &fields).await {
                warn!(relation = %relation, "failed to publish configuration: {err}");
            }
        }
        self.refresh_status().await;
        Ok(())
    }

    /// Publishes connection data to one relation in response to a
    /// container request.
    pub async fn on_credentials_requested(&self, relation: RelationId) -> Result<()> {
        if !self
            .store
            .is_leader()
            .await
            .context("Failed to check leadership")?
        {
            debug!(relation = %relation, "not the leader; ignoring credentials request");
            return Ok(());
        }
        let config = self.current_config();
        let missing = config.missing_parameters();
        if !missing.is_empty() {
            let message = format!("Missing parameters: {missing:?}");
            self.status_tracker()
                .set(UnitStatus::Blocked(message.clone()));
            return Err(anyhow::anyhow!(message));
        }
        if let Err(err) = self.validate_credentials_secret(&config).await {
            self.status_tracker()
                .set(UnitStatus::Blocked(format!("{err:#}")));
            return Err(err);
        }
        let fields = Self::desired_fields(&config);
        self.store
            .publish(relation, &fields)
            .await
            .with_context(|| format!("Failed to publish connection data to {relation}"))?;
        Ok(())
    }

    /// Re-validates the configured credentials when the secret behind
    /// them gains a new revision. Content propagates by reference, so no
    /// bag write is involved.
    pub async fn on_secret_rotated(&self, uri: &SecretUri) -> Result<()> {
        let config = self.current_config();
        let configured = config
            .credentials_uri()
            .is_some_and(|credentials| credentials == *uri);
        if !configured {
            debug!(uri = %uri, "rotated secret is not the configured credentials");
            return Ok(());
        }
        info!(uri = %uri, "configured credentials rotated; re-validating");
        self.refresh_status().await;
        Ok(())
    }

    /// Recomputes unit status from the current configuration.
    pub async fn refresh_status(&self) {
        let config = self.current_config();
        let missing = config.missing_parameters();
        if !missing.is_empty() {
            self.status_tracker()
                .set(UnitStatus::Blocked(format!("Missing parameters: {missing:?}")));
            return;
        }
        if let Err(err) = self.validate_credentials_secret(&config).await {
            self.status_tracker()
                .set(UnitStatus::Blocked(format!("{err:#}")));
            return;
        }
        self.status_tracker().set(UnitStatus::Active);
    }

    /// Checks that the configured credentials reference resolves and
    /// carries the secret-key field.
    async fn validate_credentials_secret(&self, config: &IntegratorConfig) -> Result<()> {
        let Some(raw) = config.get("credentials") else {
            return Err(anyhow::anyhow!("credentials are not configured"));
        };
        let Some(uri) = SecretUri::parse(raw) else {
            return Err(anyhow::anyhow!(
                "credentials '{raw}' must be a secret URI ('secret:<id>')"
            ));
        };
        let content = resolve_with_timeout(self.secrets.as_ref(), &uri, self.resolve_timeout)
            .await
            .with_context(|| format!("Failed to resolve secret '{uri}'"))?;
        match content.get(SECRET_KEY_FIELD) {
            Some(value) if !value.is_empty() => Ok(()),
            _ => Err(anyhow::anyhow!(
                "The field '{SECRET_KEY_FIELD}' was not found in the secret '{uri}'"
            )),
        }
    }

    /// Currently configured connection options, for operators. Fails
    /// while nothing beyond the baked-in defaults is configured.
    pub fn connection_info(&self) -> Result<BTreeMap<String, String>> {
        let config = self.current_config();
        let options = config.options();
        let configured = options.keys().any(|option| option != "connection-protocol");
        if !configured {
            return Err(anyhow::anyhow!("Credentials are not set!"));
        }
        Ok(options)
    }
}

#[async_trait]
impl EventHandler for Integrator {
    async fn handle(&self, event: &ModelEvent) -> Result<Vec<CredentialEvent>, ProtocolError> {
        let events = self.handler.handle(event).await?;
        for credential_event in &events {
            if let CredentialEvent::CredentialsRequested { relation, .. } = credential_event {
                // Operator problems are reported through unit status, not
                // by failing the event
                if let Err(err) = self.on_credentials_requested(*relation).await {
                    warn!(relation = %relation, "could not serve credentials request: {err:#}");
                }
            }
        }
        if let ModelEvent::SecretRotated { uri } = event {
            if let Err(err) = self.on_secret_rotated(uri).await {
                warn!(uri = %uri, "failed to handle secret rotation: {err:#}");
            }
        }
        Ok(events)
    }
}
