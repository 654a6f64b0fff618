//! Common test utilities for the protocol and integrator suites
//!
//! Wires both protocol sides to one in-memory model and drains their event
//! queues deterministically, without spawning background tasks.

#![allow(dead_code, reason = "each test binary uses a subset of these helpers")]

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use object_storage_integrator::constants::AZURE_RELATION_NAME;
use object_storage_integrator::integrator::{Integrator, IntegratorConfig};
use object_storage_integrator::model::{InMemoryModel, RelationId, SecretContent};
use object_storage_integrator::relation::{
    CredentialEvent, EventHandler, ModelEvent, ProviderHandler, ProviderStore, RequirerHandler,
    RequirerStore, SecretFieldResolver,
};

pub const PROVIDER_APP: &str = "azure-storage-integrator";
pub const REQUIRER_APP: &str = "analytics-app";

/// Both protocol sides on one model, with raw handlers and both
/// applications led by their (only) unit.
pub struct ProtocolBed {
    pub model: InMemoryModel,
    pub provider: ProviderHandler,
    pub requirer: RequirerHandler,
    provider_events: mpsc::UnboundedReceiver<ModelEvent>,
    requirer_events: mpsc::UnboundedReceiver<ModelEvent>,
}

impl ProtocolBed {
    pub fn new() -> Self {
        Self::with_container(None)
    }

    /// A bed whose requirer claims `container` instead of the default
    /// relation-derived name.
    pub fn with_container(container: Option<&str>) -> Self {
        let model = InMemoryModel::new();
        model.set_leader(PROVIDER_APP, true);
        model.set_leader(REQUIRER_APP, true);
        let provider_events = model.subscribe(PROVIDER_APP);
        let requirer_events = model.subscribe(REQUIRER_APP);

        let provider = ProviderHandler::new(provider_store(&model));
        let requirer = requirer_handler(&model, container);

        Self {
            model,
            provider,
            requirer,
            provider_events,
            requirer_events,
        }
    }

    pub fn join(&self) -> RelationId {
        self.model.join(AZURE_RELATION_NAME, PROVIDER_APP, REQUIRER_APP)
    }

    /// Dispatches queued model events on both sides until neither side has
    /// any left, returning every credential event emitted along the way.
    pub async fn settle(&mut self) -> Vec<CredentialEvent> {
        let mut emitted = Vec::new();
        loop {
            let mut progressed = false;
            while let Ok(event) = self.provider_events.try_recv() {
                progressed = true;
                let events = self
                    .provider
                    .handle(&event)
                    .await
                    .expect("provider handler failed");
                emitted.extend(events);
            }
            while let Ok(event) = self.requirer_events.try_recv() {
                progressed = true;
                let events = self
                    .requirer
                    .handle(&event)
                    .await
                    .expect("requirer handler failed");
                emitted.extend(events);
            }
            if !progressed {
                break;
            }
        }
        emitted
    }
}

/// The config-driven provider application against a raw requirer, both on
/// one model.
pub struct IntegratorBed {
    pub model: InMemoryModel,
    pub integrator: Arc<Integrator>,
    pub requirer: RequirerHandler,
    provider_events: mpsc::UnboundedReceiver<ModelEvent>,
    requirer_events: mpsc::UnboundedReceiver<ModelEvent>,
}

impl IntegratorBed {
    pub fn new(config: IntegratorConfig) -> Self {
        let model = InMemoryModel::new();
        model.set_leader(PROVIDER_APP, true);
        model.set_leader(REQUIRER_APP, true);
        let provider_events = model.subscribe(PROVIDER_APP);
        let requirer_events = model.subscribe(REQUIRER_APP);

        let handle = Arc::new(model.handle(PROVIDER_APP));
        let integrator = Arc::new(Integrator::new(
            config,
            Arc::clone(&handle) as _,
            Arc::clone(&handle) as _,
            Arc::clone(&handle) as _,
        ));
        let requirer = requirer_handler(&model, None);

        Self {
            model,
            integrator,
            requirer,
            provider_events,
            requirer_events,
        }
    }

    pub fn join(&self) -> RelationId {
        self.model.join(AZURE_RELATION_NAME, PROVIDER_APP, REQUIRER_APP)
    }

    pub async fn settle(&mut self) -> Vec<CredentialEvent> {
        let mut emitted = Vec::new();
        loop {
            let mut progressed = false;
            while let Ok(event) = self.provider_events.try_recv() {
                progressed = true;
                let events = self
                    .integrator
                    .handle(&event)
                    .await
                    .expect("integrator handler failed");
                emitted.extend(events);
            }
            while let Ok(event) = self.requirer_events.try_recv() {
                progressed = true;
                let events = self
                    .requirer
                    .handle(&event)
                    .await
                    .expect("requirer handler failed");
                emitted.extend(events);
            }
            if !progressed {
                break;
            }
        }
        emitted
    }
}

fn provider_store(model: &InMemoryModel) -> ProviderStore {
    let handle = Arc::new(model.handle(PROVIDER_APP));
    ProviderStore::new(
        Arc::clone(&handle) as _,
        Arc::clone(&handle) as _,
        Arc::clone(&handle) as _,
    )
}

pub fn requirer_handler(model: &InMemoryModel, container: Option<&str>) -> RequirerHandler {
    let handle = Arc::new(model.handle(REQUIRER_APP));
    RequirerHandler::new(
        RequirerStore::new(
            Arc::clone(&handle) as _,
            Arc::clone(&handle) as _,
            container.map(str::to_string),
        ),
        SecretFieldResolver::new(Arc::clone(&handle) as _),
    )
}

/// Config covering every mandatory option except credentials.
pub fn base_config() -> IntegratorConfig {
    IntegratorConfig {
        container: Some("etl-data".to_string()),
        storage_account: Some("teststorage".to_string()),
        path: Some("/spark-events".to_string()),
        ..IntegratorConfig::default()
    }
}

pub fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(field, value)| ((*field).to_string(), (*value).to_string()))
        .collect()
}

pub fn secret_content(pairs: &[(&str, &str)]) -> SecretContent {
    SecretContent::new(entries(pairs))
}

/// Kinds of the emitted events, in emission order.
pub fn kinds(events: &[CredentialEvent]) -> Vec<&'static str> {
    events.iter().map(CredentialEvent::kind).collect()
}
