//! Object Storage Integrator Library
//!
//! Core functionality for brokering Azure object-storage connection data over
//! relation data bags. Tests are included in the module files (e.g. relation/
//! and model/) plus the integration suites under tests/.

pub mod cli;
pub mod constants;
pub mod integrator;
pub mod model;
pub mod relation;
pub mod runtime;

pub use integrator::{Integrator, IntegratorConfig, UnitStatus};
pub use model::{
    Bucket, InMemoryModel, LeadershipOracle, ModelHandle, RelationId, RelationTransport,
    SecretContent, SecretStore, SecretStoreError, SecretUri, TransportError,
};
pub use relation::{
    assemble, compute_diff, missing_required, CredentialEvent, Diff, EventHandler, ModelEvent,
    ProtocolError, ProviderHandler, ProviderStore, RequirerHandler, RequirerStore,
    SecretFieldResolver,
};
pub use runtime::EventPump;
