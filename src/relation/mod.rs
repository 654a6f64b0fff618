//! # Relation Protocol
//!
//! The data-exchange protocol both applications speak over a relation.
//!
//! Each side has a store (reads and leader-gated writes) and a handler
//! (reactions to model events). Handlers never reach around their store,
//! so protocol writes always pass the same gates:
//!
//! - [`provider`] publishes connection fields and watches for container
//!   requests
//! - [`requirer`] claims a container, tracks secret references, and
//!   reports complete credential sets
//! - [`diff`] turns raw bag notifications into added/changed/deleted sets
//! - [`secrets`] keeps plaintext out of bags via reference indirection
//! - [`assembler`] merges bag data with resolved secrets for consumers

pub mod assembler;
pub mod diff;
pub mod events;
pub mod provider;
pub mod requirer;
pub mod secrets;

use thiserror::Error;

use crate::model::{SecretStoreError, TransportError};

pub use assembler::{assemble, missing_required};
pub use diff::{compute_diff, Diff};
pub use events::{CredentialEvent, EventHandler, ModelEvent};
pub use provider::{ProviderHandler, ProviderStore};
pub use requirer::{RequirerHandler, RequirerStore};
pub use secrets::{reference_key, resolve_with_timeout, SecretFieldResolver};

/// Errors surfaced out of protocol handlers.
///
/// Lifecycle races (departed relations, lost leadership) are absorbed
/// inside the handlers; what escapes here is a genuine fault of the
/// transport or secret store.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Secret(#[from] SecretStoreError),
}
