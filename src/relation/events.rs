//! # Protocol Events
//!
//! The two closed event vocabularies of the protocol: what the model can
//! tell a participant, and what a participant can tell the application
//! embedding it. Every inbound event is one of four kinds and every
//! outbound signal is one of three; there is no string-keyed dispatch
//! anywhere in between.

use async_trait::async_trait;

use crate::model::{RelationId, SecretUri};

use super::ProtocolError;

/// Notifications delivered by the model to one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    /// A counterpart application joined the relation
    RelationJoined { relation: RelationId },
    /// A bag visible to this side changed
    BagChanged { relation: RelationId },
    /// The relation departed for good
    RelationBroken { relation: RelationId },
    /// A secret this application holds gained a new revision
    SecretRotated { uri: SecretUri },
}

impl ModelEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ModelEvent::RelationJoined { .. } => "relation-joined",
            ModelEvent::BagChanged { .. } => "bag-changed",
            ModelEvent::RelationBroken { .. } => "relation-broken",
            ModelEvent::SecretRotated { .. } => "secret-rotated",
        }
    }
}

/// Domain-level outcomes a protocol side hands to its application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialEvent {
    /// A requirer asked for credentials by claiming a container
    CredentialsRequested {
        relation: RelationId,
        container: Option<String>,
        remote_app: Option<String>,
    },
    /// The assembled connection data for this relation is complete,
    /// either for the first time or with fresh values
    CredentialsChanged {
        relation: RelationId,
        remote_app: Option<String>,
    },
    /// The relation departed; its credentials must not be used anymore
    CredentialsGone { relation: RelationId },
}

impl CredentialEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialEvent::CredentialsRequested { .. } => "credentials-requested",
            CredentialEvent::CredentialsChanged { .. } => "credentials-changed",
            CredentialEvent::CredentialsGone { .. } => "credentials-gone",
        }
    }

    pub fn relation(&self) -> RelationId {
        match self {
            CredentialEvent::CredentialsRequested { relation, .. }
            | CredentialEvent::CredentialsChanged { relation, .. }
            | CredentialEvent::CredentialsGone { relation } => *relation,
        }
    }
}

/// One protocol side's reaction to model events.
///
/// Implementations must tolerate redelivery: handling the same event
/// twice may do redundant reads but must not emit contradictory signals
/// or corrupt persisted state.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ModelEvent) -> Result<Vec<CredentialEvent>, ProtocolError>;
}
