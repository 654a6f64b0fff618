//! # Event Pump
//!
//! Single-consumer loop connecting a model event stream to one protocol
//! handler. Events are handled strictly one at a time in arrival order,
//! so no two handler invocations for the same participant ever overlap.
//! A handler error is logged and the loop moves on; one bad notification
//! must never take the whole participant down.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::relation::{CredentialEvent, EventHandler, ModelEvent};

pub struct EventPump {
    events: mpsc::UnboundedReceiver<ModelEvent>,
    handler: Arc<dyn EventHandler>,
    emitted: mpsc::UnboundedSender<CredentialEvent>,
}

impl fmt::Debug for EventPump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPump").finish_non_exhaustive()
    }
}

impl EventPump {
    pub fn new(
        events: mpsc::UnboundedReceiver<ModelEvent>,
        handler: Arc<dyn EventHandler>,
        emitted: mpsc::UnboundedSender<CredentialEvent>,
    ) -> Self {
        Self {
            events,
            handler,
            emitted,
        }
    }

    /// Runs until the event stream closes or the emission side hangs up.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            debug!(kind = event.kind(), "handling model event");
            match self.handler.handle(&event).await {
                Ok(emitted) => {
                    for credential_event in emitted {
                        info!(
                            kind = credential_event.kind(),
                            relation = %credential_event.relation(),
                            "emitting credential event"
                        );
                        if self.emitted.send(credential_event).is_err() {
                            debug!("credential event receiver dropped; stopping pump");
                            return;
                        }
                    }
                }
                Err(err) => {
                    error!(kind = event.kind(), error = %err, "event handler failed; continuing");
                }
            }
        }
        debug!("model event stream closed; pump finished");
    }
}
