//! Relay: routes received messages through the junctions to the notifier.
//!
//! Flow:
//! 1. Junction selection (first match wins) → may end with no match
//! 2. Composition → title, body and destination URL
//! 3. Dispatch → handed to the notifier, never retried

use std::sync::Arc;

use tracing::{error, info};

use crate::dispatch::Notifier;
use crate::junctions::JunctionSet;
use crate::pipeline::composer::compose;
use crate::pipeline::types::{InboundMessage, Outcome};

/// Routes inbound messages to notifications.
///
/// Holds only shared, read-only state; one instance serves every connection.
pub struct Relay {
    junctions: Arc<JunctionSet>,
    notifier: Arc<dyn Notifier>,
}

impl Relay {
    pub fn new(junctions: Arc<JunctionSet>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            junctions,
            notifier,
        }
    }

    /// Route one message: select a junction, compose and dispatch.
    pub async fn handle(&self, message: InboundMessage) -> Outcome {
        let envelope = &message.envelope;
        info!(
            id = %message.id,
            to = %envelope.to.join(", "),
            from = %envelope.from,
            ip = %envelope.source_ip,
            received_at = %message.received_at.to_rfc3339(),
            "Email received"
        );

        let Some(selected) = self.junctions.select(envelope) else {
            info!(id = %message.id, "No junction matches the received email");
            return Outcome::NoMatch;
        };

        let junction = selected.id().into_owned();
        let notification = compose(&message, selected);

        if notification.url.is_empty() {
            error!(id = %message.id, junction = %junction, "Destination URL rendered empty, not sending");
            return Outcome::DispatchFailed {
                junction,
                error: "empty destination URL".to_string(),
            };
        }

        info!(
            id = %message.id,
            junction = %junction,
            notifier = self.notifier.name(),
            "Sending notification"
        );

        match self.notifier.notify(&notification).await {
            Ok(()) => Outcome::Dispatched { junction },
            Err(e) => {
                error!(id = %message.id, junction = %junction, error = %e, "Notification failed");
                Outcome::DispatchFailed {
                    junction,
                    error: e.to_string(),
                }
            }
        }
    }
}
