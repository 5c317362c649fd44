//! Cross-client broadcast relay.
//!
//! Lets one client instance nudge all others to refresh a topic without
//! waiting for their own row-level feeds — needed for aggregates (the
//! leaderboard) that no single table row maps to. Sends are fire-and-forget;
//! delivery is best-effort.

use tokio::sync::{broadcast, mpsc};
use tracing::trace;
use uuid::Uuid;

use crux_types::events::{ClientCommand, RelayMessage};

const RELAY_CAPACITY: usize = 64;

pub struct RelayHub {
    /// This client instance's id (one per tab/process). Incoming messages
    /// with the same origin are our own echoes and are dropped.
    origin: Uuid,
    tx: broadcast::Sender<RelayMessage>,
    commands: mpsc::UnboundedSender<ClientCommand>,
}

impl RelayHub {
    pub(crate) fn new(commands: mpsc::UnboundedSender<ClientCommand>) -> Self {
        let (tx, _) = broadcast::channel(RELAY_CAPACITY);
        Self {
            origin: Uuid::new_v4(),
            tx,
            commands,
        }
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Ask other clients to refresh `topic`. Queued if the socket is down.
    pub fn broadcast(&self, topic: &str, reason: &str) {
        let message = RelayMessage {
            topic: topic.into(),
            reason: reason.into(),
            origin: self.origin,
        };
        let _ = self.commands.send(ClientCommand::Publish { message });
    }

    /// Messages from *other* client instances.
    pub fn messages(&self) -> broadcast::Receiver<RelayMessage> {
        self.tx.subscribe()
    }

    pub(crate) fn dispatch(&self, message: RelayMessage) {
        if message.origin == self.origin {
            trace!("dropping relay echo for {}", message.topic);
            return;
        }
        let _ = self.tx.send(message);
    }
}
