use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operation kind carried by a change-feed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A backend-pushed notification that a row changed.
///
/// Delivered at-least-once, in backend emission order within one channel.
/// Consumers treat these as dirty-markers and refetch; only the typing
/// presence store applies `row` payloads directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub topic: String,
    pub op: ChangeOp,
    pub key: Uuid,
    pub row: serde_json::Value,
}

/// One logical change-feed subscription: a topic plus an optional row filter
/// (`"event_id=eq.<uuid>"`). Identical keys share one upstream channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub topic: String,
    pub filter: Option<String>,
}

impl SubscriptionKey {
    pub fn topic(topic: impl Into<String>) -> Self {
        Self { topic: topic.into(), filter: None }
    }

    pub fn filtered(topic: impl Into<String>, filter: impl Into<String>) -> Self {
        Self { topic: topic.into(), filter: Some(filter.into()) }
    }
}

/// Application-level broadcast, not tied to table rows. Used to ask other
/// clients to refresh a topic ahead of (or instead of) their own change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    pub topic: String,
    pub reason: String,
    /// Sending client *instance* id (one per tab/process, self-assigned at
    /// startup); receivers drop their own echoes.
    pub origin: Uuid,
}

/// Commands sent FROM client TO server over the realtime socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Authenticate the socket with the session's access token.
    Identify { token: String },

    /// Open (or attach to) a change feed for a (topic, filter) pair.
    Subscribe { key: SubscriptionKey },

    /// Release a change feed.
    Unsubscribe { key: SubscriptionKey },

    /// Fire-and-forget broadcast to all other subscribed clients.
    Publish { message: RelayMessage },
}

/// Frames sent FROM server TO client over the realtime socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerFrame {
    /// Socket authenticated as `user_id`.
    Ready { user_id: Uuid },

    /// A row changed under one of our subscriptions.
    Change(ChangeEvent),

    /// A relay broadcast from some client (possibly ourselves).
    Broadcast(RelayMessage),

    Subscribed { key: SubscriptionKey },
    Unsubscribed { key: SubscriptionKey },

    /// Server rejected a command (bad filter, policy denial on a topic).
    Error { message: String },
}

impl ServerFrame {
    /// Returns the subscription topic this frame is scoped to, if any.
    /// Frames that return `None` concern the connection as a whole.
    pub fn topic(&self) -> Option<&str> {
        match self {
            ServerFrame::Change(ev) => Some(&ev.topic),
            ServerFrame::Broadcast(msg) => Some(&msg.topic),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_command_wire_shape() {
        let cmd = ClientCommand::Subscribe {
            key: SubscriptionKey::filtered("event_participants", "event_id=eq.abc"),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "Subscribe");
        assert_eq!(json["data"]["key"]["topic"], "event_participants");
        assert_eq!(json["data"]["key"]["filter"], "event_id=eq.abc");
    }

    #[test]
    fn change_frame_round_trip() {
        let frame = ServerFrame::Change(ChangeEvent {
            topic: "messages".into(),
            op: ChangeOp::Delete,
            key: Uuid::new_v4(),
            row: serde_json::Value::Null,
        });
        let json = serde_json::to_string(&frame).unwrap();
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.topic(), Some("messages"));
        match back {
            ServerFrame::Change(ev) => assert_eq!(ev.op, ChangeOp::Delete),
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn ready_frame_has_no_topic() {
        let frame = ServerFrame::Ready { user_id: Uuid::new_v4() };
        assert_eq!(frame.topic(), None);
    }
}
