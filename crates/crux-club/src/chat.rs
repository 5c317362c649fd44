//! Room chat for groups and events: messages, reactions, typing.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crux_backend::error::BackendError;
use crux_realtime::channels::{ChannelRegistry, SubscriptionHandle};
use crux_sync::presence::Typist;
use crux_sync::{MutationKind, MutationOutcome, PresenceStore, RefetchWindows, TypingReporter};
use crux_types::api::ReactionCount;
use crux_types::models::{Message, Room};
use crux_types::topics;

use crate::feed::{Feed, open_feed};
use crate::ClubInner;

#[derive(Debug, Serialize)]
struct NewMessage {
    room: Room,
    author_id: Uuid,
    author_name: String,
    body: String,
}

/// Live typing view for one room. Holds the change-feed attachment; release
/// with [`TypingFeed::close`].
pub struct TypingFeed {
    registry: Arc<ChannelRegistry>,
    handle: SubscriptionHandle,
    pump_cancel: CancellationToken,
    presence: Arc<PresenceStore>,
    room: Room,
}

impl TypingFeed {
    pub fn typists(&self) -> Vec<Typist> {
        self.presence.typists(self.room)
    }

    /// Fires with the room whenever any room's typist set changes.
    pub fn changes(&self) -> broadcast::Receiver<Room> {
        self.presence.changes()
    }

    pub fn close(&self) {
        self.pump_cancel.cancel();
        self.registry.unsubscribe(&self.handle);
    }
}

pub struct ChatService {
    inner: Arc<ClubInner>,
    /// Per-message reaction counts: optimistic toggles land here first,
    /// server truth from the rpc replaces them.
    reactions: Arc<watch::Sender<HashMap<Uuid, Vec<ReactionCount>>>>,
    _reactions_handle: SubscriptionHandle,
}

impl ChatService {
    pub(crate) fn new(inner: Arc<ClubInner>) -> Self {
        let reactions = Arc::new(watch::channel(HashMap::new()).0);

        // Other users' toggles arrive as row changes; debounce them into a
        // batched recount of every message we are tracking.
        {
            let backend = inner.backend.clone();
            let reactions = reactions.clone();
            inner.refetcher.register(
                topics::MESSAGE_REACTIONS,
                RefetchWindows::uniform(inner.config.refresh_window),
                move || {
                    let backend = backend.clone();
                    let reactions = reactions.clone();
                    async move {
                        let tracked: Vec<Uuid> = reactions.borrow().keys().copied().collect();
                        if tracked.is_empty() {
                            return;
                        }
                        match backend.reaction_counts(&tracked).await {
                            Ok(counts) => reactions.send_modify(|map| {
                                for entry in counts {
                                    map.insert(entry.message_id, entry.counts);
                                }
                            }),
                            Err(e) => tracing::warn!("reaction recount failed: {}", e),
                        }
                    }
                },
            );
        }
        let reactions_handle = crate::spawn_notify_pump(
            &inner,
            crux_types::events::SubscriptionKey::topic(topics::MESSAGE_REACTIONS),
            topics::MESSAGE_REACTIONS.into(),
        );

        Self {
            inner,
            reactions,
            _reactions_handle: reactions_handle,
        }
    }

    /// Live message list for a room, newest first.
    pub fn messages(&self, room: Room) -> Feed<Message> {
        open_feed(
            &self.inner,
            topics::MESSAGES,
            Some(format!("room=eq.{room}")),
            Some(("created_at", true)),
            RefetchWindows::uniform(self.inner.config.refresh_window),
        )
    }

    /// Watch typing indicators for a room. The feed applies change payloads
    /// straight into the presence store; staleness expiry covers clients
    /// that vanish mid-sentence.
    pub fn typing(&self, room: Room) -> TypingFeed {
        let key = crux_types::events::SubscriptionKey::filtered(
            topics::TYPING_INDICATORS,
            format!("room=eq.{room}"),
        );
        let (handle, mut events) = self.inner.realtime.registry().subscribe(key);

        let pump_cancel = self.inner.cancel.child_token();
        {
            let presence = self.inner.presence.clone();
            let pump_cancel = pump_cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = pump_cancel.cancelled() => return,
                        event = events.recv() => match event {
                            Ok(event) => presence.apply(&event),
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(_) => return,
                        },
                    }
                }
            });
        }

        TypingFeed {
            registry: self.inner.realtime.registry().clone(),
            handle,
            pump_cancel,
            presence: self.inner.presence.clone(),
            room,
        }
    }

    /// Report this user's own typing in a room.
    pub fn typing_reporter(&self, room: Room) -> Result<TypingReporter, BackendError> {
        let session = self.inner.backend.session().ok_or(BackendError::NoSession)?;
        Ok(TypingReporter::spawn(
            Arc::new(self.inner.backend.clone()),
            room,
            session.user_id,
            session.display_name,
            self.inner.cancel.child_token(),
        ))
    }

    pub async fn send(&self, room: Room, body: impl Into<String>) -> Result<Message, BackendError> {
        let session = self.inner.backend.session().ok_or(BackendError::NoSession)?;
        let row = NewMessage {
            room,
            author_id: session.user_id,
            author_name: session.display_name,
            body: body.into(),
        };
        let message = self.inner.backend.insert(topics::MESSAGES, &row).await?;
        self.inner
            .refetcher
            .notify(&crate::feed_topic(topics::MESSAGES, Some(&format!("room=eq.{room}"))));
        Ok(message)
    }

    /// Optimistically remove a message from `feed`; restored on failure.
    pub async fn delete(&self, feed: &Feed<Message>, message_id: Uuid) -> MutationOutcome<()> {
        let backend = self.inner.backend.clone();
        let filter = format!("id=eq.{message_id}");
        let outcome = self
            .inner
            .tracker
            .run(
                message_id,
                MutationKind::Delete,
                || {
                    let snapshot = feed.current();
                    feed.mutate(|rows| rows.retain(|m| m.id != message_id));
                    snapshot
                },
                |snapshot| feed.set(snapshot),
                async move { backend.delete(topics::MESSAGES, &filter).await },
            )
            .await;

        if outcome.applied() {
            self.inner.refetcher.notify(feed.refetch_topic());
        }
        outcome
    }

    pub fn reactions(&self) -> watch::Receiver<HashMap<Uuid, Vec<ReactionCount>>> {
        self.reactions.subscribe()
    }

    /// Load authoritative reaction counts for a batch of messages.
    pub async fn load_reactions(&self, message_ids: &[Uuid]) -> Result<(), BackendError> {
        let counts = self.inner.backend.reaction_counts(message_ids).await?;
        self.reactions.send_modify(|map| {
            for entry in counts {
                map.insert(entry.message_id, entry.counts);
            }
        });
        Ok(())
    }

    /// Toggle this user's reaction. The predicted count change shows
    /// immediately; the rpc's returned counts replace it on confirmation.
    pub async fn toggle_reaction(
        &self,
        message_id: Uuid,
        emoji: &str,
    ) -> MutationOutcome<crux_types::api::ReactionCounts> {
        let backend = self.inner.backend.clone();
        let emoji_owned = emoji.to_string();
        let outcome = self
            .inner
            .tracker
            .run(
                message_id,
                MutationKind::React,
                || self.apply_local_toggle(message_id, emoji),
                |prior| self.restore_counts(message_id, prior),
                async move { backend.toggle_reaction(message_id, &emoji_owned).await },
            )
            .await;

        if let MutationOutcome::Confirmed(counts) = &outcome {
            let authoritative = counts.counts.clone();
            self.reactions.send_modify(|map| {
                map.insert(message_id, authoritative);
            });
        }
        outcome
    }

    fn apply_local_toggle(&self, message_id: Uuid, emoji: &str) -> Vec<ReactionCount> {
        let mut prior = Vec::new();
        self.reactions.send_modify(|map| {
            let counts = map.entry(message_id).or_default();
            prior = counts.clone();

            match counts.iter_mut().find(|c| c.emoji == emoji) {
                Some(count) if count.reacted => {
                    count.reacted = false;
                    count.count = count.count.saturating_sub(1);
                }
                Some(count) => {
                    count.reacted = true;
                    count.count += 1;
                }
                None => counts.push(ReactionCount {
                    emoji: emoji.to_string(),
                    count: 1,
                    reacted: true,
                }),
            }
            counts.retain(|c| c.count > 0);
        });
        prior
    }

    fn restore_counts(&self, message_id: Uuid, prior: Vec<ReactionCount>) {
        self.reactions.send_modify(|map| {
            map.insert(message_id, prior);
        });
    }
}
