//! Climb events: scheduling, participation, carpool and gear coordination.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crux_backend::error::BackendError;
use crux_sync::{MutationKind, MutationOutcome, RefetchWindows};
use crux_types::models::{ClimbEvent, Discipline, EventParticipant};
use crux_types::topics;

use crate::feed::{Feed, open_feed};
use crate::{ATTENDANCE_TOPIC, ClubInner, feed_topic};

#[derive(Debug, Serialize)]
pub struct NewEvent {
    pub title: String,
    pub location: String,
    pub discipline: Discipline,
    pub starts_at: DateTime<Utc>,
    pub capacity: Option<u32>,
    pub notes: Option<String>,
}

/// Carpool/gear details attached to a join.
#[derive(Debug, Default, Clone)]
pub struct JoinOptions {
    pub seats_offered: u32,
    pub needs_ride: bool,
    pub gear_offered: Option<String>,
}

#[derive(Debug, Serialize)]
struct NewParticipant {
    event_id: Uuid,
    user_id: Uuid,
    display_name: String,
    seats_offered: u32,
    needs_ride: bool,
    gear_offered: Option<String>,
}

pub struct EventsService {
    inner: Arc<ClubInner>,
    /// Optimistic view of which events the current user participates in.
    participation: watch::Sender<HashMap<Uuid, bool>>,
}

impl EventsService {
    pub(crate) fn new(inner: Arc<ClubInner>) -> Self {
        Self {
            inner,
            participation: watch::channel(HashMap::new()).0,
        }
    }

    pub async fn upcoming(&self) -> Result<Vec<ClimbEvent>, BackendError> {
        self.inner
            .backend
            .from(topics::EVENTS)
            .order("starts_at", false)
            .fetch()
            .await
    }

    pub async fn create(&self, event: NewEvent) -> Result<ClimbEvent, BackendError> {
        self.inner.backend.insert(topics::EVENTS, &event).await
    }

    /// Live participant list for one event, including everyone's carpool
    /// seats and gear notes.
    pub fn participants(&self, event_id: Uuid) -> Feed<EventParticipant> {
        open_feed(
            &self.inner,
            topics::EVENT_PARTICIPANTS,
            Some(format!("event_id=eq.{event_id}")),
            Some(("joined_at", false)),
            RefetchWindows::uniform(self.inner.config.refresh_window),
        )
    }

    /// Optimistic membership view: present-and-true while joined (or a join
    /// is pending), present-and-false after an optimistic leave.
    pub fn my_participation(&self) -> watch::Receiver<HashMap<Uuid, bool>> {
        self.participation.subscribe()
    }

    pub fn is_join_pending(&self, event_id: Uuid) -> bool {
        self.inner.tracker.is_pending(event_id, MutationKind::Join)
    }

    pub async fn join(
        &self,
        event_id: Uuid,
        options: JoinOptions,
    ) -> MutationOutcome<EventParticipant> {
        let Some(session) = self.inner.backend.session() else {
            self.inner.notices.error("sign in to join events");
            return MutationOutcome::Rejected;
        };

        let row = NewParticipant {
            event_id,
            user_id: session.user_id,
            display_name: session.display_name,
            seats_offered: options.seats_offered,
            needs_ride: options.needs_ride,
            gear_offered: options.gear_offered,
        };

        let backend = self.inner.backend.clone();
        let outcome = self
            .inner
            .tracker
            .run(
                event_id,
                MutationKind::Join,
                || self.set_participation(event_id, true),
                |prior| self.restore_participation(event_id, prior),
                async move { backend.insert(topics::EVENT_PARTICIPANTS, &row).await },
            )
            .await;

        if outcome.applied() {
            self.nudge(event_id);
        }
        outcome
    }

    pub async fn leave(&self, event_id: Uuid) -> MutationOutcome<()> {
        let Some(session) = self.inner.backend.session() else {
            self.inner.notices.error("sign in to leave events");
            return MutationOutcome::Rejected;
        };

        let filter = format!("event_id=eq.{event_id}&user_id=eq.{}", session.user_id);
        let backend = self.inner.backend.clone();
        let outcome = self
            .inner
            .tracker
            .run(
                event_id,
                MutationKind::Leave,
                || self.set_participation(event_id, false),
                |prior| self.restore_participation(event_id, prior),
                async move { backend.delete(topics::EVENT_PARTICIPANTS, &filter).await },
            )
            .await;

        if outcome.applied() {
            self.nudge(event_id);
        }
        outcome
    }

    fn set_participation(&self, event_id: Uuid, joined: bool) -> Option<bool> {
        let mut prior = None;
        self.participation.send_modify(|map| {
            prior = map.insert(event_id, joined);
        });
        prior
    }

    fn restore_participation(&self, event_id: Uuid, prior: Option<bool>) {
        self.participation.send_modify(|map| match prior {
            Some(value) => {
                map.insert(event_id, value);
            }
            None => {
                map.remove(&event_id);
            }
        });
    }

    /// Refresh whoever is watching this event's participants, and give the
    /// attendance-driven leaderboard its fast nudge.
    fn nudge(&self, event_id: Uuid) {
        let topic = feed_topic(
            topics::EVENT_PARTICIPANTS,
            Some(&format!("event_id=eq.{event_id}")),
        );
        self.inner.refetcher.notify(&topic);
        self.inner.refetcher.notify(ATTENDANCE_TOPIC);
    }
}
