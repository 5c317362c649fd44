//! Climbing groups and membership.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crux_backend::error::BackendError;
use crux_sync::{MutationKind, MutationOutcome, RefetchWindows};
use crux_types::models::{ClimbGroup, GroupMember, MemberRole};
use crux_types::topics;

use crate::feed::{Feed, open_feed};
use crate::{ClubInner, feed_topic};

#[derive(Debug, Serialize)]
struct NewMember {
    group_id: Uuid,
    user_id: Uuid,
    display_name: String,
    role: MemberRole,
}

pub struct GroupsService {
    inner: Arc<ClubInner>,
    membership: watch::Sender<HashMap<Uuid, bool>>,
}

impl GroupsService {
    pub(crate) fn new(inner: Arc<ClubInner>) -> Self {
        Self {
            inner,
            membership: watch::channel(HashMap::new()).0,
        }
    }

    pub async fn list(&self) -> Result<Vec<ClimbGroup>, BackendError> {
        self.inner
            .backend
            .from(topics::GROUPS)
            .order("name", false)
            .fetch()
            .await
    }

    pub fn members(&self, group_id: Uuid) -> Feed<GroupMember> {
        open_feed(
            &self.inner,
            topics::GROUP_MEMBERS,
            Some(format!("group_id=eq.{group_id}")),
            Some(("joined_at", false)),
            RefetchWindows::uniform(self.inner.config.refresh_window),
        )
    }

    pub fn my_membership(&self) -> watch::Receiver<HashMap<Uuid, bool>> {
        self.membership.subscribe()
    }

    /// The calling user's club-wide role, resolved server-side.
    pub async fn my_role(&self) -> Result<MemberRole, BackendError> {
        Ok(self.inner.backend.current_role().await?.role)
    }

    pub async fn join(&self, group_id: Uuid) -> MutationOutcome<GroupMember> {
        let Some(session) = self.inner.backend.session() else {
            self.inner.notices.error("sign in to join groups");
            return MutationOutcome::Rejected;
        };

        let row = NewMember {
            group_id,
            user_id: session.user_id,
            display_name: session.display_name,
            role: MemberRole::Member,
        };
        let backend = self.inner.backend.clone();
        let outcome = self
            .inner
            .tracker
            .run(
                group_id,
                MutationKind::Join,
                || self.set_membership(group_id, true),
                |prior| self.restore_membership(group_id, prior),
                async move { backend.insert(topics::GROUP_MEMBERS, &row).await },
            )
            .await;

        if outcome.applied() {
            self.nudge(group_id);
        }
        outcome
    }

    pub async fn leave(&self, group_id: Uuid) -> MutationOutcome<()> {
        let Some(session) = self.inner.backend.session() else {
            self.inner.notices.error("sign in to leave groups");
            return MutationOutcome::Rejected;
        };

        let filter = format!("group_id=eq.{group_id}&user_id=eq.{}", session.user_id);
        let backend = self.inner.backend.clone();
        let outcome = self
            .inner
            .tracker
            .run(
                group_id,
                MutationKind::Leave,
                || self.set_membership(group_id, false),
                |prior| self.restore_membership(group_id, prior),
                async move { backend.delete(topics::GROUP_MEMBERS, &filter).await },
            )
            .await;

        if outcome.applied() {
            self.nudge(group_id);
        }
        outcome
    }

    fn set_membership(&self, group_id: Uuid, joined: bool) -> Option<bool> {
        let mut prior = None;
        self.membership.send_modify(|map| {
            prior = map.insert(group_id, joined);
        });
        prior
    }

    fn restore_membership(&self, group_id: Uuid, prior: Option<bool>) {
        self.membership.send_modify(|map| match prior {
            Some(value) => {
                map.insert(group_id, value);
            }
            None => {
                map.remove(&group_id);
            }
        });
    }

    fn nudge(&self, group_id: Uuid) {
        let topic = feed_topic(
            topics::GROUP_MEMBERS,
            Some(&format!("group_id=eq.{group_id}")),
        );
        self.inner.refetcher.notify(&topic);
    }
}
