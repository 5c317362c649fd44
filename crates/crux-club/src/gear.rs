//! Club gear inventory.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crux_backend::error::BackendError;
use crux_sync::{MutationKind, MutationOutcome, RefetchWindows};
use crux_types::models::{GearCategory, GearItem};
use crux_types::topics;

use crate::feed::{Feed, open_feed};
use crate::ClubInner;

#[derive(Debug, Serialize)]
struct NewGearItem {
    owner_id: Uuid,
    name: String,
    category: GearCategory,
    available: bool,
}

#[derive(Debug, Serialize)]
struct AvailabilityPatch {
    available: bool,
}

pub struct GearService {
    inner: Arc<ClubInner>,
}

impl GearService {
    pub(crate) fn new(inner: Arc<ClubInner>) -> Self {
        Self { inner }
    }

    /// Live view of the whole club inventory.
    pub fn inventory(&self) -> Feed<GearItem> {
        open_feed(
            &self.inner,
            topics::GEAR_ITEMS,
            None,
            Some(("name", false)),
            RefetchWindows::uniform(self.inner.config.refresh_window),
        )
    }

    pub async fn add_item(
        &self,
        name: impl Into<String>,
        category: GearCategory,
    ) -> Result<GearItem, BackendError> {
        let session = self.inner.backend.session().ok_or(BackendError::NoSession)?;
        let row = NewGearItem {
            owner_id: session.user_id,
            name: name.into(),
            category,
            available: true,
        };
        let item = self.inner.backend.insert(topics::GEAR_ITEMS, &row).await?;
        self.inner.refetcher.notify(topics::GEAR_ITEMS);
        Ok(item)
    }

    /// Optimistically flip an item's availability in `feed`.
    pub async fn set_available(
        &self,
        feed: &Feed<GearItem>,
        item_id: Uuid,
        available: bool,
    ) -> MutationOutcome<()> {
        let backend = self.inner.backend.clone();
        let filter = format!("id=eq.{item_id}");
        let outcome = self
            .inner
            .tracker
            .run(
                item_id,
                MutationKind::Update,
                || {
                    let snapshot = feed.current();
                    feed.mutate(|rows| {
                        if let Some(item) = rows.iter_mut().find(|i| i.id == item_id) {
                            item.available = available;
                        }
                    });
                    snapshot
                },
                |snapshot| feed.set(snapshot),
                async move {
                    backend
                        .update(topics::GEAR_ITEMS, &filter, &AvailabilityPatch { available })
                        .await
                },
            )
            .await;

        if outcome.applied() {
            self.inner.refetcher.notify(feed.refetch_topic());
        }
        outcome
    }
}
