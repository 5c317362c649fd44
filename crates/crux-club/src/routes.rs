//! Route catalog and beta boards.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crux_backend::error::BackendError;
use crux_sync::RefetchWindows;
use crux_types::models::{BetaPost, Route};
use crux_types::topics;

use crate::feed::{Feed, open_feed};
use crate::ClubInner;

#[derive(Debug, Serialize)]
pub struct NewRoute {
    pub name: String,
    pub grade: String,
    pub sector: String,
}

#[derive(Debug, Serialize)]
struct NewBetaPost {
    route_id: Uuid,
    author_id: Uuid,
    author_name: String,
    body: String,
}

pub struct RoutesService {
    inner: Arc<ClubInner>,
}

impl RoutesService {
    pub(crate) fn new(inner: Arc<ClubInner>) -> Self {
        Self { inner }
    }

    pub async fn routes(&self, sector: Option<&str>) -> Result<Vec<Route>, BackendError> {
        let mut select = self.inner.backend.from(topics::ROUTES).order("grade", false);
        if let Some(sector) = sector {
            select = select.eq("sector", sector);
        }
        select.fetch().await
    }

    /// Setters and admins only; anyone else gets a row-policy denial.
    pub async fn add_route(&self, route: NewRoute) -> Result<Route, BackendError> {
        self.inner.backend.insert(topics::ROUTES, &route).await
    }

    /// Live beta board for one route.
    pub fn beta(&self, route_id: Uuid) -> Feed<BetaPost> {
        open_feed(
            &self.inner,
            topics::BETA_POSTS,
            Some(format!("route_id=eq.{route_id}")),
            Some(("created_at", false)),
            RefetchWindows::uniform(self.inner.config.refresh_window),
        )
    }

    pub async fn post_beta(
        &self,
        route_id: Uuid,
        body: impl Into<String>,
    ) -> Result<BetaPost, BackendError> {
        let session = self.inner.backend.session().ok_or(BackendError::NoSession)?;
        let row = NewBetaPost {
            route_id,
            author_id: session.user_id,
            author_name: session.display_name,
            body: body.into(),
        };
        let post = self.inner.backend.insert(topics::BETA_POSTS, &row).await?;
        self.inner.refetcher.notify(&crate::feed_topic(
            topics::BETA_POSTS,
            Some(&format!("route_id=eq.{route_id}")),
        ));
        Ok(post)
    }
}
