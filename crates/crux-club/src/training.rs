//! Training session logging.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crux_backend::error::BackendError;
use crux_types::models::{TrainingKind, TrainingSession};
use crux_types::topics;

use crate::{ATTENDANCE_TOPIC, ClubInner};

#[derive(Debug, Serialize)]
struct NewSession {
    user_id: Uuid,
    kind: TrainingKind,
    minutes: u32,
    intensity: u8,
}

pub struct TrainingService {
    inner: Arc<ClubInner>,
}

impl TrainingService {
    pub(crate) fn new(inner: Arc<ClubInner>) -> Self {
        Self { inner }
    }

    /// Log a session. Intensity is clamped to the 1..=5 scale.
    pub async fn log(
        &self,
        kind: TrainingKind,
        minutes: u32,
        intensity: u8,
    ) -> Result<TrainingSession, BackendError> {
        let session = self.inner.backend.session().ok_or(BackendError::NoSession)?;
        let row = NewSession {
            user_id: session.user_id,
            kind,
            minutes,
            intensity: intensity.clamp(1, 5),
        };
        let logged = self
            .inner
            .backend
            .insert(topics::TRAINING_SESSIONS, &row)
            .await?;

        // Own activity gets the fast leaderboard nudge.
        self.inner.refetcher.notify(ATTENDANCE_TOPIC);
        Ok(logged)
    }

    pub async fn my_sessions(&self) -> Result<Vec<TrainingSession>, BackendError> {
        let session = self.inner.backend.session().ok_or(BackendError::NoSession)?;
        self.inner
            .backend
            .from(topics::TRAINING_SESSIONS)
            .eq("user_id", session.user_id)
            .order("logged_at", true)
            .fetch()
            .await
    }
}
