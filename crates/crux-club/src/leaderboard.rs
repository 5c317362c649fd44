//! Member leaderboard.
//!
//! The standings are a server-side aggregate over attendance and training —
//! no single row maps to them, so three refresh paths converge on one
//! snapshot:
//! - change feeds on `training_sessions` and `event_participants`, debounced
//!   at the aggregation window
//! - the user's own attendance actions, on the faster attendance topic
//! - cross-client relay broadcasts (admin recomputes), gated by the forced
//!   cooldown

use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

use crux_sync::RefetchWindows;
use crux_types::models::LeaderboardEntry;
use crux_types::topics;

use crate::{ATTENDANCE_TOPIC, ClubInner, spawn_notify_pump};
use crux_realtime::channels::SubscriptionHandle;
use crux_types::events::SubscriptionKey;

pub struct LeaderboardService {
    inner: Arc<ClubInner>,
    standings: watch::Receiver<Vec<LeaderboardEntry>>,
    _feed_handles: Vec<SubscriptionHandle>,
}

impl LeaderboardService {
    pub(crate) fn new(inner: Arc<ClubInner>) -> Self {
        let (tx, standings) = watch::channel(Vec::new());
        let tx = Arc::new(tx);

        let refresh = {
            let backend = inner.backend.clone();
            let days = inner.config.leaderboard_days;
            move || {
                let backend = backend.clone();
                let tx = tx.clone();
                async move {
                    match backend.leaderboard(days).await {
                        Ok(entries) => {
                            tx.send_replace(entries);
                        }
                        Err(e) => warn!("leaderboard refresh failed: {}", e),
                    }
                }
            }
        };

        // General aggregation path, also the target of relay broadcasts.
        inner.refetcher.register(
            topics::LEADERBOARD,
            RefetchWindows {
                debounce: inner.config.leaderboard_window,
                force_cooldown: inner.config.forced_cooldown,
            },
            refresh.clone(),
        );
        // Fast path for the user's own attendance actions.
        inner.refetcher.register(
            ATTENDANCE_TOPIC,
            RefetchWindows::uniform(inner.config.attendance_window),
            refresh,
        );

        // Row feeds that feed the aggregate.
        let feed_handles = vec![
            spawn_notify_pump(
                &inner,
                SubscriptionKey::topic(topics::TRAINING_SESSIONS),
                topics::LEADERBOARD.into(),
            ),
            spawn_notify_pump(
                &inner,
                SubscriptionKey::topic(topics::EVENT_PARTICIPANTS),
                topics::LEADERBOARD.into(),
            ),
        ];

        inner.refetcher.force(topics::LEADERBOARD);

        Self { inner, standings, _feed_handles: feed_handles }
    }

    /// Current standings; updated by every refresh path.
    pub fn standings(&self) -> watch::Receiver<Vec<LeaderboardEntry>> {
        self.standings.clone()
    }

    /// Admin recompute: refresh locally and nudge every other client over
    /// the relay. Their cooldowns keep this from cascading.
    pub fn recompute(&self) {
        self.inner
            .realtime
            .relay()
            .broadcast(topics::LEADERBOARD, "admin recompute");
        self.inner.refetcher.force(topics::LEADERBOARD);
    }
}
