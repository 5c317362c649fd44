//! Root composition for the club client.
//!
//! [`ClubClient`] owns every shared piece — backend client, realtime socket,
//! channel registry, refetcher, presence store, notice channel — and hands
//! out the domain services a UI shell talks to. Everything spawned anywhere
//! below hangs off the root cancellation token, so [`ClubClient::shutdown`]
//! tears the whole tree down.

pub mod chat;
pub mod events;
pub mod feed;
pub mod gear;
pub mod groups;
pub mod leaderboard;
pub mod routes;
pub mod training;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crux_backend::{AuthState, Backend};
use crux_realtime::{ConnectionState, RealtimeClient, RealtimeConfig};
use crux_realtime::channels::SubscriptionHandle;
use crux_realtime::socket::TokenProvider;
use crux_sync::{MutationTracker, Notices, PresenceStore, Refetcher};
use crux_types::events::SubscriptionKey;
use crux_types::models::Profile;

pub use crate::chat::ChatService;
pub use crate::events::EventsService;
pub use crate::feed::Feed;
pub use crate::gear::GearService;
pub use crate::groups::GroupsService;
pub use crate::leaderboard::LeaderboardService;
pub use crate::routes::RoutesService;
pub use crate::training::TrainingService;

/// Refetch topic for attendance-driven leaderboard nudges (own joins and
/// training logs), paced faster than the general aggregation window.
pub(crate) const ATTENDANCE_TOPIC: &str = "leaderboard:attendance";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub realtime_url: String,
    /// Debounce for ordinary row feeds (participants, messages, gear).
    pub refresh_window: Duration,
    /// Debounce for attendance-driven leaderboard refreshes.
    pub attendance_window: Duration,
    /// Minimum gap between relay-forced refreshes of one topic.
    pub forced_cooldown: Duration,
    /// Debounce for the leaderboard aggregation refresh.
    pub leaderboard_window: Duration,
    /// Aggregation window passed to the leaderboard rpc.
    pub leaderboard_days: u32,
}

impl Config {
    pub fn new(api_url: impl Into<String>, realtime_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            realtime_url: realtime_url.into(),
            refresh_window: Duration::from_millis(1000),
            attendance_window: Duration::from_millis(1000),
            forced_cooldown: Duration::from_millis(3000),
            leaderboard_window: Duration::from_millis(5000),
            leaderboard_days: 30,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env if present
        let _ = dotenvy::dotenv();

        let api_url =
            std::env::var("CRUX_API_URL").unwrap_or_else(|_| "http://localhost:4000".into());
        let realtime_url = std::env::var("CRUX_REALTIME_URL")
            .unwrap_or_else(|_| "ws://localhost:4000/realtime".into());

        let mut config = Self::new(api_url, realtime_url);
        if let Ok(days) = std::env::var("CRUX_LEADERBOARD_DAYS") {
            config.leaderboard_days = days.parse()?;
        }
        Ok(config)
    }
}

/// Init logging for binaries and examples embedding the client.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crux=debug".into()),
        )
        .init();
}

pub(crate) struct ClubInner {
    pub(crate) config: Config,
    pub(crate) backend: Backend,
    pub(crate) realtime: RealtimeClient,
    pub(crate) refetcher: Refetcher,
    pub(crate) presence: Arc<PresenceStore>,
    pub(crate) tracker: MutationTracker,
    pub(crate) notices: Notices,
    pub(crate) cancel: CancellationToken,
}

pub struct ClubClient {
    inner: Arc<ClubInner>,
    events: EventsService,
    groups: GroupsService,
    chat: ChatService,
    routes: RoutesService,
    gear: GearService,
    training: TrainingService,
    leaderboard: LeaderboardService,
}

impl ClubClient {
    pub fn new(config: Config) -> Self {
        let cancel = CancellationToken::new();
        let backend = Backend::new(&config.api_url);

        let tokens: TokenProvider = {
            let backend = backend.clone();
            Arc::new(move || backend.session().map(|s| s.access_token))
        };
        let realtime = RealtimeClient::connect(
            RealtimeConfig::new(&config.realtime_url),
            tokens,
            cancel.child_token(),
        );

        let notices = Notices::new();
        let presence = Arc::new(PresenceStore::new());
        presence.clone().spawn_sweeper(cancel.child_token());

        let inner = Arc::new(ClubInner {
            refetcher: Refetcher::new(cancel.child_token()),
            tracker: MutationTracker::new(notices.clone()),
            config,
            backend,
            realtime,
            presence,
            notices,
            cancel,
        });

        spawn_relay_pump(&inner);

        let client = Self {
            events: EventsService::new(inner.clone()),
            groups: GroupsService::new(inner.clone()),
            chat: ChatService::new(inner.clone()),
            routes: RoutesService::new(inner.clone()),
            gear: GearService::new(inner.clone()),
            training: TrainingService::new(inner.clone()),
            leaderboard: LeaderboardService::new(inner.clone()),
            inner,
        };
        info!("club client ready");
        client
    }

    pub fn events(&self) -> &EventsService {
        &self.events
    }

    pub fn groups(&self) -> &GroupsService {
        &self.groups
    }

    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    pub fn routes(&self) -> &RoutesService {
        &self.routes
    }

    pub fn gear(&self) -> &GearService {
        &self.gear
    }

    pub fn training(&self) -> &TrainingService {
        &self.training
    }

    pub fn leaderboard(&self) -> &LeaderboardService {
        &self.leaderboard
    }

    pub fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    pub async fn profile(&self, user_id: uuid::Uuid) -> Result<Profile, crux_backend::Error> {
        self.inner
            .backend
            .from(crux_types::topics::PROFILES)
            .eq("id", user_id)
            .fetch_one()
            .await
    }

    pub async fn my_profile(&self) -> Result<Profile, crux_backend::Error> {
        let session = self
            .inner
            .backend
            .session()
            .ok_or(crux_backend::Error::NoSession)?;
        self.profile(session.user_id).await
    }

    /// User-facing notices (mutation failures, mostly).
    pub fn notices(&self) -> &Notices {
        &self.inner.notices
    }

    /// Realtime connection state; dependents can fall back to polling while
    /// this reads `Disconnected`/`Reconnecting`.
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.realtime.state()
    }

    pub fn auth_changes(&self) -> watch::Receiver<AuthState> {
        self.inner.backend.auth_changes()
    }

    /// Cancel every task spawned by this client and its services.
    pub fn shutdown(&self) {
        info!("club client shutting down");
        self.inner.cancel.cancel();
    }
}

/// Receive side of the cross-client relay: a foreign broadcast becomes a
/// forced refresh, which the per-topic cooldown then gates — that is what
/// keeps two tabs from ping-ponging refreshes at each other.
fn spawn_relay_pump(inner: &Arc<ClubInner>) {
    let mut messages = inner.realtime.relay().messages();
    let inner = inner.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = inner.cancel.cancelled() => return,
                msg = messages.recv() => match msg {
                    Ok(msg) => {
                        debug!("relay refresh for {} ({})", msg.topic, msg.reason);
                        inner.refetcher.force(&msg.topic);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("relay receiver lagged by {} messages", n);
                    }
                    Err(_) => return,
                },
            }
        }
    });
}

/// Subscribe to a change feed and turn every event into a debounced refresh
/// request, for consumers that do not need the event payloads themselves.
pub(crate) fn spawn_notify_pump(
    inner: &Arc<ClubInner>,
    key: SubscriptionKey,
    notify_topic: String,
) -> SubscriptionHandle {
    let (handle, mut rx) = inner.realtime.registry().subscribe(key);
    let inner = inner.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = inner.cancel.cancelled() => return,
                event = rx.recv() => match event {
                    Ok(_) => inner.refetcher.notify(&notify_topic),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        // Missed events are fine: the refresh pulls latest.
                        inner.refetcher.notify(&notify_topic);
                    }
                    Err(_) => return,
                },
            }
        }
    });
    handle
}

/// Refetch topic name for a (table, filter) feed.
pub(crate) fn feed_topic(table: &str, filter: Option<&str>) -> String {
    match filter {
        Some(filter) => format!("{table}:{filter}"),
        None => table.to_string(),
    }
}
