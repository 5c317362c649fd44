//! Ephemeral typing presence.
//!
//! Typing indicators are ordinary backend rows, but the local view never
//! trusts them to be cleaned up: a client that loses power mid-sentence
//! sends no stop signal, so any record not refreshed within [`STALE_AFTER`]
//! is dropped locally whether or not a delete event ever arrives. This is
//! the one place change-event payloads are applied directly instead of
//! refetched — typing rows are gone from the table long before a refetch
//! would land, so the payload is the only truth there is.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crux_backend::DataPlane;
use crux_types::events::{ChangeEvent, ChangeOp};
use crux_types::models::{Room, TypingIndicator};
use crux_types::topics;

/// A record not refreshed for this long is dropped from the local view.
pub const STALE_AFTER: Duration = Duration::from_secs(10);

/// How often the background sweeper prunes stale records.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Quiet period after the last keystroke before stop-typing fires.
pub const STOP_AFTER: Duration = Duration::from_secs(3);

/// While typing continues, the row is re-upserted at this cadence so other
/// clients' staleness clocks keep resetting.
const REFRESH_EVERY: Duration = Duration::from_secs(4);

#[derive(Debug, Clone)]
pub struct Typist {
    pub user_id: Uuid,
    pub display_name: String,
}

struct Entry {
    display_name: String,
    seen_at: Instant,
}

/// Local view of who is typing where.
pub struct PresenceStore {
    rooms: Mutex<HashMap<Room, HashMap<Uuid, Entry>>>,
    changed: broadcast::Sender<Room>,
}

impl PresenceStore {
    pub fn new() -> Self {
        let (changed, _) = broadcast::channel(64);
        Self {
            rooms: Mutex::new(HashMap::new()),
            changed,
        }
    }

    /// Rooms whose typist set changed (by events or expiry).
    pub fn changes(&self) -> broadcast::Receiver<Room> {
        self.changed.subscribe()
    }

    /// Fold one change event from the typing feed into the local view.
    pub fn apply(&self, event: &ChangeEvent) {
        if event.topic != topics::TYPING_INDICATORS {
            return;
        }
        match event.op {
            ChangeOp::Insert | ChangeOp::Update => {
                match serde_json::from_value::<TypingIndicator>(event.row.clone()) {
                    Ok(row) if row.is_active => self.mark(row.room, row.user_id, row.display_name),
                    Ok(row) => self.remove(row.room, row.user_id),
                    Err(e) => debug!("undecodable typing row: {}", e),
                }
            }
            ChangeOp::Delete => {
                // Delete payloads carry at least the key columns. If even
                // those are missing, staleness expiry cleans up shortly.
                let room = event.row.get("room").and_then(|v| v.as_str());
                let user = event.row.get("user_id").and_then(|v| v.as_str());
                if let (Some(Ok(room)), Some(Ok(user))) =
                    (room.map(str::parse::<Room>), user.map(str::parse::<Uuid>))
                {
                    self.remove(room, user);
                }
            }
        }
    }

    /// Who is typing in `room`, staleness already filtered out.
    pub fn typists(&self, room: Room) -> Vec<Typist> {
        let rooms = self.rooms.lock().expect("presence lock poisoned");
        rooms
            .get(&room)
            .map(|users| {
                users
                    .iter()
                    .filter(|(_, entry)| entry.seen_at.elapsed() < STALE_AFTER)
                    .map(|(user_id, entry)| Typist {
                        user_id: *user_id,
                        display_name: entry.display_name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run the expiry sweeper until `cancel` fires.
    pub fn spawn_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let store = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick.tick() => store.sweep(),
                }
            }
        });
    }

    fn mark(&self, room: Room, user_id: Uuid, display_name: String) {
        let mut rooms = self.rooms.lock().expect("presence lock poisoned");
        rooms.entry(room).or_default().insert(
            user_id,
            Entry { display_name, seen_at: Instant::now() },
        );
        drop(rooms);
        let _ = self.changed.send(room);
    }

    fn remove(&self, room: Room, user_id: Uuid) {
        let mut rooms = self.rooms.lock().expect("presence lock poisoned");
        let removed = rooms
            .get_mut(&room)
            .map(|users| users.remove(&user_id).is_some())
            .unwrap_or(false);
        if let Some(users) = rooms.get(&room) {
            if users.is_empty() {
                rooms.remove(&room);
            }
        }
        drop(rooms);
        if removed {
            let _ = self.changed.send(room);
        }
    }

    pub(crate) fn sweep(&self) {
        let mut expired_rooms = Vec::new();
        {
            let mut rooms = self.rooms.lock().expect("presence lock poisoned");
            for (room, users) in rooms.iter_mut() {
                let before = users.len();
                users.retain(|_, entry| entry.seen_at.elapsed() < STALE_AFTER);
                if users.len() != before {
                    expired_rooms.push(*room);
                }
            }
            rooms.retain(|_, users| !users.is_empty());
        }
        for room in expired_rooms {
            let _ = self.changed.send(room);
        }
    }
}

impl Default for PresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

enum Signal {
    Keystroke,
    Stop,
}

/// Publishes this user's typing state for one room.
///
/// Rapid keystrokes coalesce into a single start-typing upsert (refreshed at
/// [`REFRESH_EVERY`] while activity continues) and stop-typing is a trailing
/// [`STOP_AFTER`] debounce, rescheduled by every keystroke. Sending or
/// explicitly stopping deletes the row immediately.
pub struct TypingReporter {
    tx: mpsc::UnboundedSender<Signal>,
}

impl TypingReporter {
    pub fn spawn(
        backend: Arc<dyn DataPlane>,
        room: Room,
        user_id: Uuid,
        display_name: String,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(report(backend, room, user_id, display_name, rx, cancel));
        Self { tx }
    }

    pub fn keystroke(&self) {
        let _ = self.tx.send(Signal::Keystroke);
    }

    /// Explicit stop: message sent, input cleared, room left.
    pub fn stop(&self) {
        let _ = self.tx.send(Signal::Stop);
    }
}

async fn report(
    backend: Arc<dyn DataPlane>,
    room: Room,
    user_id: Uuid,
    display_name: String,
    mut rx: mpsc::UnboundedReceiver<Signal>,
    cancel: CancellationToken,
) {
    let mut typing = false;
    let mut deadline: Option<Instant> = None;
    let mut last_upsert: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            signal = rx.recv() => match signal {
                None => break,
                Some(Signal::Keystroke) => {
                    let refresh_due = last_upsert
                        .map(|at| at.elapsed() >= REFRESH_EVERY)
                        .unwrap_or(true);
                    if !typing || refresh_due {
                        upsert(&*backend, room, user_id, &display_name).await;
                        typing = true;
                        last_upsert = Some(Instant::now());
                    }
                    deadline = Some(Instant::now() + STOP_AFTER);
                }
                Some(Signal::Stop) => {
                    if typing {
                        delete(&*backend, room, user_id).await;
                        typing = false;
                        last_upsert = None;
                    }
                    deadline = None;
                }
            },

            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                delete(&*backend, room, user_id).await;
                typing = false;
                deadline = None;
                last_upsert = None;
            }
        }
    }

    // Leave no row behind on teardown.
    if typing {
        delete(&*backend, room, user_id).await;
    }
}

async fn upsert(backend: &dyn DataPlane, room: Room, user_id: Uuid, display_name: &str) {
    let row = TypingIndicator {
        room,
        user_id,
        display_name: display_name.to_string(),
        is_active: true,
        updated_at: chrono::Utc::now(),
    };
    match serde_json::to_value(&row) {
        Ok(row) => {
            if let Err(e) = backend.upsert_row(topics::TYPING_INDICATORS, row).await {
                warn!("typing upsert failed: {}", e);
            }
        }
        Err(e) => warn!("typing row encode failed: {}", e),
    }
}

async fn delete(backend: &dyn DataPlane, room: Room, user_id: Uuid) {
    let filter = format!("room=eq.{room}&user_id=eq.{user_id}");
    if let Err(e) = backend.delete_rows(topics::TYPING_INDICATORS, &filter).await {
        warn!("typing delete failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use crux_backend::memory::MemoryDataPlane;

    use super::*;

    fn typing_event(room: Room, user_id: Uuid, name: &str, active: bool) -> ChangeEvent {
        ChangeEvent {
            topic: topics::TYPING_INDICATORS.into(),
            op: ChangeOp::Insert,
            key: Uuid::new_v4(),
            row: serde_json::json!({
                "room": room.to_string(),
                "user_id": user_id,
                "display_name": name,
                "is_active": active,
                "updated_at": "2026-08-07T10:00:00Z",
            }),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn record_expires_at_ten_seconds_without_refresh() {
        let store = PresenceStore::new();
        let room = Room::Group(Uuid::new_v4());
        let user = Uuid::new_v4();

        store.apply(&typing_event(room, user, "Ines", true));
        assert_eq!(store.typists(room).len(), 1);

        tokio::time::advance(Duration::from_millis(9_900)).await;
        assert_eq!(store.typists(room).len(), 1, "still fresh before 10s");

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(store.typists(room).is_empty(), "expired at 10s without a delete event");
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_resets_the_staleness_clock() {
        let store = PresenceStore::new();
        let room = Room::Group(Uuid::new_v4());
        let user = Uuid::new_v4();

        store.apply(&typing_event(room, user, "Ines", true));
        tokio::time::advance(Duration::from_secs(8)).await;
        store.apply(&typing_event(room, user, "Ines", true));
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(store.typists(room).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_event_and_inactive_update_remove_immediately() {
        let store = PresenceStore::new();
        let room = Room::Event(Uuid::new_v4());
        let alice = Uuid::new_v4();
        let bora = Uuid::new_v4();

        store.apply(&typing_event(room, alice, "Alice", true));
        store.apply(&typing_event(room, bora, "Bora", true));
        assert_eq!(store.typists(room).len(), 2);

        store.apply(&ChangeEvent {
            topic: topics::TYPING_INDICATORS.into(),
            op: ChangeOp::Delete,
            key: Uuid::new_v4(),
            row: serde_json::json!({"room": room.to_string(), "user_id": alice}),
        });
        assert_eq!(store.typists(room).len(), 1);

        store.apply(&typing_event(room, bora, "Bora", false));
        assert!(store.typists(room).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_announces_expiry() {
        let store = Arc::new(PresenceStore::new());
        let cancel = CancellationToken::new();
        store.clone().spawn_sweeper(cancel.clone());
        settle().await;

        let room = Room::Group(Uuid::new_v4());
        store.apply(&typing_event(room, Uuid::new_v4(), "Ines", true));
        let mut changes = store.changes();

        tokio::time::advance(Duration::from_secs(11)).await;
        settle().await;

        let changed_room = changes.try_recv().expect("sweeper should announce the room");
        assert_eq!(changed_room, room);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_typing_fires_three_seconds_after_last_keystroke() {
        let backend = Arc::new(MemoryDataPlane::new());
        let cancel = CancellationToken::new();
        let room = Room::Group(Uuid::new_v4());
        let reporter = TypingReporter::spawn(
            backend.clone(),
            room,
            Uuid::new_v4(),
            "Ines".into(),
            cancel.clone(),
        );

        // Keystrokes at t = 0, 1, 2.
        for _ in 0..3 {
            reporter.keystroke();
            settle().await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        // t = 3: row still there (stop is due at t = 5, not t = 3).
        assert_eq!(backend.rows(topics::TYPING_INDICATORS).len(), 1);

        tokio::time::advance(Duration::from_millis(1_900)).await;
        settle().await;
        assert_eq!(
            backend.rows(topics::TYPING_INDICATORS).len(),
            1,
            "still typing at t=4.9"
        );

        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert!(
            backend.rows(topics::TYPING_INDICATORS).is_empty(),
            "stop fired at t=5"
        );
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_keystrokes_coalesce_into_one_upsert() {
        let backend = Arc::new(MemoryDataPlane::new());
        let cancel = CancellationToken::new();
        let reporter = TypingReporter::spawn(
            backend.clone(),
            Room::Group(Uuid::new_v4()),
            Uuid::new_v4(),
            "Ines".into(),
            cancel.clone(),
        );

        for _ in 0..20 {
            reporter.keystroke();
            settle().await;
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        // Two seconds of hammering, one start-typing mutation.
        assert_eq!(backend.mutation_count(), 1);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_deletes_immediately() {
        let backend = Arc::new(MemoryDataPlane::new());
        let cancel = CancellationToken::new();
        let reporter = TypingReporter::spawn(
            backend.clone(),
            Room::Group(Uuid::new_v4()),
            Uuid::new_v4(),
            "Ines".into(),
            cancel.clone(),
        );

        reporter.keystroke();
        settle().await;
        assert_eq!(backend.rows(topics::TYPING_INDICATORS).len(), 1);

        reporter.stop();
        settle().await;
        assert!(backend.rows(topics::TYPING_INDICATORS).is_empty());
        cancel.cancel();
    }
}
