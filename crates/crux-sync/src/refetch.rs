//! Debounced refetching.
//!
//! Realtime backends emit several change events per logical user action (an
//! insert plus a touch-update is typical), and multiple tabs can ask for the
//! same refresh at once. Refetching per event would hammer the network and
//! flicker the UI, so every topic funnels through here:
//!
//! - [`Refetcher::notify`] is trailing-edge: the first notification in a
//!   quiet period opens a window, the refresh runs once when the window
//!   closes, and everything arriving in between is coalesced into that run.
//! - [`Refetcher::force`] (cross-client relay requests) runs immediately,
//!   unless a refresh for the topic already executed inside the window —
//!   then it is dropped, which is what breaks refresh feedback loops
//!   between tabs.
//!
//! Refreshes are "pull latest" and idempotent; per-topic runs are
//! serialized, so concurrent requesters share one underlying fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

enum Request {
    Notify,
    Force,
}

/// Per-topic timing. The debounce window paces change-feed refreshes; the
/// force cooldown is the minimum gap between relay-driven refreshes. They
/// usually coincide, but aggregates like the leaderboard pace their feed
/// refreshes slower than their cross-tab nudges.
#[derive(Debug, Clone, Copy)]
pub struct RefetchWindows {
    pub debounce: Duration,
    pub force_cooldown: Duration,
}

impl RefetchWindows {
    pub fn uniform(window: Duration) -> Self {
        Self { debounce: window, force_cooldown: window }
    }
}

pub struct Refetcher {
    topics: Mutex<HashMap<String, mpsc::UnboundedSender<Request>>>,
    cancel: CancellationToken,
}

impl Refetcher {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            cancel,
        }
    }

    /// Register `topic` with its windows and refresh action. Registering an
    /// already-known topic replaces its action and windows.
    pub fn register<F, Fut>(&self, topic: &str, windows: RefetchWindows, refresh: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let replaced = self
            .topics
            .lock()
            .expect("topic lock poisoned")
            .insert(topic.to_string(), tx);
        if replaced.is_some() {
            debug!("replacing refetch registration for {}", topic);
        }

        let name = topic.to_string();
        let cancel = self.cancel.clone();
        tokio::spawn(run_topic(name, windows, refresh, rx, cancel));
    }

    /// Record that `topic` needs a refresh soon (change feed path).
    pub fn notify(&self, topic: &str) {
        self.request(topic, Request::Notify);
    }

    /// Request an immediate refresh (relay path); subject to the cooldown.
    pub fn force(&self, topic: &str) {
        self.request(topic, Request::Force);
    }

    pub fn is_registered(&self, topic: &str) -> bool {
        self.topics
            .lock()
            .expect("topic lock poisoned")
            .contains_key(topic)
    }

    fn request(&self, topic: &str, request: Request) {
        let topics = self.topics.lock().expect("topic lock poisoned");
        match topics.get(topic) {
            Some(tx) => {
                let _ = tx.send(request);
            }
            None => debug!("refresh requested for unregistered topic {}", topic),
        }
    }
}

async fn run_topic<F, Fut>(
    topic: String,
    windows: RefetchWindows,
    refresh: F,
    mut rx: mpsc::UnboundedReceiver<Request>,
    cancel: CancellationToken,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let mut last_refreshed: Option<Instant> = None;

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => return,
            req = rx.recv() => match req {
                Some(req) => req,
                None => return,
            },
        };

        match request {
            Request::Notify => {
                // Trailing edge: open the window, swallow everything that
                // arrives inside it, refresh once at the close.
                let deadline = Instant::now() + windows.debounce;
                let mut coalesced: usize = 0;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep_until(deadline) => break,
                        more = rx.recv() => match more {
                            Some(_) => coalesced += 1,
                            None => return,
                        },
                    }
                }
                if coalesced > 0 {
                    trace!("{}: coalesced {} refresh requests", topic, coalesced);
                }
                refresh().await;
                last_refreshed = Some(Instant::now());
            }
            Request::Force => {
                let in_cooldown = last_refreshed
                    .map(|at| at.elapsed() < windows.force_cooldown)
                    .unwrap_or(false);
                if in_cooldown {
                    trace!("{}: forced refresh dropped (cooldown)", topic);
                    continue;
                }
                refresh().await;
                last_refreshed = Some(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counted(refetcher: &Refetcher, topic: &str, windows: RefetchWindows) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        refetcher.register(topic, windows, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        count
    }

    async fn settle() {
        // Let spawned topic tasks observe queued requests.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn notify_storm_runs_exactly_one_refresh_at_window_close() {
        let refetcher = Refetcher::new(CancellationToken::new());
        let window = Duration::from_secs(1);

        let fired_at: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let slot = fired_at.clone();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        refetcher.register("event_participants", RefetchWindows::uniform(window), move || {
            let slot = slot.clone();
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                *slot.lock().expect("slot poisoned") = Some(Instant::now());
            }
        });

        let opened = Instant::now();
        for _ in 0..6 {
            refetcher.notify("event_participants");
            settle().await;
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        // Six notifies inside one window: nothing has run yet.
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let at = fired_at.lock().expect("slot poisoned").expect("never fired");
        assert!(at.duration_since(opened) >= window);
    }

    #[tokio::test(start_paused = true)]
    async fn windows_reopen_after_a_refresh() {
        let refetcher = Refetcher::new(CancellationToken::new());
        let count = counted(&refetcher, "messages", RefetchWindows::uniform(Duration::from_secs(1)));

        refetcher.notify("messages");
        settle().await;
        tokio::time::advance(Duration::from_millis(1100)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        refetcher.notify("messages");
        settle().await;
        tokio::time::advance(Duration::from_millis(1100)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_refresh_runs_once_within_cooldown() {
        let refetcher = Refetcher::new(CancellationToken::new());
        let count = counted(&refetcher, "leaderboard", RefetchWindows::uniform(Duration::from_secs(3)));

        // Two forced requests 2s apart inside a 3s window: one fetch.
        refetcher.force("leaderboard");
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        refetcher.force("leaderboard");
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Past the window the next force goes through.
        tokio::time::advance(Duration::from_secs(2)).await;
        refetcher.force("leaderboard");
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn notify_then_force_shares_the_trailing_refresh() {
        let refetcher = Refetcher::new(CancellationToken::new());
        let count = counted(&refetcher, "attendance", RefetchWindows::uniform(Duration::from_secs(1)));

        refetcher.notify("attendance");
        settle().await;
        refetcher.force("attendance");
        settle().await;

        tokio::time::advance(Duration::from_millis(1100)).await;
        settle().await;

        // The force landed inside the pending window and was coalesced.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn split_windows_pace_notify_and_force_independently() {
        let refetcher = Refetcher::new(CancellationToken::new());
        let count = counted(
            &refetcher,
            "leaderboard",
            RefetchWindows {
                debounce: Duration::from_secs(5),
                force_cooldown: Duration::from_secs(3),
            },
        );

        refetcher.force("leaderboard");
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // 4s later: past the 3s force cooldown even though the 5s debounce
        // window has not elapsed.
        tokio::time::advance(Duration::from_secs(4)).await;
        refetcher.force("leaderboard");
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unregistered_topic_is_ignored() {
        let refetcher = Refetcher::new(CancellationToken::new());
        refetcher.notify("nope");
        refetcher.force("nope");
        assert!(!refetcher.is_registered("nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_pending_refreshes() {
        let cancel = CancellationToken::new();
        let refetcher = Refetcher::new(cancel.clone());
        let count = counted(&refetcher, "routes", RefetchWindows::uniform(Duration::from_secs(1)));

        refetcher.notify("routes");
        settle().await;
        cancel.cancel();
        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
