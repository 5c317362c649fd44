//! Change-feed subscription registry.
//!
//! One upstream channel exists per unique (topic, filter) key, no matter how
//! many local consumers attach — opening duplicates would exhaust the
//! backend's per-client channel allowance. The registry is an injectable
//! object owned by the root composition; nothing here is a process global.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use crux_types::events::{ChangeEvent, ClientCommand, SubscriptionKey};

/// Messages buffered per local consumer before it starts lagging.
const CHANNEL_CAPACITY: usize = 256;

/// Identifies one local attachment to a change feed. Must be released with
/// [`ChannelRegistry::unsubscribe`]; release is idempotent.
#[derive(Debug)]
pub struct SubscriptionHandle {
    key: SubscriptionKey,
    id: u64,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }
}

struct Entry {
    tx: broadcast::Sender<ChangeEvent>,
    subscribers: HashSet<u64>,
}

pub struct ChannelRegistry {
    entries: Mutex<HashMap<SubscriptionKey, Entry>>,
    commands: mpsc::UnboundedSender<ClientCommand>,
    next_id: AtomicU64,
}

impl ChannelRegistry {
    pub(crate) fn new(commands: mpsc::UnboundedSender<ClientCommand>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            commands,
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach to the change feed for `key`.
    ///
    /// Idempotent per key: the first attachment opens the upstream channel,
    /// later ones multiplex onto it. Ordering within the returned receiver is
    /// backend delivery order for that channel.
    pub fn subscribe(
        &self,
        key: SubscriptionKey,
    ) -> (SubscriptionHandle, broadcast::Receiver<ChangeEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().expect("registry lock poisoned");

        let entry = match entries.entry(key.clone()) {
            std::collections::hash_map::Entry::Occupied(occupied) => occupied.into_mut(),
            std::collections::hash_map::Entry::Vacant(vacant) => {
                debug!("opening channel for {:?}", key);
                let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
                // Queued if the socket is down; replayed on (re)connect.
                let _ = self.commands.send(ClientCommand::Subscribe { key: key.clone() });
                vacant.insert(Entry {
                    tx,
                    subscribers: HashSet::new(),
                })
            }
        };

        entry.subscribers.insert(id);
        let rx = entry.tx.subscribe();
        drop(entries);
        (SubscriptionHandle { key, id }, rx)
    }

    /// Detach a local consumer. Safe to call more than once with the same
    /// handle. The upstream channel closes when its last consumer leaves.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        let Some(entry) = entries.get_mut(&handle.key) else {
            return;
        };
        if !entry.subscribers.remove(&handle.id) {
            return;
        }
        if entry.subscribers.is_empty() {
            debug!("closing channel for {:?}", handle.key);
            entries.remove(&handle.key);
            let _ = self
                .commands
                .send(ClientCommand::Unsubscribe { key: handle.key.clone() });
        }
    }

    /// Deliver an incoming change to every channel on its topic.
    ///
    /// Changes carry the topic but not the filter they matched, so all
    /// filtered channels on that topic are notified; consumers refetch with
    /// their own filter, which makes over-delivery harmless.
    pub(crate) fn dispatch(&self, event: ChangeEvent) -> usize {
        let entries = self.entries.lock().expect("registry lock poisoned");
        let mut delivered = 0;
        for (key, entry) in entries.iter() {
            if key.topic == event.topic {
                delivered += entry.tx.send(event.clone()).unwrap_or(0);
            }
        }
        trace!("change on {} delivered to {} consumers", event.topic, delivered);
        delivered
    }

    /// Keys with at least one live consumer, for resubscribe replay.
    pub(crate) fn active_keys(&self) -> Vec<SubscriptionKey> {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn channel_count(&self) -> usize {
        self.entries.lock().expect("registry lock poisoned").len()
    }

    pub fn subscriber_count(&self, key: &SubscriptionKey) -> usize {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .get(key)
            .map(|e| e.subscribers.len())
            .unwrap_or(0)
    }
}
