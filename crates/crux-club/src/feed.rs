//! Live row feeds.
//!
//! A [`Feed`] is the client-side view of one (table, filter) pair: a typed
//! snapshot kept current by the change feed through the debounced refetcher.
//! The snapshot is also where optimistic edits land — services mutate it
//! directly, and since every refresh replaces it wholesale with server rows,
//! reconciliation can never strand a stale prediction.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crux_realtime::channels::{ChannelRegistry, SubscriptionHandle};
use crux_sync::RefetchWindows;
use crux_types::events::SubscriptionKey;

use crate::{ClubInner, feed_topic};

pub struct Feed<T> {
    snapshot: Arc<watch::Sender<Vec<T>>>,
    registry: Arc<ChannelRegistry>,
    handle: SubscriptionHandle,
    pump_cancel: CancellationToken,
    refetch_topic: String,
}

impl<T: Clone> Feed<T> {
    /// Watch the snapshot; the receiver sees every refresh and every
    /// optimistic edit.
    pub fn subscribe(&self) -> watch::Receiver<Vec<T>> {
        self.snapshot.subscribe()
    }

    pub fn current(&self) -> Vec<T> {
        self.snapshot.borrow().clone()
    }

    pub fn refetch_topic(&self) -> &str {
        &self.refetch_topic
    }

    /// Apply an optimistic edit in place.
    pub(crate) fn mutate(&self, edit: impl FnOnce(&mut Vec<T>)) {
        self.snapshot.send_modify(edit);
    }

    /// Restore a pre-mutation snapshot (rollback path).
    pub(crate) fn set(&self, rows: Vec<T>) {
        self.snapshot.send_replace(rows);
    }

    /// Release the subscription and stop the pump. Idempotent; also implied
    /// by client shutdown.
    pub fn close(&self) {
        self.pump_cancel.cancel();
        self.registry.unsubscribe(&self.handle);
    }
}

/// Wire up a feed: register its refresh with the refetcher, attach to the
/// change feed, pump events into `notify`, and prime the first load.
pub(crate) fn open_feed<T>(
    inner: &Arc<ClubInner>,
    table: &str,
    filter: Option<String>,
    order: Option<(&str, bool)>,
    windows: RefetchWindows,
) -> Feed<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let refetch_topic = feed_topic(table, filter.as_deref());
    let (tx, _) = watch::channel(Vec::new());
    let tx = Arc::new(tx);

    {
        let backend = inner.backend.clone();
        let table = table.to_string();
        let filter = filter.clone();
        let order = order.map(|(column, desc)| (column.to_string(), desc));
        let tx = tx.clone();
        inner.refetcher.register(&refetch_topic, windows, move || {
            let backend = backend.clone();
            let table = table.clone();
            let filter = filter.clone();
            let order = order.clone();
            let tx = tx.clone();
            async move {
                let mut select = backend.from(&table);
                if let Some(filter) = &filter {
                    select = select.raw_filter(filter);
                }
                if let Some((column, desc)) = &order {
                    select = select.order(column, *desc);
                }
                match select.fetch::<T>().await {
                    Ok(rows) => {
                        tx.send_replace(rows);
                    }
                    Err(e) => warn!("refresh of {} failed: {}", table, e),
                }
            }
        });
    }

    let key = match &filter {
        Some(filter) => SubscriptionKey::filtered(table, filter.clone()),
        None => SubscriptionKey::topic(table),
    };
    let (handle, mut events) = inner.realtime.registry().subscribe(key);

    let pump_cancel = inner.cancel.child_token();
    {
        let refetcher_inner = inner.clone();
        let topic = refetch_topic.clone();
        let pump_cancel = pump_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => return,
                    event = events.recv() => match event {
                        Ok(_) => refetcher_inner.refetcher.notify(&topic),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            refetcher_inner.refetcher.notify(&topic);
                        }
                        Err(_) => return,
                    },
                }
            }
        });
    }

    // Prime the snapshot; no cooldown exists yet so this runs immediately.
    inner.refetcher.force(&refetch_topic);

    Feed {
        snapshot: tx,
        registry: inner.realtime.registry().clone(),
        handle,
        pump_cancel,
        refetch_topic,
    }
}
