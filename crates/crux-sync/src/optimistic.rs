//! Optimistic mutations.
//!
//! User-initiated writes (join/leave, reaction toggle, message delete) apply
//! their predicted result locally before the backend answers, so the UI
//! never waits on the network for its own actions. Per mutation the
//! lifecycle is `Idle → Pending → Confirmed | Failed`:
//!
//! - `Pending`: predicted state applied, backend call in flight. At most one
//!   mutation per (entity, kind) may be pending; later attempts are rejected
//!   locally without touching the network, which is what prevents
//!   duplicate-join races and double-toggle flicker.
//! - `Confirmed`: the server answered; authoritative state replaces the
//!   prediction (callers follow up with a cache refresh). A uniqueness
//!   violation counts as confirmation — the end state the user asked for
//!   already holds — and produces no error.
//! - `Failed`: local state rolls back to the pre-mutation snapshot and
//!   exactly one notice is emitted.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;

use tracing::debug;
use uuid::Uuid;

use crux_backend::error::BackendError;

use crate::notice::Notices;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Join,
    Leave,
    React,
    Delete,
    Update,
}

/// How a mutation ended.
#[derive(Debug)]
pub enum MutationOutcome<O> {
    /// Server confirmed; carries the response for callers that fold it into
    /// local state (reaction counts, stored rows).
    Confirmed(O),
    /// Uniqueness violation: the desired state already held server-side.
    AlreadyApplied,
    /// Backend call failed; optimistic state was rolled back.
    RolledBack,
    /// A mutation for this (entity, kind) was already pending.
    Rejected,
}

impl<O> MutationOutcome<O> {
    /// True when the optimistic state may be kept.
    pub fn applied(&self) -> bool {
        matches!(self, MutationOutcome::Confirmed(_) | MutationOutcome::AlreadyApplied)
    }
}

pub struct MutationTracker {
    in_flight: Mutex<HashSet<(Uuid, MutationKind)>>,
    notices: Notices,
}

impl MutationTracker {
    pub fn new(notices: Notices) -> Self {
        Self {
            in_flight: Mutex::new(HashSet::new()),
            notices,
        }
    }

    /// Whether a mutation for (entity, kind) is pending — drives disabled
    /// actions in the UI.
    pub fn is_pending(&self, entity: Uuid, kind: MutationKind) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .contains(&(entity, kind))
    }

    /// Run one optimistic mutation.
    ///
    /// `apply` installs the predicted state synchronously and returns the
    /// undo snapshot; `rollback` restores it; `op` is the backend call.
    pub async fn run<S, O, A, R, Fut>(
        &self,
        entity: Uuid,
        kind: MutationKind,
        apply: A,
        rollback: R,
        op: Fut,
    ) -> MutationOutcome<O>
    where
        A: FnOnce() -> S,
        R: FnOnce(S),
        Fut: Future<Output = Result<O, BackendError>>,
    {
        {
            let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
            if !in_flight.insert((entity, kind)) {
                debug!("mutation {:?} on {} rejected: already pending", kind, entity);
                return MutationOutcome::Rejected;
            }
        }

        let snapshot = apply();
        let result = op.await;

        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&(entity, kind));

        match result {
            Ok(output) => MutationOutcome::Confirmed(output),
            Err(err) if err.is_duplicate() => {
                debug!("mutation {:?} on {} was already applied", kind, entity);
                MutationOutcome::AlreadyApplied
            }
            Err(err) => {
                rollback(snapshot);
                self.notices.error(err.to_string());
                MutationOutcome::RolledBack
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::oneshot;

    use super::*;

    fn tracker() -> (Arc<MutationTracker>, Notices) {
        let notices = Notices::new();
        (Arc::new(MutationTracker::new(notices.clone())), notices)
    }

    #[tokio::test]
    async fn confirmed_keeps_optimistic_state() {
        let (tracker, notices) = tracker();
        let mut rx = notices.subscribe();
        let joined = Arc::new(AtomicBool::new(false));

        let flag = joined.clone();
        let undo = joined.clone();
        let outcome = tracker
            .run(
                Uuid::new_v4(),
                MutationKind::Join,
                move || flag.swap(true, Ordering::SeqCst),
                move |prior| undo.store(prior, Ordering::SeqCst),
                async { Ok::<_, BackendError>(()) },
            )
            .await;

        assert!(outcome.applied());
        assert!(joined.load(Ordering::SeqCst));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_key_is_benign() {
        let (tracker, notices) = tracker();
        let mut rx = notices.subscribe();
        let joined = Arc::new(AtomicBool::new(false));

        let flag = joined.clone();
        let undo = joined.clone();
        let outcome = tracker
            .run(
                Uuid::new_v4(),
                MutationKind::Join,
                move || flag.swap(true, Ordering::SeqCst),
                move |prior| undo.store(prior, Ordering::SeqCst),
                async { Err::<(), _>(BackendError::Duplicate("(event, user) exists".into())) },
            )
            .await;

        assert!(matches!(outcome, MutationOutcome::AlreadyApplied));
        // No rollback, no error notice.
        assert!(joined.load(Ordering::SeqCst));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failure_rolls_back_and_notices_once() {
        let (tracker, notices) = tracker();
        let mut rx = notices.subscribe();
        let joined = Arc::new(AtomicBool::new(false));

        let flag = joined.clone();
        let undo = joined.clone();
        let outcome = tracker
            .run(
                Uuid::new_v4(),
                MutationKind::Join,
                move || flag.swap(true, Ordering::SeqCst),
                move |prior| undo.store(prior, Ordering::SeqCst),
                async {
                    Err::<(), _>(BackendError::Api { status: 500, message: "boom".into() })
                },
            )
            .await;

        assert!(matches!(outcome, MutationOutcome::RolledBack));
        assert!(!joined.load(Ordering::SeqCst));

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.level, crate::NoticeLevel::Error);
        assert!(rx.try_recv().is_err(), "exactly one notice expected");
    }

    #[tokio::test]
    async fn second_join_while_pending_is_rejected_without_a_write() {
        let (tracker, _notices) = tracker();
        let entity = Uuid::new_v4();
        let writes = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let first_writes = writes.clone();
        let first = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tracker
                    .run(
                        entity,
                        MutationKind::Join,
                        || (),
                        |_| {},
                        async move {
                            first_writes.fetch_add(1, Ordering::SeqCst);
                            let _ = release_rx.await;
                            Ok::<_, BackendError>(())
                        },
                    )
                    .await
            })
        };

        // Wait until the first mutation is pending.
        while !tracker.is_pending(entity, MutationKind::Join) {
            tokio::task::yield_now().await;
        }

        let second_writes = writes.clone();
        let outcome = tracker
            .run(
                entity,
                MutationKind::Join,
                || (),
                |_| {},
                async move {
                    second_writes.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BackendError>(())
                },
            )
            .await;

        assert!(matches!(outcome, MutationOutcome::Rejected));
        assert_eq!(writes.load(Ordering::SeqCst), 1, "second write must not be issued");

        let _ = release_tx.send(());
        assert!(first.await.unwrap().applied());
        assert!(!tracker.is_pending(entity, MutationKind::Join));
    }

    #[tokio::test]
    async fn different_kinds_on_one_entity_do_not_block_each_other() {
        let (tracker, _notices) = tracker();
        let entity = Uuid::new_v4();

        let join = tracker
            .run(entity, MutationKind::Join, || (), |_| {}, async {
                Ok::<_, BackendError>(())
            })
            .await;
        let react = tracker
            .run(entity, MutationKind::React, || (), |_| {}, async {
                Ok::<_, BackendError>(())
            })
            .await;

        assert!(join.applied());
        assert!(react.applied());
    }
}
