//! Client-side synchronization and reconciliation.
//!
//! Sits between the realtime feeds and the domain services:
//! - [`refetch`] — turns change-notification floods into bounded-rate
//!   refreshes (trailing-edge debounce per topic, cooldown-gated forced
//!   refresh for relay messages)
//! - [`optimistic`] — immediate local state for user mutations with
//!   rollback-on-failure and duplicate-key forgiveness
//! - [`presence`] — typing indicators with local staleness expiry and
//!   keystroke debouncing
//! - [`notice`] — the non-blocking channel user-facing errors surface on
//!
//! Nothing here is durable and nothing here is fatal: all consistency is
//! eventual and backend-arbitrated, and every failure is recoverable by
//! pulling authoritative state again.

pub mod notice;
pub mod optimistic;
pub mod presence;
pub mod refetch;

pub use notice::{Notice, NoticeLevel, Notices};
pub use optimistic::{MutationKind, MutationOutcome, MutationTracker};
pub use presence::{PresenceStore, TypingReporter};
pub use refetch::{RefetchWindows, Refetcher};
