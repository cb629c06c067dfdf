//! Cluster-facing ingest: watch streams fanned into one event channel
//!
//! Each resource kind gets its own watch task; all of them feed a single
//! bounded mpsc channel consumed by the reconciler. Producers block when the
//! channel is full rather than dropping events.

mod event;
mod watch;

pub use event::{ResourceKind, SyncEvent, Verb, VerbTracker};
pub use watch::{spawn_watchers, tick};
