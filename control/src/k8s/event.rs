//! Typed events flowing from the watch streams into the reconciler

use std::collections::HashSet;
use std::fmt;

use crate::store::{ConfigMap, Ingress, Pod, Secret, Service};

/// Resource kind a watch event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Namespace,
    Service,
    Pod,
    Ingress,
    ConfigMap,
    Secret,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::Service => "Service",
            ResourceKind::Pod => "Pod",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Secret => "Secret",
        };
        f.write_str(name)
    }
}

/// Watch verb, mirroring what the cluster API reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Add,
    Modify,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verb::Add => "ADD",
            Verb::Modify => "MODIFY",
            Verb::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// One item on the fan-in channel: a resource change, a watch failure, or the
/// synthetic periodic flush command.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Namespace(Verb, String),
    Service(Verb, Service),
    Pod(Verb, Pod),
    Ingress(Verb, Ingress),
    ConfigMap(Verb, ConfigMap),
    Secret(Verb, Secret),
    WatchError(ResourceKind, String),
    Command,
}

impl SyncEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::Namespace(..) => "Namespace",
            SyncEvent::Service(..) => "Service",
            SyncEvent::Pod(..) => "Pod",
            SyncEvent::Ingress(..) => "Ingress",
            SyncEvent::ConfigMap(..) => "ConfigMap",
            SyncEvent::Secret(..) => "Secret",
            SyncEvent::WatchError(..) => "Error",
            SyncEvent::Command => "Command",
        }
    }
}

/// Derives ADD vs MODIFY verbs from kube's Apply events.
///
/// The watcher reports every upsert as Apply; downstream wants the classic
/// watch verbs, so each stream tracks the keys it has already delivered.
#[derive(Debug, Default)]
pub struct VerbTracker {
    seen: HashSet<String>,
}

impl VerbTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, key: &str) -> Verb {
        if self.seen.insert(key.to_string()) {
            Verb::Add
        } else {
            Verb::Modify
        }
    }

    pub fn delete(&mut self, key: &str) -> Verb {
        self.seen.remove(key);
        Verb::Delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_apply_is_add() {
        let mut tracker = VerbTracker::new();
        assert_eq!(tracker.apply("default/web"), Verb::Add);
        assert_eq!(tracker.apply("default/web"), Verb::Modify);
        assert_eq!(tracker.apply("default/api"), Verb::Add);
    }

    #[test]
    fn test_delete_resets_tracking() {
        let mut tracker = VerbTracker::new();
        tracker.apply("default/web");
        assert_eq!(tracker.delete("default/web"), Verb::Delete);
        assert_eq!(
            tracker.apply("default/web"),
            Verb::Add,
            "re-created object must surface as ADD again"
        );
    }
}
