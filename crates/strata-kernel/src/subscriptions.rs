//! Resource subscriptions with parent-directory propagation.
//!
//! Each connected party gets an opaque [`SubscriberId`] and an unbounded
//! receiver. `notify` fans a mutation's change set out to every subscriber
//! watching a changed key or that key's immediate parent directory.
//!
//! Delivery is fire-and-forget. A subscriber whose receiver is gone is pruned
//! after the pass; nobody else is held up and the caller never sees an error.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::store::NodePath;

/// Opaque handle identifying one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Notification that a watched address changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUpdate {
    /// The watched address, which is either the changed key or its parent.
    pub path: NodePath,
}

#[derive(Debug)]
struct Subscriber {
    tx: mpsc::UnboundedSender<ResourceUpdate>,
    interests: HashSet<NodePath>,
}

/// Registry of interest sets, one per subscriber.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    subscribers: DashMap<SubscriberId, Subscriber>,
}

/// Shared handle to a subscription registry.
pub type SharedSubscriptionRegistry = Arc<SubscriptionRegistry>;

/// Create a new shared subscription registry.
pub fn shared_subscription_registry() -> SharedSubscriptionRegistry {
    Arc::new(SubscriptionRegistry::new())
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber with an empty interest set.
    pub fn connect(&self) -> (SubscriberId, mpsc::UnboundedReceiver<ResourceUpdate>) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(
            id,
            Subscriber {
                tx,
                interests: HashSet::new(),
            },
        );
        debug!(subscriber = %id, "subscriber connected");
        (id, rx)
    }

    /// Drop a subscriber and everything it watched.
    pub fn disconnect(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "subscriber disconnected");
        }
        removed
    }

    /// Add `path` to the subscriber's interest set.
    ///
    /// Returns false when the subscriber is unknown or already watching.
    pub fn subscribe(&self, id: SubscriberId, path: NodePath) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(mut sub) => {
                debug!(subscriber = %id, path = %path, "subscribe");
                sub.interests.insert(path)
            }
            None => {
                warn!(subscriber = %id, path = %path, "subscribe from unknown subscriber");
                false
            }
        }
    }

    /// Remove `path` from the subscriber's interest set.
    pub fn unsubscribe(&self, id: SubscriberId, path: &NodePath) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(mut sub) => {
                debug!(subscriber = %id, path = %path, "unsubscribe");
                sub.interests.remove(path)
            }
            None => false,
        }
    }

    /// The subscriber's current interests, sorted.
    pub fn interests(&self, id: SubscriberId) -> Vec<NodePath> {
        let mut paths: Vec<NodePath> = self
            .subscribers
            .get(&id)
            .map(|sub| sub.interests.iter().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Notify watchers of each changed key and of its parent directory.
    ///
    /// Each subscriber hears at most once per watched address per call.
    /// Returns the number of updates delivered.
    pub fn notify(&self, changed: &[NodePath]) -> usize {
        if changed.is_empty() {
            return 0;
        }

        let mut targets: BTreeSet<&NodePath> = BTreeSet::new();
        let parents: Vec<NodePath> = changed.iter().filter_map(NodePath::parent).collect();
        targets.extend(changed.iter());
        targets.extend(parents.iter());

        let mut delivered = 0;
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            let id = *entry.key();
            for path in targets.iter().filter(|p| entry.interests.contains(**p)) {
                let update = ResourceUpdate {
                    path: (*path).clone(),
                };
                if entry.tx.send(update).is_err() {
                    warn!(subscriber = %id, path = %path, "subscriber gone, dropping");
                    dead.push(id);
                    break;
                }
                delivered += 1;
            }
        }

        for id in dead {
            self.subscribers.remove(&id);
        }
        debug!(changed = changed.len(), delivered, "notified subscribers");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(raw: &str) -> NodePath {
        NodePath::parse(raw).unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ResourceUpdate>) -> Vec<NodePath> {
        let mut out = Vec::new();
        while let Ok(update) = rx.try_recv() {
            out.push(update.path);
        }
        out
    }

    #[test]
    fn test_exact_address_notification() {
        let registry = SubscriptionRegistry::new();
        let (id, mut rx) = registry.connect();
        assert!(registry.subscribe(id, p("/a.txt")));

        assert_eq!(registry.notify(&[p("/a.txt")]), 1);
        assert_eq!(drain(&mut rx), vec![p("/a.txt")]);
    }

    #[test]
    fn test_parent_propagation() {
        let registry = SubscriptionRegistry::new();
        let (id, mut rx) = registry.connect();
        registry.subscribe(id, p("/a/"));

        registry.notify(&[p("/a/new.txt")]);
        assert_eq!(drain(&mut rx), vec![p("/a/")]);

        // Grandchildren do not propagate.
        registry.notify(&[p("/a/b/deep.txt")]);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_root_level_parent_is_root() {
        let registry = SubscriptionRegistry::new();
        let (id, mut rx) = registry.connect();
        registry.subscribe(id, NodePath::root());

        registry.notify(&[p("/file.txt")]);
        assert_eq!(drain(&mut rx), vec![NodePath::root()]);

        // The root itself has no parent to propagate to.
        registry.notify(&[NodePath::root()]);
        assert_eq!(drain(&mut rx), vec![NodePath::root()]);
    }

    #[test]
    fn test_dedup_per_subscriber_and_address() {
        let registry = SubscriptionRegistry::new();
        let (id, mut rx) = registry.connect();
        registry.subscribe(id, p("/x/"));

        // Cascade delete of /x/ reports the dir and both children.
        registry.notify(&[p("/x/"), p("/x/y.txt"), p("/x/z/")]);
        assert_eq!(drain(&mut rx), vec![p("/x/")]);
    }

    #[test]
    fn test_unsubscribe_and_disconnect() {
        let registry = SubscriptionRegistry::new();
        let (id, mut rx) = registry.connect();
        registry.subscribe(id, p("/a.txt"));
        assert!(registry.unsubscribe(id, &p("/a.txt")));
        assert!(!registry.unsubscribe(id, &p("/a.txt")));
        registry.notify(&[p("/a.txt")]);
        assert!(drain(&mut rx).is_empty());

        assert!(registry.disconnect(id));
        assert!(!registry.subscribe(id, p("/a.txt")));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn test_dead_subscriber_does_not_block_others() {
        let registry = SubscriptionRegistry::new();
        let (gone, gone_rx) = registry.connect();
        let (alive, mut alive_rx) = registry.connect();
        registry.subscribe(gone, p("/doc"));
        registry.subscribe(alive, p("/doc"));
        drop(gone_rx);

        assert_eq!(registry.notify(&[p("/doc")]), 1);
        assert_eq!(drain(&mut alive_rx), vec![p("/doc")]);
        assert_eq!(registry.subscriber_count(), 1);
        assert!(registry.interests(gone).is_empty());
    }
}
