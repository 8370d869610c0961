use super::arena::{Arena, SlotId};
use super::dependency::{DependencyKey, DependencySet};
use super::node::NodeId;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Who gets queued when a key changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subscriber {
    /// Re-run the node's rule pass.
    Node(NodeId),
    /// Recompute the relationship watcher stored under this key.
    Watcher(DependencyKey),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SubscriptionId(SlotId);

struct Subscription {
    key: DependencyKey,
    subscriber: Subscriber,
}

/// Routing table from dependency keys to their subscribers.
#[derive(Default)]
pub struct SubscriptionTable {
    subscriptions: Arena<Subscription>,
    by_key: HashMap<DependencyKey, SmallVec<[SubscriptionId; 2]>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, key: DependencyKey, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.subscriptions.insert(Subscription {
            key: key.clone(),
            subscriber,
        }));
        self.by_key.entry(key).or_default().push(id);
        id
    }

    /// Disposing an already disposed subscription does nothing.
    /// Returns the key when its last subscriber went away.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Option<DependencyKey> {
        let subscription = self.subscriptions.remove(id.0)?;
        let ids = self.by_key.get_mut(&subscription.key)?;
        ids.retain(|existing| *existing != id);
        if ids.is_empty() {
            self.by_key.remove(&subscription.key);
            Some(subscription.key)
        } else {
            None
        }
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscriptions.is_valid(id.0)
    }

    pub fn subscribers<'a>(&'a self, key: &DependencyKey) -> impl Iterator<Item = &'a Subscriber> {
        self.by_key
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.subscriptions.get(id.0))
            .map(|subscription| &subscription.subscriber)
    }

    pub fn subscriber_count(&self, key: &DependencyKey) -> usize {
        self.by_key.get(key).map_or(0, |ids| ids.len())
    }

    /// Keys with at least one subscriber.
    pub fn keys(&self) -> impl Iterator<Item = &DependencyKey> {
        self.by_key.keys()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

/// The subscriptions one subscriber currently holds, one per key.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    handles: HashMap<DependencyKey, SubscriptionId>,
}

impl SubscriptionSet {
    /// Subscribe to keys that are newly wanted, then drop the ones no longer wanted.
    /// Returns keys left without any subscriber.
    pub fn reconcile(
        &mut self,
        table: &mut SubscriptionTable,
        subscriber: &Subscriber,
        wanted: &DependencySet,
    ) -> Vec<DependencyKey> {
        for key in wanted {
            if let Entry::Vacant(entry) = self.handles.entry(key.clone()) {
                entry.insert(table.subscribe(key.clone(), subscriber.clone()));
            }
        }
        let stale: Vec<DependencyKey> = self
            .handles
            .keys()
            .filter(|key| !wanted.contains(*key))
            .cloned()
            .collect();
        stale
            .into_iter()
            .filter_map(|key| {
                let id = self.handles.remove(&key)?;
                table.unsubscribe(id)
            })
            .collect()
    }

    /// Drop every subscription. Returns keys left without any subscriber.
    pub fn dispose(&mut self, table: &mut SubscriptionTable) -> Vec<DependencyKey> {
        self.handles
            .drain()
            .filter_map(|(_, id)| table.unsubscribe(id))
            .collect()
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.handles.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(index: u32) -> NodeId {
        NodeId(SlotId {
            index,
            generation: 0,
        })
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let mut table = SubscriptionTable::new();
        let key = DependencyKey::named(node(0), "color");
        let first = table.subscribe(key.clone(), Subscriber::Node(node(1)));
        let second = table.subscribe(key.clone(), Subscriber::Node(node(2)));
        assert_eq!(table.subscriber_count(&key), 2);

        assert_eq!(table.unsubscribe(first), None);
        assert_eq!(table.unsubscribe(first), None);
        assert!(!table.is_subscribed(first));
        assert_eq!(
            table.subscribers(&key).collect::<Vec<_>>(),
            vec![&Subscriber::Node(node(2))]
        );

        assert_eq!(table.unsubscribe(second), Some(key.clone()));
        assert_eq!(table.subscriber_count(&key), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn reconcile_keeps_unchanged_subscriptions() {
        let mut table = SubscriptionTable::new();
        let mut set = SubscriptionSet::default();
        let subscriber = Subscriber::Node(node(9));
        let a = DependencyKey::named(node(0), "a");
        let b = DependencyKey::named(node(0), "b");
        let c = DependencyKey::children(node(0));

        let orphaned = set.reconcile(&mut table, &subscriber, &[a.clone(), b.clone()].into());
        assert!(orphaned.is_empty());
        assert_eq!(table.len(), 2);

        let orphaned = set.reconcile(&mut table, &subscriber, &[b.clone(), c.clone()].into());
        assert_eq!(orphaned, vec![a.clone()]);
        assert!(set.contains(&b) && set.contains(&c) && !set.contains(&a));
        assert_eq!(table.len(), 2);

        let mut orphaned = set.dispose(&mut table);
        orphaned.sort_by_key(|key| key.to_string());
        assert_eq!(orphaned.len(), 2);
        assert!(table.is_empty());
        assert!(set.is_empty());
    }

    #[test]
    fn shared_key_is_not_orphaned_while_subscribed_elsewhere() {
        let mut table = SubscriptionTable::new();
        let key = DependencyKey::parent(node(3));
        let wanted: DependencySet = [key.clone()].into();
        let mut first = SubscriptionSet::default();
        let mut second = SubscriptionSet::default();
        first.reconcile(&mut table, &Subscriber::Node(node(1)), &wanted);
        second.reconcile(&mut table, &Subscriber::Node(node(2)), &wanted);

        assert!(first.dispose(&mut table).is_empty());
        assert_eq!(second.dispose(&mut table), vec![key]);
    }
}
