//! Cached relationship lookups such as `ancestor_matches(window)`.
//!
//! Each distinct (node, relationship, condition) key gets one watcher. The watcher
//! subscribes to whatever its last computation read and notifies its key only when
//! the found node changes. Watchers nobody subscribes to anymore are dropped.
//!
//! Ancestor and descendant lookups chain through the watchers of neighbouring nodes.
//! Past `max_evaluation_depth` nested watchers the rest of the chain is walked
//! directly instead, and the reader subscribes to what that walk read.

use super::dependency::{DependencyKey, DependencySet, PropertyKey};
use super::evaluator::evaluate;
use super::node::NodeId;
use super::subscription::{Subscriber, SubscriptionSet};
use super::tree::{Tree, WorkItem};
use super::value::Value;
use crate::parser::Expression;
use crate::relationship::Relationship;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub(crate) struct Watcher {
    value: Value,
    subscriptions: SubscriptionSet,
}

impl Tree {
    /// Record a dependency on the relationship key and return its current value,
    /// creating the watcher on first use.
    pub(crate) fn watch_relationship(
        &mut self,
        node: NodeId,
        relationship: Relationship,
        condition: Arc<Expression>,
        dependencies: &mut DependencySet,
    ) -> Value {
        let key = DependencyKey::relationship(node, relationship, condition);
        if let Some(watcher) = self.watchers.get(&key) {
            dependencies.insert(key);
            return watcher.value.clone();
        }
        if self.depth >= self.config().max_evaluation_depth {
            return self.walk_uncached(key, dependencies);
        }
        dependencies.insert(key.clone());
        let Some((value, watched)) = self.compute_guarded(&key) else {
            return Value::Undefined;
        };
        let mut watcher = Watcher {
            value: value.clone(),
            subscriptions: SubscriptionSet::default(),
        };
        let orphaned = watcher.subscriptions.reconcile(
            &mut self.subscriptions,
            &Subscriber::Watcher(key.clone()),
            &watched,
        );
        trace!(%key, %value, "relationship watcher created");
        self.watchers.insert(key, watcher);
        self.dispose_orphans(orphaned);
        value
    }

    /// Recompute a watcher after something it read changed.
    pub(crate) fn refresh_watcher(&mut self, key: &DependencyKey) -> bool {
        if !self.watchers.contains_key(key) {
            return false;
        }
        let Some((value, watched)) = self.compute_guarded(key) else {
            return false;
        };
        let Some(watcher) = self.watchers.get_mut(key) else {
            // Removed while computing, nothing will subscribe to what it created
            self.dispose_orphans(watched.into_iter().collect());
            return false;
        };
        let orphaned = watcher.subscriptions.reconcile(
            &mut self.subscriptions,
            &Subscriber::Watcher(key.clone()),
            &watched,
        );
        let changed = watcher.value != value;
        if changed {
            trace!(%key, from = %watcher.value, to = %value, "relationship changed");
            watcher.value = value;
            self.notify(key);
        }
        self.dispose_orphans(orphaned);
        true
    }

    /// `None` when the lookup refers to itself.
    fn compute_guarded(&mut self, key: &DependencyKey) -> Option<(Value, DependencySet)> {
        let PropertyKey::Relationship {
            relationship,
            condition,
        } = &key.property
        else {
            return None;
        };
        if !self.computing.insert(key.clone()) {
            warn!(%key, "relationship lookup depends on itself");
            return None;
        }
        self.depth += 1;
        let mut watched = DependencySet::new();
        let value = self.compute_relationship(key.node, *relationship, condition, &mut watched);
        self.depth -= 1;
        self.computing.remove(key);
        watched.shift_remove(key);
        Some((value, watched))
    }

    /// Resolve a lookup without creating watchers for it or for the nodes it passes.
    /// Everything read lands in `dependencies`, so the reader is still notified.
    fn walk_uncached(&mut self, key: DependencyKey, dependencies: &mut DependencySet) -> Value {
        let PropertyKey::Relationship {
            relationship,
            condition,
        } = &key.property
        else {
            return Value::Undefined;
        };
        if !self.computing.insert(key.clone()) {
            warn!(%key, "relationship lookup depends on itself");
            dependencies.insert(key.clone());
            return Value::Undefined;
        }
        debug!(%key, depth = self.depth, "walking relationship lookup without caching");
        let value = match relationship {
            Relationship::Ancestor => {
                let mut current = key.node;
                loop {
                    let Some(parent) = self.parent_of(current, dependencies) else {
                        break Value::Undefined;
                    };
                    if self.matches(parent, condition, dependencies) {
                        break Value::NodeRef(parent);
                    }
                    current = parent;
                }
            }
            Relationship::Descendant => {
                let mut pending = self.children_of(key.node, dependencies);
                pending.reverse();
                loop {
                    let Some(candidate) = pending.pop() else {
                        break Value::Undefined;
                    };
                    if self.matches(candidate, condition, dependencies) {
                        break Value::NodeRef(candidate);
                    }
                    let children = self.children_of(candidate, dependencies);
                    pending.extend(children.into_iter().rev());
                }
            }
            other => self.compute_relationship(key.node, *other, condition, dependencies),
        };
        self.computing.remove(&key);
        value
    }

    fn compute_relationship(
        &mut self,
        node: NodeId,
        relationship: Relationship,
        condition: &Arc<Expression>,
        dependencies: &mut DependencySet,
    ) -> Value {
        match relationship {
            Relationship::Parent => match self.parent_of(node, dependencies) {
                Some(parent) if self.matches(parent, condition, dependencies) => {
                    Value::NodeRef(parent)
                }
                _ => Value::Undefined,
            },
            Relationship::Ancestor => {
                let Some(parent) = self.parent_of(node, dependencies) else {
                    return Value::Undefined;
                };
                if self.matches(parent, condition, dependencies) {
                    return Value::NodeRef(parent);
                }
                self.watch_relationship(parent, Relationship::Ancestor, condition.clone(), dependencies)
            }
            Relationship::Child => {
                for child in self.children_of(node, dependencies) {
                    if self.matches(child, condition, dependencies) {
                        return Value::NodeRef(child);
                    }
                }
                Value::Undefined
            }
            Relationship::Descendant => {
                // Pre-order: a child comes before its own descendants
                for child in self.children_of(node, dependencies) {
                    if self.matches(child, condition, dependencies) {
                        return Value::NodeRef(child);
                    }
                    let found = self.watch_relationship(
                        child,
                        Relationship::Descendant,
                        condition.clone(),
                        dependencies,
                    );
                    if !found.is_undefined() {
                        return found;
                    }
                }
                Value::Undefined
            }
            Relationship::PreviousSibling | Relationship::NextSibling => {
                match self.sibling(node, relationship, dependencies) {
                    Some(sibling) if self.matches(sibling, condition, dependencies) => {
                        Value::NodeRef(sibling)
                    }
                    _ => Value::Undefined,
                }
            }
        }
    }

    /// Evaluate `condition` in the candidate's context.
    fn matches(
        &mut self,
        candidate: NodeId,
        condition: &Expression,
        dependencies: &mut DependencySet,
    ) -> bool {
        evaluate(condition, candidate, self, dependencies).is_truthy()
    }

    /// Remove every watcher whose key satisfies `predicate`. Returns keys left
    /// without subscribers.
    pub(crate) fn remove_watchers_where(
        &mut self,
        predicate: impl Fn(&DependencyKey) -> bool,
    ) -> Vec<DependencyKey> {
        let keys: Vec<DependencyKey> = self
            .watchers
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        keys.iter()
            .flat_map(|key| self.remove_watcher(key))
            .collect()
    }

    fn remove_watcher(&mut self, key: &DependencyKey) -> Vec<DependencyKey> {
        let Some(mut watcher) = self.watchers.remove(key) else {
            return Vec::new();
        };
        self.queue.shift_remove(&WorkItem::Watcher(key.clone()));
        // Remaining readers have to look again
        self.notify(key);
        trace!(%key, "relationship watcher removed");
        watcher.subscriptions.dispose(&mut self.subscriptions)
    }

    /// Drop watchers whose key lost its last subscriber, cascading into the
    /// watchers they were reading.
    pub(crate) fn dispose_orphans(&mut self, mut orphaned: Vec<DependencyKey>) {
        while let Some(key) = orphaned.pop() {
            if matches!(key.property, PropertyKey::Relationship { .. })
                && self.subscriptions.subscriber_count(&key) == 0
            {
                orphaned.extend(self.remove_watcher(&key));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::{BasicNode, EngineConfig, NodeId, Tree, Value};

    fn add(tree: &mut Tree, parent: NodeId, kind: &str) -> NodeId {
        let node = tree.create_node(BasicNode::with_kind(kind));
        let index = tree.children(parent).len();
        tree.add_child(parent, index, node).unwrap();
        node
    }

    #[test]
    fn ancestor_lookup_follows_reparenting() {
        let mut tree = Tree::new(BasicNode::with_kind("root"));
        tree.load_rules("test.rules", "owner: ancestor_matches(panel).title;")
            .unwrap();
        let root = tree.root();
        let panel = add(&mut tree, root, "panel");
        let group = add(&mut tree, panel, "group");
        let leaf = add(&mut tree, group, "leaf");
        tree.set_property(panel, "title", Value::from("Settings"));
        tree.flush();
        assert_eq!(tree.declaration(leaf, "owner"), Value::from("Settings"));
        assert_eq!(tree.declaration(group, "owner"), Value::from("Settings"));
        assert_eq!(tree.declaration(panel, "owner"), Value::Undefined);

        tree.set_property(panel, "title", Value::from("Display"));
        tree.flush();
        assert_eq!(tree.declaration(leaf, "owner"), Value::from("Display"));

        let moved = tree.remove_child(group, 0).unwrap();
        tree.add_child(root, 1, moved).unwrap();
        tree.flush();
        assert_eq!(tree.declaration(leaf, "owner"), Value::Undefined);
    }

    #[test]
    fn descendant_lookup_is_pre_order() {
        let mut tree = Tree::new(BasicNode::with_kind("root"));
        tree.load_rules("test.rules", "found: descendant_matches(mark).name;")
            .unwrap();
        let root = tree.root();
        let first = add(&mut tree, root, "box");
        let nested = add(&mut tree, first, "mark");
        let second = add(&mut tree, root, "mark");
        tree.set_property(nested, "name", Value::from("nested"));
        tree.set_property(second, "name", Value::from("second"));
        tree.flush();
        assert_eq!(tree.declaration(root, "found"), Value::from("nested"));

        tree.remove_child(first, 0).unwrap();
        tree.flush();
        assert_eq!(tree.declaration(root, "found"), Value::from("second"));
    }

    #[test]
    fn unused_watchers_are_dropped() {
        let mut tree = Tree::new(BasicNode::with_kind("root"));
        tree.load_rules("test.rules", "if(searching) { hit: descendant_matches(mark); }")
            .unwrap();
        let root = tree.root();
        let inner = add(&mut tree, root, "box");
        add(&mut tree, inner, "mark");
        tree.set_property(root, "searching", Value::from(true));
        tree.flush();
        assert!(tree.watcher_count() > 0);
        assert!(!tree.declaration(root, "hit").is_undefined());

        tree.set_property(root, "searching", Value::from(false));
        tree.flush();
        assert_eq!(tree.watcher_count(), 0);
        assert_eq!(tree.declaration(root, "hit"), Value::Undefined);
    }

    #[test]
    fn chains_past_the_depth_limit_are_walked_directly() {
        let config = EngineConfig {
            max_evaluation_depth: 2,
            ..EngineConfig::default()
        };
        let mut tree = Tree::with_config(config, BasicNode::with_kind("root"));
        tree.load_rules(
            "test.rules",
            "if(root) { hit: descendant_matches(marked); } if(leaf) { owner: ancestor_matches(marked); }",
        )
        .unwrap();
        let root = tree.root();
        let mut chain = vec![root];
        for _ in 0..6 {
            let parent = *chain.last().unwrap();
            chain.push(add(&mut tree, parent, "box"));
        }
        let leaf = add(&mut tree, chain[6], "leaf");
        tree.flush();
        assert_eq!(tree.declaration(leaf, "owner"), Value::Undefined);
        assert_eq!(tree.declaration(root, "hit"), Value::Undefined);

        tree.set_property(chain[1], "marked", Value::from(true));
        tree.flush();
        assert_eq!(tree.declaration(leaf, "owner"), Value::NodeRef(chain[1]));
        assert_eq!(tree.declaration(root, "hit"), Value::NodeRef(chain[1]));

        tree.set_property(chain[1], "marked", Value::Undefined);
        tree.set_property(chain[5], "marked", Value::from(true));
        tree.flush();
        assert_eq!(tree.declaration(leaf, "owner"), Value::NodeRef(chain[5]));
        assert_eq!(tree.declaration(root, "hit"), Value::NodeRef(chain[5]));
    }

    #[test]
    fn detaching_removes_watchers_on_the_subtree() {
        let mut tree = Tree::new(BasicNode::with_kind("root"));
        tree.load_rules("test.rules", "child { in_panel: parent_matches(panel); }")
            .unwrap();
        let root = tree.root();
        let panel = add(&mut tree, root, "panel");
        let item = add(&mut tree, panel, "item");
        tree.flush();
        assert_eq!(tree.declaration(item, "in_panel"), Value::NodeRef(panel));

        tree.remove_child(root, 0).unwrap();
        tree.flush();
        assert_eq!(tree.declaration(item, "in_panel"), Value::Undefined);
        // Only the root's own `parent_matches(true)` lookup is left
        assert_eq!(tree.watcher_count(), 1);
    }
}
