use super::arena::Arena;
use super::behavior::{NodeBehavior, NodeContext};
use super::command::{Poster, TreeCommand};
use super::config::EngineConfig;
use super::dependency::{Declarations, DependencyKey, DependencySet, STOP_PROPERTY};
use super::error::TreeError;
use super::evaluator::{EvaluationHost, evaluate};
use super::node::{Node, NodeId, NodeState};
use super::subscription::{Subscriber, SubscriptionId, SubscriptionTable};
use super::value::Value;
use super::watcher::Watcher;
use crate::parser::{self, Expression, RulesError, Rule};
use crate::relationship::Relationship;
use futures_channel::mpsc::{self, UnboundedReceiver};
use indexmap::IndexSet;
use num_bigint::BigInt;
use std::collections::{HashMap, HashSet};
use std::iter;
use std::mem;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Entry in the work queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum WorkItem {
    Node(NodeId),
    Watcher(DependencyKey),
}

/// What one [`Tree::flush`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub node_passes: usize,
    pub watcher_refreshes: usize,
    pub rounds: usize,
    /// `false` when the round limit stopped processing with work still queued.
    pub settled: bool,
}

/// A tree of nodes with rules evaluated against every attached, alive node.
///
/// All mutation happens through `&mut self` on one thread. Other threads post
/// [`TreeCommand`]s through a [`Poster`]; they are applied during [`Tree::flush`].
pub struct Tree {
    config: EngineConfig,
    pub(crate) nodes: Arena<Node>,
    root: NodeId,
    rules: Arc<[Rule]>,
    pub(crate) subscriptions: SubscriptionTable,
    pub(crate) watchers: HashMap<DependencyKey, Watcher>,
    /// Relationship keys being computed right now, to catch self-reference.
    pub(crate) computing: HashSet<DependencyKey>,
    pub(crate) depth: usize,
    /// Deduplicated, in arrival order.
    pub(crate) queue: IndexSet<WorkItem>,
    inbox: UnboundedReceiver<TreeCommand>,
    poster: Poster,
}

impl Tree {
    pub fn new(root: impl NodeBehavior + 'static) -> Self {
        Self::with_config(EngineConfig::default(), root)
    }

    pub fn with_config(config: EngineConfig, root: impl NodeBehavior + 'static) -> Self {
        let (sender, inbox) = mpsc::unbounded();
        let mut nodes = Arena::new();
        let root = NodeId(nodes.insert(Node::new(Box::new(root), NodeState::Pending)));
        let mut queue = IndexSet::new();
        queue.insert(WorkItem::Node(root));
        Self {
            config,
            nodes,
            root,
            rules: Arc::from(Vec::new()),
            subscriptions: SubscriptionTable::new(),
            watchers: HashMap::new(),
            computing: HashSet::new(),
            depth: 0,
            queue,
            inbox,
            poster: Poster::new(sender),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn poster(&self) -> Poster {
        self.poster.clone()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Replace the rule list. Every attached, alive node gets a fresh pass.
    pub fn set_rules(&mut self, rules: Vec<Rule>) {
        debug!(rules = rules.len(), "rules replaced");
        self.rules = rules.into();
        let attached: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.state.is_attached() && node.alive)
            .map(|(slot, _)| NodeId(slot))
            .collect();
        for node in attached {
            self.queue.insert(WorkItem::Node(node));
        }
    }

    /// Parse, flatten and install a rule file.
    pub fn load_rules(&mut self, file_name: &str, source_code: &str) -> Result<(), RulesError> {
        let rules = parser::load_rules(file_name, source_code)?;
        self.set_rules(rules);
        Ok(())
    }

    /// Create an unattached node.
    pub fn create_node(&mut self, behavior: impl NodeBehavior + 'static) -> NodeId {
        self.create_boxed_node(Box::new(behavior))
    }

    pub fn create_boxed_node(&mut self, behavior: Box<dyn NodeBehavior>) -> NodeId {
        let node = NodeId(self.nodes.insert(Node::new(behavior, NodeState::Unattached)));
        trace!(%node, "node created");
        node
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.is_valid(node.0)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0)?.parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    pub fn state(&self, node: NodeId) -> Option<NodeState> {
        Some(self.nodes.get(node.0)?.state)
    }

    pub fn is_alive(&self, node: NodeId) -> bool {
        self.nodes.get(node.0).is_some_and(|node| node.alive)
    }

    pub fn behavior(&self, node: NodeId) -> Option<&dyn NodeBehavior> {
        Some(self.nodes.get(node.0)?.behavior.as_ref())
    }

    pub fn behavior_mut(&mut self, node: NodeId) -> Option<&mut (dyn NodeBehavior + 'static)> {
        Some(self.nodes.get_mut(node.0)?.behavior.as_mut())
    }

    pub fn property(&self, node: NodeId, name: &str) -> Value {
        self.nodes
            .get(node.0)
            .and_then(|node| node.properties.get(name))
            .cloned()
            .unwrap_or_default()
    }

    /// Declarations from the node's last rule pass.
    pub fn declarations(&self, node: NodeId) -> Option<&Declarations> {
        Some(&self.nodes.get(node.0)?.declarations)
    }

    pub fn declaration(&self, node: NodeId, name: &str) -> Value {
        self.declarations(node)
            .and_then(|declarations| declarations.get(name))
            .cloned()
            .unwrap_or_default()
    }

    /// What the node's last rule pass read.
    pub fn dependencies(&self, node: NodeId) -> Option<&DependencySet> {
        Some(&self.nodes.get(node.0)?.dependencies)
    }

    /// Rule passes the node has run since it was created.
    pub fn pass_count(&self, node: NodeId) -> u64 {
        self.nodes.get(node.0).map_or(0, |node| node.passes)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Applies any posted commands, then reports whether work is queued.
    pub fn is_idle(&mut self) -> bool {
        self.drain_inbox();
        self.queue.is_empty()
    }

    fn ancestors_and_self(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        iter::successors(Some(node), |node| self.parent(*node))
    }

    /// The node and all its descendants, parents before children.
    fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut members = Vec::new();
        let mut stack = vec![node];
        while let Some(member) = stack.pop() {
            members.push(member);
            stack.extend(self.children(member).iter().rev());
        }
        members
    }

    /// Insert `child` at `index` among the children of `parent`.
    pub fn add_child(&mut self, parent: NodeId, index: usize, child: NodeId) -> Result<(), TreeError> {
        if child == self.root {
            return Err(TreeError::Root);
        }
        let child_node = self.nodes.get(child.0).ok_or(TreeError::StaleNode(child))?;
        if let Some(existing) = child_node.parent {
            return Err(TreeError::AlreadyAttached {
                child,
                parent: existing,
            });
        }
        let parent_node = self.nodes.get(parent.0).ok_or(TreeError::StaleNode(parent))?;
        let len = parent_node.children.len();
        if index > len {
            return Err(TreeError::IndexOutOfRange { index, len });
        }
        let attached = parent_node.state.is_attached();
        if self.ancestors_and_self(parent).any(|ancestor| ancestor == child) {
            return Err(TreeError::Cycle { parent, child });
        }

        if let Some(parent_node) = self.nodes.get_mut(parent.0) {
            parent_node.children.insert(index, child);
        }
        if let Some(child_node) = self.nodes.get_mut(child.0) {
            child_node.parent = Some(parent);
        }
        trace!(%parent, %child, index, "child added");
        self.notify(&DependencyKey::children(parent));
        self.notify(&DependencyKey::parent(child));
        if attached {
            self.attach_subtree(child);
        }
        Ok(())
    }

    /// Detach the child at `index`. The detached subtree keeps its structure and
    /// properties but loses its declarations, subscriptions and watchers.
    pub fn remove_child(&mut self, parent: NodeId, index: usize) -> Result<NodeId, TreeError> {
        let parent_node = self
            .nodes
            .get_mut(parent.0)
            .ok_or(TreeError::StaleNode(parent))?;
        let len = parent_node.children.len();
        if index >= len {
            return Err(TreeError::IndexOutOfRange { index, len });
        }
        let child = parent_node.children.remove(index);
        let was_attached = parent_node.state.is_attached();
        if let Some(child_node) = self.nodes.get_mut(child.0) {
            child_node.parent = None;
        }
        trace!(%parent, %child, index, "child removed");
        self.notify(&DependencyKey::children(parent));
        self.notify(&DependencyKey::parent(child));
        if was_attached {
            self.detach_subtree(child);
        }
        Ok(child)
    }

    /// Destroy an unattached node and its whole subtree. Handles to them go stale.
    pub fn destroy_node(&mut self, node: NodeId) -> Result<(), TreeError> {
        if node == self.root {
            return Err(TreeError::Root);
        }
        let slot = self.nodes.get(node.0).ok_or(TreeError::StaleNode(node))?;
        if let Some(parent) = slot.parent {
            return Err(TreeError::StillAttached { node, parent });
        }
        let members = self.subtree(node);
        let destroyed: HashSet<NodeId> = members.iter().copied().collect();
        let mut orphaned = Vec::new();
        for member in &members {
            self.queue.shift_remove(&WorkItem::Node(*member));
            orphaned.extend(self.release_node(*member));
        }
        orphaned.extend(self.remove_watchers_where(|key| destroyed.contains(&key.node)));
        for member in &members {
            self.nodes.remove(member.0);
        }
        self.dispose_orphans(orphaned);

        // Whoever still reads these nodes through a reference sees them vanish
        let stale_keys: Vec<DependencyKey> = self
            .subscriptions
            .keys()
            .filter(|key| destroyed.contains(&key.node))
            .cloned()
            .collect();
        for key in &stale_keys {
            self.notify(key);
        }
        debug!(%node, nodes = members.len(), "subtree destroyed");
        Ok(())
    }

    /// Dead nodes keep their place in the tree but stop evaluating rules.
    pub fn set_alive(&mut self, node: NodeId, alive: bool) -> bool {
        let Some(slot) = self.nodes.get_mut(node.0) else {
            debug!(%node, alive, "ignoring liveness change for a destroyed node");
            return false;
        };
        if slot.alive == alive {
            return false;
        }
        slot.alive = alive;
        slot.behavior
            .alive_changed(&NodeContext::new(node, &self.poster), alive);
        let attached = slot.state.is_attached();
        if alive {
            if attached {
                slot.state = NodeState::Pending;
                self.queue.insert(WorkItem::Node(node));
            }
        } else {
            self.queue.shift_remove(&WorkItem::Node(node));
            let mut orphaned = self.release_node(node);
            orphaned.extend(self.remove_watchers_where(|key| key.node == node));
            self.dispose_orphans(orphaned);
        }
        trace!(%node, alive, "liveness changed");
        true
    }

    /// Store a property pushed in by the node's owner. `Undefined` removes it.
    /// Returns whether the value changed.
    pub fn set_property(&mut self, node: NodeId, name: impl Into<Arc<str>>, value: Value) -> bool {
        let name = name.into();
        let Some(slot) = self.nodes.get_mut(node.0) else {
            debug!(%node, %name, "ignoring property update for a destroyed node");
            return false;
        };
        if !slot.alive {
            debug!(%node, %name, "ignoring property update for a dead node");
            return false;
        }
        let previous = if value.is_undefined() {
            slot.properties.shift_remove(&name)
        } else {
            slot.properties.insert(name.clone(), value.clone())
        };
        if previous.unwrap_or_default() == value {
            return false;
        }
        self.notify(&DependencyKey::named(node, name));
        true
    }

    /// For behaviors that compute a property themselves: the value behind `name` changed.
    pub fn notify_property_changed(&mut self, node: NodeId, name: impl Into<Arc<str>>) {
        if !self.is_alive(node) {
            debug!(%node, "ignoring change notification for a destroyed or dead node");
            return;
        }
        self.notify(&DependencyKey::named(node, name));
    }

    /// Subscribe on behalf of a node implementation. The subscriber is queued like
    /// a rule reader whenever `key` is notified.
    pub fn subscribe(&mut self, key: DependencyKey, subscriber: Subscriber) -> SubscriptionId {
        self.subscriptions.subscribe(key, subscriber)
    }

    /// Unsubscribing twice does nothing.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        if let Some(orphaned) = self.subscriptions.unsubscribe(id) {
            self.dispose_orphans(vec![orphaned]);
        }
    }

    /// Queue everyone subscribed to `key`.
    pub(crate) fn notify(&mut self, key: &DependencyKey) {
        for subscriber in self.subscriptions.subscribers(key) {
            let item = match subscriber {
                Subscriber::Node(node) => WorkItem::Node(*node),
                Subscriber::Watcher(watcher) => WorkItem::Watcher(watcher.clone()),
            };
            self.queue.insert(item);
        }
    }

    fn attach_subtree(&mut self, node: NodeId) {
        for member in self.subtree(node) {
            if let Some(slot) = self.nodes.get_mut(member.0) {
                slot.state = NodeState::Pending;
                if slot.alive {
                    self.queue.insert(WorkItem::Node(member));
                }
            }
        }
    }

    fn detach_subtree(&mut self, node: NodeId) {
        let members = self.subtree(node);
        let detached: HashSet<NodeId> = members.iter().copied().collect();
        let mut orphaned = Vec::new();
        for member in &members {
            self.queue.shift_remove(&WorkItem::Node(*member));
            if let Some(slot) = self.nodes.get_mut(member.0) {
                slot.state = NodeState::Unattached;
            }
            orphaned.extend(self.release_node(*member));
        }
        orphaned.extend(self.remove_watchers_where(|key| detached.contains(&key.node)));
        self.dispose_orphans(orphaned);
        debug!(%node, nodes = members.len(), "subtree detached");
    }

    /// Drop what a node holds from its rule passes: subscriptions, dependencies and
    /// declarations. Returns keys left without subscribers.
    fn release_node(&mut self, node: NodeId) -> Vec<DependencyKey> {
        let Some(slot) = self.nodes.get_mut(node.0) else {
            return Vec::new();
        };
        let orphaned = slot.subscriptions.dispose(&mut self.subscriptions);
        slot.dependencies.clear();
        let cleared = mem::take(&mut slot.declarations);
        if !cleared.is_empty() {
            slot.behavior.declarations_changed(
                &NodeContext::new(node, &self.poster),
                &slot.declarations,
                &slot.dependencies,
            );
            for name in cleared.into_keys() {
                self.notify(&DependencyKey::named(node, name));
            }
        }
        orphaned
    }

    /// Apply posted commands without evaluating anything.
    fn drain_inbox(&mut self) {
        while let Ok(Some(command)) = self.inbox.try_next() {
            trace!(?command, "applying posted command");
            match command {
                TreeCommand::SetProperty { node, name, value } => {
                    self.set_property(node, name, value);
                }
                TreeCommand::PropertyChanged { node, name } => {
                    self.notify_property_changed(node, name);
                }
                TreeCommand::SetAlive { node, alive } => {
                    self.set_alive(node, alive);
                }
                TreeCommand::Run(task) => task(self),
            }
        }
    }

    /// Apply posted commands and process queued work in batches until nothing
    /// is left or the round limit is hit.
    pub fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        self.drain_inbox();
        while !self.queue.is_empty() {
            if report.rounds >= self.config.max_flush_rounds {
                warn!(
                    rounds = report.rounds,
                    pending = self.queue.len(),
                    "rules did not settle, leaving work queued"
                );
                return report;
            }
            report.rounds += 1;
            let batch = mem::take(&mut self.queue);
            trace!(round = report.rounds, items = batch.len(), "processing batch");
            for item in batch {
                // The pass about to run sees the latest state anyway
                self.queue.shift_remove(&item);
                match item {
                    WorkItem::Node(node) => {
                        if self.run_pass(node) {
                            report.node_passes += 1;
                        }
                    }
                    WorkItem::Watcher(key) => {
                        if self.refresh_watcher(&key) {
                            report.watcher_refreshes += 1;
                        }
                    }
                }
            }
            self.drain_inbox();
        }
        report.settled = true;
        report
    }

    /// Evaluate the rule list for one node and commit the result.
    fn run_pass(&mut self, node: NodeId) -> bool {
        match self.nodes.get(node.0) {
            Some(slot) if slot.alive && slot.state.is_attached() => {}
            _ => return false,
        }
        let rules = self.rules.clone();
        let mut declarations = Declarations::new();
        let mut dependencies = DependencySet::new();
        'rules: for rule in rules.iter() {
            if let Some(condition) = &rule.condition {
                if !evaluate(condition, node, self, &mut dependencies).is_truthy() {
                    continue;
                }
            }
            for declaration in &rule.declarations {
                // First match wins, except `stop` which every matching rule re-evaluates
                if &*declaration.property != STOP_PROPERTY
                    && declarations.contains_key(&declaration.property)
                {
                    continue;
                }
                let value = evaluate(&declaration.value, node, self, &mut dependencies);
                declarations.insert(declaration.property.clone(), value);
            }
            if declarations
                .get(STOP_PROPERTY)
                .is_some_and(Value::is_truthy)
            {
                break 'rules;
            }
        }
        self.commit_pass(node, declarations, dependencies);
        true
    }

    fn commit_pass(&mut self, node: NodeId, declarations: Declarations, dependencies: DependencySet) {
        let Some(slot) = self.nodes.get_mut(node.0) else {
            return;
        };
        slot.passes += 1;
        slot.state = NodeState::Settled;
        let changed = changed_names(&slot.declarations, &declarations);
        slot.declarations = declarations;
        let orphaned = slot.subscriptions.reconcile(
            &mut self.subscriptions,
            &Subscriber::Node(node),
            &dependencies,
        );
        slot.dependencies = dependencies;
        if !changed.is_empty() {
            trace!(%node, changed = changed.len(), "declarations changed");
            slot.behavior.declarations_changed(
                &NodeContext::new(node, &self.poster),
                &slot.declarations,
                &slot.dependencies,
            );
            for name in changed {
                self.notify(&DependencyKey::named(node, name));
            }
        }
        self.dispose_orphans(orphaned);
    }

    /// Identifiers every node answers, after declarations and properties.
    fn engine_identifier(
        &self,
        node: NodeId,
        name: &str,
        dependencies: &mut DependencySet,
    ) -> Option<Value> {
        let slot = self.nodes.get(node.0)?;
        let value = match name {
            "this" => Value::NodeRef(node),
            "root" => Value::NodeRef(self.root),
            "is_root" => Value::Boolean(node == self.root),
            "parent" => {
                dependencies.insert(DependencyKey::parent(node));
                slot.parent.map_or(Value::Undefined, Value::NodeRef)
            }
            "child_count" => {
                dependencies.insert(DependencyKey::children(node));
                Value::Integer(BigInt::from(slot.children.len()))
            }
            "first_child" => {
                dependencies.insert(DependencyKey::children(node));
                slot.children.first().map_or(Value::Undefined, |child| Value::NodeRef(*child))
            }
            "last_child" => {
                dependencies.insert(DependencyKey::children(node));
                slot.children.last().map_or(Value::Undefined, |child| Value::NodeRef(*child))
            }
            "index_in_parent" => self
                .position_in_parent(node, dependencies)
                .map_or(Value::Undefined, |(_, index)| Value::Integer(BigInt::from(index))),
            "previous_sibling" => self
                .sibling(node, Relationship::PreviousSibling, dependencies)
                .map_or(Value::Undefined, Value::NodeRef),
            "next_sibling" => self
                .sibling(node, Relationship::NextSibling, dependencies)
                .map_or(Value::Undefined, Value::NodeRef),
            _ => {
                let relationship = Relationship::from_function_name(name)?;
                Value::Relationship { node, relationship }
            }
        };
        Some(value)
    }

    pub(crate) fn parent_of(&self, node: NodeId, dependencies: &mut DependencySet) -> Option<NodeId> {
        dependencies.insert(DependencyKey::parent(node));
        self.parent(node)
    }

    pub(crate) fn children_of(&self, node: NodeId, dependencies: &mut DependencySet) -> Vec<NodeId> {
        dependencies.insert(DependencyKey::children(node));
        self.children(node).to_vec()
    }

    fn position_in_parent(
        &self,
        node: NodeId,
        dependencies: &mut DependencySet,
    ) -> Option<(NodeId, usize)> {
        let parent = self.parent_of(node, dependencies)?;
        dependencies.insert(DependencyKey::children(parent));
        let index = self.children(parent).iter().position(|child| *child == node)?;
        Some((parent, index))
    }

    /// Immediate sibling in the direction of `relationship`.
    pub(crate) fn sibling(
        &self,
        node: NodeId,
        relationship: Relationship,
        dependencies: &mut DependencySet,
    ) -> Option<NodeId> {
        let (parent, index) = self.position_in_parent(node, dependencies)?;
        let siblings = self.children(parent);
        match relationship {
            Relationship::PreviousSibling => index.checked_sub(1).map(|index| siblings[index]),
            Relationship::NextSibling => siblings.get(index + 1).copied(),
            _ => None,
        }
    }
}

impl EvaluationHost for Tree {
    /// Lookup order: declarations, properties, engine-provided names, then the
    /// node's own behavior.
    fn resolve_identifier(
        &mut self,
        node: NodeId,
        name: &str,
        dependencies: &mut DependencySet,
    ) -> Value {
        dependencies.insert(DependencyKey::named(node, name));
        let Some(slot) = self.nodes.get(node.0) else {
            return Value::Undefined;
        };
        if let Some(value) = slot.declarations.get(name) {
            return value.clone();
        }
        if let Some(value) = slot.properties.get(name) {
            return value.clone();
        }
        if let Some(value) = self.engine_identifier(node, name, dependencies) {
            return value;
        }
        slot.behavior.evaluate_identifier(name)
    }

    fn relationship(
        &mut self,
        node: NodeId,
        relationship: Relationship,
        condition: Arc<Expression>,
        dependencies: &mut DependencySet,
    ) -> Value {
        self.watch_relationship(node, relationship, condition, dependencies)
    }
}

/// Names whose value differs between two declaration maps, missing counting as `Undefined`.
fn changed_names(previous: &Declarations, current: &Declarations) -> Vec<Arc<str>> {
    let undefined = Value::Undefined;
    let mut changed: Vec<Arc<str>> = current
        .iter()
        .filter(|(name, value)| previous.get(*name).unwrap_or(&undefined) != *value)
        .map(|(name, _)| name.clone())
        .collect();
    changed.extend(
        previous
            .iter()
            .filter(|(name, value)| !current.contains_key(*name) && !value.is_undefined())
            .map(|(name, _)| name.clone()),
    );
    changed
}
