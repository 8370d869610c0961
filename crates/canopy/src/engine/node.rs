use super::arena::SlotId;
use super::behavior::NodeBehavior;
use super::dependency::{Declarations, DependencySet};
use super::subscription::SubscriptionSet;
use super::value::Value;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Handle to a node in a [`super::Tree`]. Stays invalid once the node is destroyed,
/// even if its slot is reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId(pub(crate) SlotId);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.generation == 0 {
            write!(f, "#{}", self.0.index)
        } else {
            write!(f, "#{}v{}", self.0.index, self.0.generation)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Not reachable from the root.
    Unattached,
    /// Attached, waiting for its first (or next) rule pass.
    Pending,
    /// Attached and up to date.
    Settled,
}

impl NodeState {
    pub fn is_attached(self) -> bool {
        !matches!(self, Self::Unattached)
    }
}

pub(crate) struct Node {
    pub(crate) behavior: Box<dyn NodeBehavior>,
    /// Values pushed in by whoever owns the node (`set_property`).
    pub(crate) properties: IndexMap<Arc<str>, Value>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) alive: bool,
    pub(crate) state: NodeState,
    /// Result of the last rule pass.
    pub(crate) declarations: Declarations,
    /// Everything the last rule pass read.
    pub(crate) dependencies: DependencySet,
    pub(crate) subscriptions: SubscriptionSet,
    pub(crate) passes: u64,
}

impl Node {
    pub(crate) fn new(behavior: Box<dyn NodeBehavior>, state: NodeState) -> Self {
        Self {
            behavior,
            properties: IndexMap::new(),
            parent: None,
            children: Vec::new(),
            alive: true,
            state,
            declarations: Declarations::default(),
            dependencies: DependencySet::default(),
            subscriptions: SubscriptionSet::default(),
            passes: 0,
        }
    }
}
