use super::node::NodeId;
use super::tree::Tree;
use super::value::Value;
use futures_channel::mpsc::UnboundedSender;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Work posted to a tree from any thread, applied on the next [`Tree::flush`].
pub enum TreeCommand {
    SetProperty {
        node: NodeId,
        name: Arc<str>,
        value: Value,
    },
    PropertyChanged {
        node: NodeId,
        name: Arc<str>,
    },
    SetAlive {
        node: NodeId,
        alive: bool,
    },
    Run(Box<dyn FnOnce(&mut Tree) + Send>),
}

impl fmt::Debug for TreeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetProperty { node, name, value } => f
                .debug_struct("SetProperty")
                .field("node", node)
                .field("name", name)
                .field("value", value)
                .finish(),
            Self::PropertyChanged { node, name } => f
                .debug_struct("PropertyChanged")
                .field("node", node)
                .field("name", name)
                .finish(),
            Self::SetAlive { node, alive } => f
                .debug_struct("SetAlive")
                .field("node", node)
                .field("alive", alive)
                .finish(),
            Self::Run(_) => f.write_str("Run(..)"),
        }
    }
}

/// Cloneable, `Send` handle for posting [`TreeCommand`]s.
#[derive(Clone)]
pub struct Poster {
    sender: UnboundedSender<TreeCommand>,
}

impl Poster {
    pub(crate) fn new(sender: UnboundedSender<TreeCommand>) -> Self {
        Self { sender }
    }

    /// Commands posted after the tree is dropped are discarded.
    pub fn post(&self, command: TreeCommand) {
        if let Err(error) = self.sender.unbounded_send(command) {
            debug!(command = ?error.into_inner(), "tree is gone, dropping command");
        }
    }

    pub fn set_property(&self, node: NodeId, name: impl Into<Arc<str>>, value: Value) {
        self.post(TreeCommand::SetProperty {
            node,
            name: name.into(),
            value,
        });
    }

    pub fn property_changed(&self, node: NodeId, name: impl Into<Arc<str>>) {
        self.post(TreeCommand::PropertyChanged {
            node,
            name: name.into(),
        });
    }

    pub fn set_alive(&self, node: NodeId, alive: bool) {
        self.post(TreeCommand::SetAlive { node, alive });
    }

    pub fn run(&self, task: impl FnOnce(&mut Tree) + Send + 'static) {
        self.post(TreeCommand::Run(Box::new(task)));
    }
}

impl fmt::Debug for Poster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poster")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}
