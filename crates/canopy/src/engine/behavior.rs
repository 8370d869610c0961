use super::command::Poster;
use super::dependency::{Declarations, DependencySet};
use super::node::NodeId;
use super::value::Value;
use std::sync::Arc;

/// Handed to node hooks so they can identify themselves and post work back to the tree.
pub struct NodeContext<'a> {
    node: NodeId,
    poster: &'a Poster,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(node: NodeId, poster: &'a Poster) -> Self {
        Self { node, poster }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn poster(&self) -> &'a Poster {
        self.poster
    }
}

/// Node-specific behavior plugged into the tree.
///
/// Hooks run on the tree's thread. Anything slow should happen elsewhere and come
/// back through the [`Poster`].
pub trait NodeBehavior {
    /// Identifiers this node answers itself, consulted after declarations,
    /// properties and engine-provided names. Must not fail.
    fn evaluate_identifier(&self, _name: &str) -> Value {
        Value::Undefined
    }

    /// Called after a rule pass changed this node's declarations.
    fn declarations_changed(
        &mut self,
        _context: &NodeContext<'_>,
        _declarations: &Declarations,
        _dependencies: &DependencySet,
    ) {
    }

    fn alive_changed(&mut self, _context: &NodeContext<'_>, _alive: bool) {}
}

/// Answers `true` for its own kind and exposes the kind as `kind`.
#[derive(Debug, Clone, Default)]
pub struct BasicNode {
    kind: Option<Arc<str>>,
}

impl BasicNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(kind: impl Into<Arc<str>>) -> Self {
        Self {
            kind: Some(kind.into()),
        }
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }
}

impl NodeBehavior for BasicNode {
    fn evaluate_identifier(&self, name: &str) -> Value {
        match &self.kind {
            Some(kind) if name == "kind" => Value::String(kind.clone()),
            Some(kind) if &**kind == name => Value::Boolean(true),
            _ => Value::Undefined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_node_answers_its_kind() {
        let button = BasicNode::with_kind("button");
        assert_eq!(button.evaluate_identifier("button"), Value::Boolean(true));
        assert_eq!(button.evaluate_identifier("window"), Value::Undefined);
        assert_eq!(button.evaluate_identifier("kind"), Value::from("button"));
        assert_eq!(BasicNode::new().evaluate_identifier("kind"), Value::Undefined);
    }
}
