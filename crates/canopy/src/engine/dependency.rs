use super::node::NodeId;
use super::value::Value;
use crate::parser::Expression;
use crate::relationship::Relationship;
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::sync::Arc;

/// Declaration that ends a rule pass early when it resolves truthy.
pub const STOP_PROPERTY: &str = "stop";

/// Declared property values of one node, in declaration order.
pub type Declarations = IndexMap<Arc<str>, Value>;

/// Everything one evaluation read, in first-read order.
pub type DependencySet = IndexSet<DependencyKey>;

/// What can be read from a node and later change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Named(Arc<str>),
    Children,
    Parent,
    Relationship {
        relationship: Relationship,
        condition: Arc<Expression>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyKey {
    pub node: NodeId,
    pub property: PropertyKey,
}

impl DependencyKey {
    pub fn named(node: NodeId, name: impl Into<Arc<str>>) -> Self {
        Self {
            node,
            property: PropertyKey::Named(name.into()),
        }
    }

    pub fn children(node: NodeId) -> Self {
        Self {
            node,
            property: PropertyKey::Children,
        }
    }

    pub fn parent(node: NodeId) -> Self {
        Self {
            node,
            property: PropertyKey::Parent,
        }
    }

    pub fn relationship(
        node: NodeId,
        relationship: Relationship,
        condition: Arc<Expression>,
    ) -> Self {
        Self {
            node,
            property: PropertyKey::Relationship {
                relationship,
                condition,
            },
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            PropertyKey::Named(name) => write!(f, "{}.{name}", self.node),
            PropertyKey::Children => write!(f, "{}.<children>", self.node),
            PropertyKey::Parent => write!(f, "{}.<parent>", self.node),
            PropertyKey::Relationship {
                relationship,
                condition,
            } => write!(f, "{}.{relationship}({condition})", self.node),
        }
    }
}
