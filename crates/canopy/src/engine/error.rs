use super::node::NodeId;
use thiserror::Error;

/// A failed operation inside an expression. Never escapes evaluation:
/// the evaluator logs it and continues with `Undefined`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("operator '{operator}' cannot be applied to {left} and {right}")]
    Operands {
        operator: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("operator '{operator}' cannot be applied to {operand}")]
    Operand {
        operator: &'static str,
        operand: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("operator '{operator}' produced a non-finite number")]
    NotFinite { operator: &'static str },
    #[error("{value} has no member '{name}'")]
    UnknownMember { value: &'static str, name: String },
    #[error("member names must be identifiers or strings")]
    InvalidMemberName,
    #[error("{callee} expects {expected} argument(s), got {actual}")]
    Arity {
        callee: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{callee} expects a name as argument")]
    ExpectedName { callee: &'static str },
}

/// A structural tree operation that was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("node {0} does not exist")]
    StaleNode(NodeId),
    #[error("node {child} already has parent {parent}")]
    AlreadyAttached { child: NodeId, parent: NodeId },
    #[error("child index {index} is out of range for {len} children")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("attaching {child} under {parent} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },
    #[error("the root node cannot be attached to a parent or destroyed")]
    Root,
    #[error("node {node} is still attached to {parent}")]
    StillAttached { node: NodeId, parent: NodeId },
}
