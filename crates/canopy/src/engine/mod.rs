//! Reactive rule evaluation over a mutable tree of nodes.
//!
//! Every attached node re-runs the rule list when something it read changes.
//! Reads are recorded while evaluating, changes are queued and processed in
//! batches until the tree settles.

pub mod arena;
pub mod behavior;
pub mod command;
pub mod config;
pub mod dependency;
pub mod error;
pub mod evaluator;
pub mod node;
pub mod subscription;
pub mod tree;
pub mod value;
mod watcher;

pub use behavior::{BasicNode, NodeBehavior, NodeContext};
pub use command::{Poster, TreeCommand};
pub use config::EngineConfig;
pub use dependency::{Declarations, DependencyKey, DependencySet, PropertyKey, STOP_PROPERTY};
pub use error::{EvaluationError, TreeError};
pub use evaluator::{EvaluationHost, Evaluator, Scope, evaluate};
pub use node::{NodeId, NodeState};
pub use subscription::{Subscriber, SubscriptionId};
pub use tree::{FlushReport, Tree};
pub use value::{EnumType, EnumValue, Value};
