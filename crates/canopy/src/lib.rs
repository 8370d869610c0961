pub mod engine;
pub mod parser;
pub mod relationship;

pub use engine::{BasicNode, EngineConfig, NodeBehavior, NodeId, Tree, Value};
pub use parser::{Diagnostic, Expression, Rule, RulesError, load_rules, parse_expression, parse_rules};
pub use relationship::Relationship;
