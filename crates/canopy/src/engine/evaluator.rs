use super::dependency::DependencySet;
use super::error::EvaluationError;
use super::node::NodeId;
use super::value::{EnumValue, Value};
use crate::parser::{BinaryOperator, Expression, UnaryOperator};
use crate::relationship::Relationship;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// What the evaluator needs from the tree around it.
///
/// Every read goes through here so it can be recorded in `dependencies`.
pub trait EvaluationHost {
    /// Resolve a bare identifier in the context of `node`.
    fn resolve_identifier(
        &mut self,
        node: NodeId,
        name: &str,
        dependencies: &mut DependencySet,
    ) -> Value;

    /// The node related to `node` that satisfies `condition`, or `Undefined`.
    fn relationship(
        &mut self,
        node: NodeId,
        relationship: Relationship,
        condition: Arc<Expression>,
        dependencies: &mut DependencySet,
    ) -> Value;
}

/// Member access and application on a value.
///
/// Both default to `Undefined` for payloads that support neither.
pub trait Scope {
    fn member(&self, _name: &str, _evaluator: &mut Evaluator<'_>) -> Result<Value, EvaluationError> {
        Ok(Value::Undefined)
    }

    fn apply(
        &self,
        _arguments: &[Expression],
        _context: NodeId,
        _evaluator: &mut Evaluator<'_>,
    ) -> Result<Value, EvaluationError> {
        Ok(Value::Undefined)
    }
}

/// A node reference reads the node's properties and evaluates arguments on that node.
impl Scope for NodeId {
    fn member(&self, name: &str, evaluator: &mut Evaluator<'_>) -> Result<Value, EvaluationError> {
        Ok(evaluator.resolve_identifier(*self, name))
    }

    fn apply(
        &self,
        arguments: &[Expression],
        _context: NodeId,
        evaluator: &mut Evaluator<'_>,
    ) -> Result<Value, EvaluationError> {
        match arguments {
            [argument] => Ok(evaluator.evaluate(argument, *self)),
            _ => Err(EvaluationError::Arity {
                callee: "node",
                expected: 1,
                actual: arguments.len(),
            }),
        }
    }
}

/// `value.red` tests membership by any alias, `value.name` is the primary name,
/// `value(red)` selects a member of the same enum.
impl Scope for EnumValue {
    fn member(&self, name: &str, _evaluator: &mut Evaluator<'_>) -> Result<Value, EvaluationError> {
        if self.enum_type().value(name).is_some() {
            return Ok(Value::Boolean(self.is(name)));
        }
        if name == "name" {
            return Ok(Value::String(self.name().into()));
        }
        Err(EvaluationError::UnknownMember {
            value: "enum",
            name: name.to_owned(),
        })
    }

    fn apply(
        &self,
        arguments: &[Expression],
        _context: NodeId,
        _evaluator: &mut Evaluator<'_>,
    ) -> Result<Value, EvaluationError> {
        match arguments {
            [Expression::Identifier(name) | Expression::StringLiteral(name)] => {
                Ok(self.enum_type().value(name).unwrap_or_default())
            }
            [_] => Err(EvaluationError::ExpectedName { callee: "enum" }),
            _ => Err(EvaluationError::Arity {
                callee: "enum",
                expected: 1,
                actual: arguments.len(),
            }),
        }
    }
}

impl Scope for Value {
    fn member(&self, name: &str, evaluator: &mut Evaluator<'_>) -> Result<Value, EvaluationError> {
        match self {
            Self::Undefined => Ok(Self::Undefined),
            Self::NodeRef(node) => node.member(name, evaluator),
            Self::Enum(value) => value.member(name, evaluator),
            Self::Boolean(_)
            | Self::String(_)
            | Self::Integer(_)
            | Self::Double(_)
            | Self::Relationship { .. } => Err(EvaluationError::UnknownMember {
                value: self.type_name(),
                name: name.to_owned(),
            }),
        }
    }

    fn apply(
        &self,
        arguments: &[Expression],
        context: NodeId,
        evaluator: &mut Evaluator<'_>,
    ) -> Result<Value, EvaluationError> {
        match self {
            Self::Undefined => Ok(Self::Undefined),
            Self::NodeRef(node) => node.apply(arguments, context, evaluator),
            Self::Enum(value) => value.apply(arguments, context, evaluator),
            Self::Relationship { node, relationship } => match arguments {
                [condition] => {
                    Ok(evaluator.relationship(*node, *relationship, Arc::new(condition.clone())))
                }
                _ => Err(EvaluationError::Arity {
                    callee: relationship.function_name(),
                    expected: 1,
                    actual: arguments.len(),
                }),
            },
            // A scalar callee acts as a guard: `kind(condition)` only holds when both do
            Self::Boolean(_) | Self::String(_) | Self::Integer(_) | Self::Double(_) => {
                let mut result = self.clone();
                for argument in arguments {
                    if !result.is_truthy() {
                        break;
                    }
                    result = evaluator.evaluate(argument, context);
                }
                Ok(result)
            }
        }
    }
}

/// Evaluates expressions against an [`EvaluationHost`], collecting what was read.
pub struct Evaluator<'a> {
    host: &'a mut dyn EvaluationHost,
    dependencies: &'a mut DependencySet,
}

impl<'a> Evaluator<'a> {
    pub fn new(host: &'a mut dyn EvaluationHost, dependencies: &'a mut DependencySet) -> Self {
        Self { host, dependencies }
    }

    pub fn resolve_identifier(&mut self, node: NodeId, name: &str) -> Value {
        self.host.resolve_identifier(node, name, self.dependencies)
    }

    pub fn relationship(
        &mut self,
        node: NodeId,
        relationship: Relationship,
        condition: Arc<Expression>,
    ) -> Value {
        self.host
            .relationship(node, relationship, condition, self.dependencies)
    }

    /// Never fails: errors are logged where they occur and become `Undefined`,
    /// so the surrounding expression keeps evaluating.
    pub fn evaluate(&mut self, expression: &Expression, context: NodeId) -> Value {
        match expression {
            Expression::Identifier(name) => match &**name {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                "undefined" => Value::Undefined,
                _ => self.resolve_identifier(context, name),
            },
            Expression::StringLiteral(text) => Value::String(text.clone()),
            Expression::IntegerLiteral(integer) => Value::Integer(integer.clone()),
            Expression::DoubleLiteral(double) => Value::Double(*double),
            Expression::Unary { operator, operand } => {
                let operand = self.evaluate(operand, context);
                let result = match operator {
                    UnaryOperator::Not => Ok(Value::Boolean(!operand.is_truthy())),
                    UnaryOperator::Negate => operand.negate(),
                    UnaryOperator::Plus => operand.identity(),
                };
                degrade(result, expression)
            }
            // The deciding operand is the result, the other side is not evaluated at all
            Expression::Binary {
                operator: BinaryOperator::And,
                left,
                right,
            } => {
                let left = self.evaluate(left, context);
                if left.is_truthy() {
                    self.evaluate(right, context)
                } else {
                    left
                }
            }
            Expression::Binary {
                operator: BinaryOperator::Or,
                left,
                right,
            } => {
                let left = self.evaluate(left, context);
                if left.is_truthy() {
                    left
                } else {
                    self.evaluate(right, context)
                }
            }
            Expression::Binary {
                operator: BinaryOperator::Member,
                left,
                right,
            } => {
                let target = self.evaluate(left, context);
                let result = match right.as_ref() {
                    Expression::Identifier(name) | Expression::StringLiteral(name) => {
                        target.member(name, self)
                    }
                    _ => Err(EvaluationError::InvalidMemberName),
                };
                degrade(result, expression)
            }
            Expression::Binary {
                operator,
                left,
                right,
            } => {
                let left = self.evaluate(left, context);
                let right = self.evaluate(right, context);
                degrade(binary(*operator, &left, &right), expression)
            }
            Expression::Apply { callee, arguments } => {
                let callee = self.evaluate(callee, context);
                let result = callee.apply(arguments, context, self);
                degrade(result, expression)
            }
        }
    }
}

fn binary(operator: BinaryOperator, left: &Value, right: &Value) -> Result<Value, EvaluationError> {
    let ordered = |accept: fn(Ordering) -> bool| {
        left.compare(right, operator.symbol())
            .map(|ordering| Value::Boolean(accept(ordering)))
    };
    match operator {
        BinaryOperator::Equal => Ok(Value::Boolean(left == right)),
        BinaryOperator::NotEqual => Ok(Value::Boolean(left != right)),
        BinaryOperator::Less => ordered(Ordering::is_lt),
        BinaryOperator::Greater => ordered(Ordering::is_gt),
        BinaryOperator::LessOrEqual => ordered(Ordering::is_le),
        BinaryOperator::GreaterOrEqual => ordered(Ordering::is_ge),
        BinaryOperator::Add => left.add(right),
        BinaryOperator::Subtract => left.subtract(right),
        BinaryOperator::Multiply => left.multiply(right),
        BinaryOperator::Divide => left.divide(right),
        BinaryOperator::TruncatingDivide => left.truncating_divide(right),
        BinaryOperator::Modulo => left.modulo(right),
        // Handled by the evaluator before both sides are evaluated
        BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Member => Ok(Value::Undefined),
    }
}

fn degrade(result: Result<Value, EvaluationError>, expression: &Expression) -> Value {
    result.unwrap_or_else(|error| {
        debug!(%error, %expression, "expression evaluated to undefined");
        Value::Undefined
    })
}

/// Evaluate `expression` with `context` as the current node.
pub fn evaluate(
    expression: &Expression,
    context: NodeId,
    host: &mut dyn EvaluationHost,
    dependencies: &mut DependencySet,
) -> Value {
    Evaluator::new(host, dependencies).evaluate(expression, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::arena::SlotId;
    use crate::engine::dependency::{DependencyKey, PropertyKey};
    use crate::engine::value::EnumType;
    use crate::parser::parse_expression;
    use std::collections::HashMap;

    fn node(index: u32) -> NodeId {
        NodeId(SlotId {
            index,
            generation: 0,
        })
    }

    /// Serves fixed per-node properties and counts relationship lookups.
    #[derive(Default)]
    struct FixedHost {
        properties: HashMap<(NodeId, String), Value>,
        relationship_lookups: usize,
    }

    impl FixedHost {
        fn with(mut self, node: NodeId, name: &str, value: impl Into<Value>) -> Self {
            self.properties.insert((node, name.to_owned()), value.into());
            self
        }
    }

    impl EvaluationHost for FixedHost {
        fn resolve_identifier(
            &mut self,
            node: NodeId,
            name: &str,
            dependencies: &mut DependencySet,
        ) -> Value {
            dependencies.insert(DependencyKey::named(node, name));
            if let Some(relationship) = Relationship::from_function_name(name) {
                return Value::Relationship { node, relationship };
            }
            self.properties
                .get(&(node, name.to_owned()))
                .cloned()
                .unwrap_or_default()
        }

        fn relationship(
            &mut self,
            target: NodeId,
            relationship: Relationship,
            condition: Arc<Expression>,
            dependencies: &mut DependencySet,
        ) -> Value {
            self.relationship_lookups += 1;
            dependencies.insert(DependencyKey::relationship(target, relationship, condition));
            Value::NodeRef(node(99))
        }
    }

    fn eval(host: &mut FixedHost, code: &str) -> (Value, DependencySet) {
        let expression = parse_expression("test", code).unwrap();
        let mut dependencies = DependencySet::default();
        let value = evaluate(&expression, node(0), host, &mut dependencies);
        (value, dependencies)
    }

    fn read_names(dependencies: &DependencySet) -> Vec<String> {
        dependencies
            .iter()
            .filter_map(|key| match &key.property {
                PropertyKey::Named(name) => Some(name.to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_short_circuit_skips_reads() {
        let mut host = FixedHost::default().with(node(0), "a", false);
        let (value, dependencies) = eval(&mut host, "a and b");
        assert_eq!(value, Value::Boolean(false));
        assert_eq!(read_names(&dependencies), vec!["a"]);

        let mut host = FixedHost::default().with(node(0), "a", "yes");
        let (value, dependencies) = eval(&mut host, "a or b");
        assert_eq!(value, Value::from("yes"));
        assert_eq!(read_names(&dependencies), vec!["a"]);

        let (value, dependencies) = eval(&mut host, "a and b");
        assert_eq!(value, Value::Undefined);
        assert_eq!(read_names(&dependencies), vec!["a", "b"]);
    }

    #[test]
    fn test_errors_degrade_locally() {
        let mut host = FixedHost::default();
        assert_eq!(eval(&mut host, "1 / 0").0, Value::Undefined);
        assert_eq!(eval(&mut host, "1 / 0 or 5").0, Value::from(5));
        assert_eq!(eval(&mut host, "'a' < 1").0, Value::Undefined);
        assert_eq!(eval(&mut host, "not (1 / 0)").0, Value::Boolean(true));
        assert_eq!(eval(&mut host, "true.size").0, Value::Undefined);
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let mut host = FixedHost::default().with(node(0), "width", 10);
        assert_eq!(eval(&mut host, "width * 2 + 1").0, Value::from(21));
        assert_eq!(eval(&mut host, "width / 4").0, Value::from(2.5));
        assert_eq!(eval(&mut host, "width ~/ 4").0, Value::from(2));
        assert_eq!(eval(&mut host, "-width % 3").0, Value::from(2));
        assert_eq!(eval(&mut host, "width >= 10.0").0, Value::Boolean(true));
        assert_eq!(eval(&mut host, "width == 10.0").0, Value::Boolean(false));
    }

    #[test]
    fn test_strings_are_not_ordered_or_added() {
        let mut host = FixedHost::default().with(node(0), "title", "ab");
        assert_eq!(eval(&mut host, "'ab' < 'b'").0, Value::Undefined);
        assert_eq!(eval(&mut host, "title >= 'a'").0, Value::Undefined);
        assert_eq!(eval(&mut host, "title + 'c'").0, Value::Undefined);
        assert_eq!(eval(&mut host, "title == 'ab'").0, Value::Boolean(true));
    }

    #[test]
    fn test_scalar_application_is_a_guard() {
        let mut host = FixedHost::default()
            .with(node(0), "button", true)
            .with(node(0), "enabled", 1);
        assert_eq!(eval(&mut host, "button(enabled)").0, Value::from(1));
        assert_eq!(eval(&mut host, "button(enabled, 0)").0, Value::from(0));
        let (value, dependencies) = eval(&mut host, "window(enabled)");
        assert_eq!(value, Value::Undefined);
        assert_eq!(read_names(&dependencies), vec!["window"]);
    }

    #[test]
    fn test_node_reference_scope() {
        let mut host = FixedHost::default()
            .with(node(0), "other", node(1))
            .with(node(1), "size", 3)
            .with(node(1), "scale", 2);
        assert_eq!(eval(&mut host, "other.size").0, Value::from(3));
        assert_eq!(eval(&mut host, "other(size * scale)").0, Value::from(6));
        assert_eq!(eval(&mut host, "other(size, scale)").0, Value::Undefined);
        assert_eq!(eval(&mut host, "missing.size").0, Value::Undefined);
    }

    #[test]
    fn test_enum_scope() {
        let colors = EnumType::new("Color", [vec!["red", "crimson"], vec!["green"]]);
        let mut host = FixedHost::default()
            .with(node(0), "color", colors.value("crimson").unwrap());
        assert_eq!(eval(&mut host, "color.red").0, Value::Boolean(true));
        assert_eq!(eval(&mut host, "color.green").0, Value::Boolean(false));
        assert_eq!(eval(&mut host, "color.name").0, Value::from("red"));
        assert_eq!(eval(&mut host, "color.blue").0, Value::Undefined);
        assert_eq!(eval(&mut host, "color(green)").0, colors.value("green").unwrap());
        assert_eq!(eval(&mut host, "color == color(red)").0, Value::Boolean(true));
    }

    #[test]
    fn test_relationship_application() {
        let mut host = FixedHost::default();
        let (value, dependencies) = eval(&mut host, "parent_matches(window)");
        assert_eq!(value, Value::NodeRef(node(99)));
        assert_eq!(host.relationship_lookups, 1);
        assert!(dependencies.iter().any(|key| matches!(
            &key.property,
            PropertyKey::Relationship { relationship: Relationship::Parent, .. }
        )));
        assert_eq!(eval(&mut host, "parent_matches(a, b)").0, Value::Undefined);
        assert_eq!(host.relationship_lookups, 1);
    }
}
