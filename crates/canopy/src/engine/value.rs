use super::error::EvaluationError;
use super::node::NodeId;
use crate::relationship::Relationship;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Value {
    #[default]
    Undefined,
    Boolean(bool),
    String(Arc<str>),
    Integer(BigInt),
    Double(OrderedFloat<f64>),
    Enum(EnumValue),
    NodeRef(NodeId),
    /// A relationship function bound to a node, e.g. `parent_matches`. Applying it
    /// to one condition yields the related node.
    Relationship {
        node: NodeId,
        relationship: Relationship,
    },
}

/// A closed set of named members, each with one or more aliases.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct EnumType {
    name: Arc<str>,
    members: Vec<Vec<Arc<str>>>,
}

impl EnumType {
    /// The first name of every member is its primary name.
    pub fn new<M, N>(name: impl Into<Arc<str>>, members: M) -> Arc<Self>
    where
        M: IntoIterator,
        M::Item: IntoIterator<Item = N>,
        N: Into<Arc<str>>,
    {
        Arc::new(Self {
            name: name.into(),
            members: members
                .into_iter()
                .map(|aliases| aliases.into_iter().map(Into::into).collect())
                .collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|aliases| aliases.iter().any(|alias| &**alias == name))
    }

    /// Member by any of its names.
    pub fn value(self: &Arc<Self>, name: &str) -> Option<Value> {
        self.index_of(name).map(|index| {
            Value::Enum(EnumValue {
                ty: self.clone(),
                index,
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    ty: Arc<EnumType>,
    index: usize,
}

impl EnumValue {
    pub fn enum_type(&self) -> &Arc<EnumType> {
        &self.ty
    }

    pub fn aliases(&self) -> &[Arc<str>] {
        self.ty
            .members
            .get(self.index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.aliases().first().map_or("", |name| name.as_ref())
    }

    pub fn is(&self, name: &str) -> bool {
        self.aliases().iter().any(|alias| &**alias == name)
    }
}

enum Numbers<'a> {
    Integers(&'a BigInt, &'a BigInt),
    Doubles(f64, f64),
}

fn to_double(integer: &BigInt) -> f64 {
    integer.to_f64().unwrap_or(f64::NAN)
}

fn double(value: f64, operator: &'static str) -> Result<Value, EvaluationError> {
    if value.is_finite() {
        Ok(Value::Double(OrderedFloat(value)))
    } else {
        Err(EvaluationError::NotFinite { operator })
    }
}

impl Value {
    pub fn string(text: impl Into<Arc<str>>) -> Self {
        Self::String(text.into())
    }

    pub fn integer(integer: impl Into<BigInt>) -> Self {
        Self::Integer(integer.into())
    }

    pub fn double(double: f64) -> Self {
        Self::Double(OrderedFloat(double))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// `Undefined`, `false`, empty strings and numeric zero are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined => false,
            Self::Boolean(boolean) => *boolean,
            Self::String(text) => !text.is_empty(),
            Self::Integer(integer) => !integer.is_zero(),
            Self::Double(double) => double.0 != 0.0,
            Self::Enum(_) | Self::NodeRef(_) | Self::Relationship { .. } => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Boolean(_) => "boolean",
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::Enum(_) => "enum",
            Self::NodeRef(_) => "node",
            Self::Relationship { .. } => "relationship",
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Self::NodeRef(node) => Some(*node),
            _ => None,
        }
    }

    fn numbers<'a>(
        &'a self,
        other: &'a Value,
        operator: &'static str,
    ) -> Result<Numbers<'a>, EvaluationError> {
        match (self, other) {
            (Self::Integer(left), Self::Integer(right)) => Ok(Numbers::Integers(left, right)),
            (Self::Integer(left), Self::Double(right)) => {
                Ok(Numbers::Doubles(to_double(left), right.0))
            }
            (Self::Double(left), Self::Integer(right)) => {
                Ok(Numbers::Doubles(left.0, to_double(right)))
            }
            (Self::Double(left), Self::Double(right)) => Ok(Numbers::Doubles(left.0, right.0)),
            _ => Err(EvaluationError::Operands {
                operator,
                left: self.type_name(),
                right: other.type_name(),
            }),
        }
    }

    pub fn add(&self, other: &Value) -> Result<Value, EvaluationError> {
        match self.numbers(other, "+")? {
            Numbers::Integers(left, right) => Ok(Self::Integer(left + right)),
            Numbers::Doubles(left, right) => double(left + right, "+"),
        }
    }

    pub fn subtract(&self, other: &Value) -> Result<Value, EvaluationError> {
        match self.numbers(other, "-")? {
            Numbers::Integers(left, right) => Ok(Self::Integer(left - right)),
            Numbers::Doubles(left, right) => double(left - right, "-"),
        }
    }

    pub fn multiply(&self, other: &Value) -> Result<Value, EvaluationError> {
        match self.numbers(other, "*")? {
            Numbers::Integers(left, right) => Ok(Self::Integer(left * right)),
            Numbers::Doubles(left, right) => double(left * right, "*"),
        }
    }

    /// `/` always produces a double, even for two integers.
    pub fn divide(&self, other: &Value) -> Result<Value, EvaluationError> {
        let (left, right) = match self.numbers(other, "/")? {
            Numbers::Integers(left, right) => (to_double(left), to_double(right)),
            Numbers::Doubles(left, right) => (left, right),
        };
        if right == 0.0 {
            return Err(EvaluationError::DivisionByZero);
        }
        double(left / right, "/")
    }

    /// `~/` rounds toward zero and always produces an integer.
    pub fn truncating_divide(&self, other: &Value) -> Result<Value, EvaluationError> {
        match self.numbers(other, "~/")? {
            Numbers::Integers(_, right) if right.is_zero() => Err(EvaluationError::DivisionByZero),
            Numbers::Integers(left, right) => Ok(Self::Integer(left / right)),
            Numbers::Doubles(_, right) if right == 0.0 => Err(EvaluationError::DivisionByZero),
            Numbers::Doubles(left, right) => BigInt::from_f64((left / right).trunc())
                .map(Self::Integer)
                .ok_or(EvaluationError::NotFinite { operator: "~/" }),
        }
    }

    /// Euclidean remainder: never negative, whatever the signs of the operands.
    pub fn modulo(&self, other: &Value) -> Result<Value, EvaluationError> {
        match self.numbers(other, "%")? {
            Numbers::Integers(_, right) if right.is_zero() => Err(EvaluationError::DivisionByZero),
            Numbers::Integers(left, right) => {
                let remainder = left % right;
                if remainder.is_negative() {
                    Ok(Self::Integer(remainder + right.abs()))
                } else {
                    Ok(Self::Integer(remainder))
                }
            }
            Numbers::Doubles(_, right) if right == 0.0 => Err(EvaluationError::DivisionByZero),
            Numbers::Doubles(left, right) => double(left.rem_euclid(right), "%"),
        }
    }

    pub fn negate(&self) -> Result<Value, EvaluationError> {
        match self {
            Self::Integer(integer) => Ok(Self::Integer(-integer)),
            Self::Double(double) => Ok(Self::Double(-*double)),
            _ => Err(EvaluationError::Operand {
                operator: "-",
                operand: self.type_name(),
            }),
        }
    }

    /// Unary `+`, only defined for numbers.
    pub fn identity(&self) -> Result<Value, EvaluationError> {
        match self {
            Self::Integer(_) | Self::Double(_) => Ok(self.clone()),
            _ => Err(EvaluationError::Operand {
                operator: "+",
                operand: self.type_name(),
            }),
        }
    }

    /// Ordering for `<`, `>`, `<=` and `>=`. Only numbers are ordered; integers and
    /// doubles compare across kinds.
    pub fn compare(&self, other: &Value, operator: &'static str) -> Result<Ordering, EvaluationError> {
        match self.numbers(other, operator)? {
            Numbers::Integers(left, right) => Ok(left.cmp(right)),
            Numbers::Doubles(left, right) => {
                left.partial_cmp(&right)
                    .ok_or(EvaluationError::NotFinite { operator })
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Boolean(boolean) => write!(f, "{boolean}"),
            Self::String(text) => write!(f, "{text:?}"),
            Self::Integer(integer) => write!(f, "{integer}"),
            Self::Double(double) => write!(f, "{:?}", double.0),
            Self::Enum(value) => write!(f, "{}.{}", value.ty.name, value.name()),
            Self::NodeRef(node) => write!(f, "{node}"),
            Self::Relationship { node, relationship } => write!(f, "{node}.{relationship}"),
        }
    }
}

impl From<bool> for Value {
    fn from(boolean: bool) -> Self {
        Self::Boolean(boolean)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::String(text.into())
    }
}

impl From<i32> for Value {
    fn from(integer: i32) -> Self {
        Self::Integer(integer.into())
    }
}

impl From<i64> for Value {
    fn from(integer: i64) -> Self {
        Self::Integer(integer.into())
    }
}

impl From<f64> for Value {
    fn from(double: f64) -> Self {
        Self::Double(OrderedFloat(double))
    }
}

impl From<NodeId> for Value {
    fn from(node: NodeId) -> Self {
        Self::NodeRef(node)
    }
}

#[cfg(feature = "cli")]
impl Value {
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::Undefined => serde_json::Value::Null,
            Self::Boolean(boolean) => json!(boolean),
            Self::String(text) => json!(text.as_ref()),
            Self::Integer(integer) => integer
                .to_i64()
                .map_or_else(|| json!(integer.to_string()), |integer| json!(integer)),
            Self::Double(double) => json!(double.0),
            Self::Enum(value) => json!(value.name()),
            Self::NodeRef(_) | Self::Relationship { .. } => json!(self.to_string()),
        }
    }

    /// Scalars map directly, arrays and objects have no counterpart.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Bool(boolean) => Self::Boolean(*boolean),
            serde_json::Value::String(text) => Self::String(text.as_str().into()),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(integer) => Self::Integer(integer.into()),
                None => number.as_f64().map_or(Self::Undefined, Self::double),
            },
            serde_json::Value::Null | serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                Self::Undefined
            }
        }
    }
}
