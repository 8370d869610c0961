use super::{BinaryOperator, Declaration, Expression, Selector, Statement, UnaryOperator};
use std::fmt::{self, Write};

// Binding power, mirrors the pratt table in the parser
const OR: u8 = 1;
const AND: u8 = 2;
const NOT_OR_COMPARISON: u8 = 3;
const ADDITIVE: u8 = 4;
const MULTIPLICATIVE: u8 = 5;
const SIGN: u8 = 6;
const SUFFIX: u8 = 7;
const ATOM: u8 = 8;

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessOrEqual => "<=",
            Self::GreaterOrEqual => ">=",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::TruncatingDivide => "~/",
            Self::Modulo => "%",
            Self::Member => ".",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            Self::Or => OR,
            Self::And => AND,
            Self::Equal
            | Self::NotEqual
            | Self::Less
            | Self::Greater
            | Self::LessOrEqual
            | Self::GreaterOrEqual => NOT_OR_COMPARISON,
            Self::Add | Self::Subtract => ADDITIVE,
            Self::Multiply | Self::Divide | Self::TruncatingDivide | Self::Modulo => {
                MULTIPLICATIVE
            }
            Self::Member => SUFFIX,
        }
    }
}

impl UnaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Not => "not",
            Self::Negate => "-",
            Self::Plus => "+",
        }
    }
}

impl Expression {
    fn precedence(&self) -> u8 {
        match self {
            Self::Identifier(_)
            | Self::StringLiteral(_)
            | Self::IntegerLiteral(_)
            | Self::DoubleLiteral(_) => ATOM,
            Self::Unary {
                operator: UnaryOperator::Not,
                ..
            } => NOT_OR_COMPARISON,
            Self::Unary { .. } => SIGN,
            Self::Binary { operator, .. } => operator.precedence(),
            Self::Apply { .. } => SUFFIX,
        }
    }

    fn write_grouped(&self, f: &mut fmt::Formatter<'_>, grouped: bool) -> fmt::Result {
        if grouped {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

/// Prints expressions so that parsing the output yields the same tree.
///
/// The exception is an `Identifier` whose name is not a plain word, which only the
/// flattener produces (from a quoted selector kind such as `"odd kind" { .. }`). The
/// expression grammar has no quoted identifier, so it is printed bare and the output
/// does not reparse rather than silently reparsing as a string literal.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(name) => write!(f, "{name}"),
            Self::StringLiteral(text) => write_quoted(f, text),
            Self::IntegerLiteral(integer) => write!(f, "{integer}"),
            Self::DoubleLiteral(double) => {
                let text = double.0.to_string();
                if text.contains(['.', 'e', 'E']) || !double.0.is_finite() {
                    write!(f, "{text}")
                } else {
                    write!(f, "{text}.0")
                }
            }
            Self::Unary { operator, operand } => {
                match operator {
                    UnaryOperator::Not => f.write_str("not ")?,
                    UnaryOperator::Negate | UnaryOperator::Plus => f.write_str(operator.symbol())?,
                }
                let grouped = match operator {
                    UnaryOperator::Not => operand.precedence() < NOT_OR_COMPARISON,
                    UnaryOperator::Negate | UnaryOperator::Plus => operand.precedence() < SIGN,
                };
                operand.write_grouped(f, grouped)
            }
            Self::Binary {
                operator: BinaryOperator::Member,
                left,
                right,
            } => {
                left.write_grouped(f, left.precedence() < SUFFIX)?;
                f.write_char('.')?;
                match right.as_ref() {
                    Self::Identifier(name) if is_plain_name(name) => write!(f, "{name}"),
                    Self::Identifier(name) | Self::StringLiteral(name) => write_quoted(f, name),
                    other => write!(f, "{other}"),
                }
            }
            Self::Binary {
                operator,
                left,
                right,
            } => {
                let precedence = operator.precedence();
                let left_is_not = matches!(
                    left.as_ref(),
                    Self::Unary {
                        operator: UnaryOperator::Not,
                        ..
                    }
                );
                // `not a == b` would parse as `not (a == b)`
                let group_left = left.precedence() < precedence
                    || (left_is_not && precedence == NOT_OR_COMPARISON);
                left.write_grouped(f, group_left)?;
                write!(f, " {} ", operator.symbol())?;
                right.write_grouped(f, right.precedence() <= precedence)
            }
            Self::Apply { callee, arguments } => {
                callee.write_grouped(f, callee.precedence() < SUFFIX)?;
                f.write_char('(')?;
                for (index, argument) in arguments.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{argument}")?;
                }
                f.write_char(')')
            }
        }
    }
}

fn write_quoted(f: &mut impl Write, text: &str) -> fmt::Result {
    f.write_char('"')?;
    for character in text.chars() {
        match character {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            character if character.is_control() && (character as u32) < 0x1_0000 => {
                write!(f, "\\u{:04x}", character as u32)?
            }
            character => f.write_char(character)?,
        }
    }
    f.write_char('"')
}

/// Whether `name` can be written without quotes as a property or selector name.
pub fn is_plain_name(name: &str) -> bool {
    let mut characters = name.chars();
    let starts_well = characters
        .next()
        .is_some_and(|character| character.is_alphabetic() || character == '_');
    starts_well
        && characters.all(|character| character.is_alphanumeric() || character == '_')
        && !matches!(name, "not" | "and" | "or")
}

fn write_name(f: &mut impl Write, name: &str) -> fmt::Result {
    if is_plain_name(name) {
        f.write_str(name)
    } else {
        write_quoted(f, name)
    }
}

impl Statement {
    fn write_indented(&self, f: &mut impl Write, depth: usize) -> fmt::Result {
        let indent = "    ".repeat(depth);
        match self {
            Self::Declaration(declaration) => {
                f.write_str(&indent)?;
                writeln!(f, "{declaration}")
            }
            Self::Selector(Selector {
                kind,
                condition,
                statements,
                ..
            }) => {
                f.write_str(&indent)?;
                write_name(f, kind)?;
                if let Some(condition) = condition {
                    write!(f, "({condition})")?;
                }
                if statements.is_empty() {
                    return writeln!(f, " {{}}");
                }
                writeln!(f, " {{")?;
                for statement in statements {
                    statement.write_indented(f, depth + 1)?;
                }
                f.write_str(&indent)?;
                writeln!(f, "}}")
            }
        }
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_name(f, &self.property)?;
        write!(f, ": {};", self.value)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// Canonical source text for a statement tree.
pub fn format_rules(statements: &[Statement]) -> String {
    let mut output = String::new();
    for statement in statements {
        // Writing into a String cannot fail
        let _ = statement.write_indented(&mut output, 0);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::super::{parse_expression, parse_rules};
    use super::*;

    fn reformat(code: &str) -> String {
        parse_expression("test", code).unwrap().to_string()
    }

    #[test]
    fn test_redundant_parentheses_are_dropped() {
        assert_eq!(reformat("(a and (b)) or ((c))"), "a and b or c");
        assert_eq!(reformat("(1 + 2) * 3"), "(1 + 2) * 3");
        assert_eq!(reformat("1 - (2 - 3)"), "1 - (2 - 3)");
        assert_eq!(reformat("(1 - 2) - 3"), "1 - 2 - 3");
    }

    #[test]
    fn test_not_and_comparison_grouping() {
        assert_eq!(reformat("(not a) == b"), "(not a) == b");
        assert_eq!(reformat("not (a == b)"), "not a == b");
        assert_eq!(reformat("not (a or b)"), "not (a or b)");
    }

    #[test]
    fn test_suffixes_and_signs() {
        assert_eq!(reformat("-(a.b)(c, 'd')"), "-a.b(c, \"d\")");
        assert_eq!(reformat("(-a).b"), "(-a).b");
        assert_eq!(reformat("(a or b)(c)"), "(a or b)(c)");
    }

    #[test]
    fn test_literals() {
        assert_eq!(reformat("2.50"), "2.5");
        assert_eq!(reformat("3.0"), "3.0");
        assert_eq!(reformat("1.0e3"), "1000.0");
        assert_eq!(reformat("'say \"hi\"\n'"), "\"say \\\"hi\\\"\\n\"");
    }

    #[test]
    fn test_reparse_round_trip() {
        let corpus = [
            "((a + b) * (c - d)) / e",
            "a.b(c).d",
            "f(x)(y).z(1, 2.5, 'q')",
            "-(a + b) % 3 ~/ 2",
            "not (a or b) and c != d",
            "not a and b",
            "a - (b - (c + d))",
            "(not a) == b",
            "x.\"odd name\"(1) <= 1.0e3",
            "(a or b)(c).d(e(f.g))",
            "-a.b(c) * +d",
        ];
        for code in corpus {
            let expression = parse_expression("test", code).unwrap();
            let printed = expression.to_string();
            assert_eq!(
                parse_expression("test", &printed).unwrap(),
                expression,
                "{code} printed as {printed}"
            );
        }
    }

    #[test]
    fn test_non_plain_identifier_is_printed_bare() {
        let expression = Expression::identifier("odd kind");
        assert_eq!(expression.to_string(), "odd kind");
        assert!(parse_expression("test", &expression.to_string()).is_err());
    }

    #[test]
    fn test_format_is_stable() {
        let source = "a: 1; \"odd name\": x or y; button(enabled and not hidden) { if(1) { z: 2; } empty {} }";
        let formatted = format_rules(&parse_rules("test", source).unwrap());
        assert_eq!(
            formatted,
            "a: 1;\n\"odd name\": x or y;\nbutton(enabled and not hidden) {\n    if(1) {\n        z: 2;\n    }\n    empty {}\n}\n"
        );
        let reparsed = format_rules(&parse_rules("test", &formatted).unwrap());
        assert_eq!(reparsed, formatted);
    }
}
