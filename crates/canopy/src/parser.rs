use chumsky::{input::ValueInput, pratt::*, prelude::*};
use num_bigint::BigInt;
use ordered_float::OrderedFloat;
use std::sync::Arc;

mod lexer;
pub use lexer::{Token, lexer};

mod diagnostic;
pub use diagnostic::{Diagnostic, RulesError};

mod flatten;
pub use flatten::{Rule, flatten};

mod format;
pub use format::{format_rules, is_plain_name};

pub use chumsky::prelude::{Input, Parser};

pub type Span = SimpleSpan;
pub type ParseError<'code, T> = Rich<'code, T, Span>;

#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    Identifier(Arc<str>),
    StringLiteral(Arc<str>),
    IntegerLiteral(BigInt),
    DoubleLiteral(OrderedFloat<f64>),
    Unary {
        operator: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Apply {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
    },
}

impl Expression {
    pub fn identifier(name: impl Into<Arc<str>>) -> Self {
        Self::Identifier(name.into())
    }

    pub fn unary(operator: UnaryOperator, operand: Expression) -> Self {
        Self::Unary {
            operator,
            operand: Box::new(operand),
        }
    }

    pub fn binary(operator: BinaryOperator, left: Expression, right: Expression) -> Self {
        Self::Binary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOperator::And, left, right)
    }

    pub fn apply(callee: Expression, arguments: Vec<Expression>) -> Self {
        Self::Apply {
            callee: Box::new(callee),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Negate,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    TruncatingDivide,
    Modulo,
    /// `target.name`, the right side is always an identifier or string literal.
    Member,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Declaration(Declaration),
    Selector(Selector),
}

/// `property: value;`
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub property: Arc<str>,
    pub value: Expression,
    pub span: Span,
}

/// `kind(condition) { statements }`, where `kind` may also be `if` or a relationship name.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub kind: Arc<str>,
    pub condition: Option<Expression>,
    pub statements: Vec<Statement>,
    pub span: Span,
}

enum Suffix {
    Member(Expression),
    Arguments(Vec<Expression>),
}

pub fn expression<'code, I>()
-> impl Parser<'code, I, Expression, extra::Err<ParseError<'code, Token<'code>>>> + Clone
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    recursive(|expression| {
        let bracket_round_open = just(Token::BracketRoundOpen);
        let bracket_round_close = just(Token::BracketRoundClose);

        let name = select! {
            Token::Identifier(identifier) => Expression::Identifier(identifier.into()),
            Token::Text(text) => Expression::StringLiteral(text.into()),
        };

        let literal = select! {
            Token::Identifier(identifier) => Expression::Identifier(identifier.into()),
            Token::Text(text) => Expression::StringLiteral(text.into()),
            Token::Integer(integer) => Expression::IntegerLiteral(integer),
            Token::Double(double) => Expression::DoubleLiteral(OrderedFloat(double)),
        };

        let nested = expression
            .clone()
            .delimited_by(bracket_round_open.clone(), bracket_round_close.clone());

        let member = just(Token::Dot).ignore_then(name).map(Suffix::Member);

        let arguments = expression
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(bracket_round_open, bracket_round_close)
            .map(Suffix::Arguments);

        // Member access and application bind tighter than any prefix operator
        let suffix_chain = literal.or(nested).foldl(
            choice((member, arguments)).repeated(),
            |target, suffix| match suffix {
                Suffix::Member(name) => Expression::binary(BinaryOperator::Member, target, name),
                Suffix::Arguments(arguments) => Expression::apply(target, arguments),
            },
        );

        let comparator = select! {
            Token::Equal => BinaryOperator::Equal,
            Token::NotEqual => BinaryOperator::NotEqual,
            Token::Less => BinaryOperator::Less,
            Token::Greater => BinaryOperator::Greater,
            Token::LessOrEqual => BinaryOperator::LessOrEqual,
            Token::GreaterOrEqual => BinaryOperator::GreaterOrEqual,
        };

        let additive = select! {
            Token::Plus => BinaryOperator::Add,
            Token::Minus => BinaryOperator::Subtract,
        };

        let multiplicative = select! {
            Token::Asterisk => BinaryOperator::Multiply,
            Token::Slash => BinaryOperator::Divide,
            Token::TildeSlash => BinaryOperator::TruncatingDivide,
            Token::Percent => BinaryOperator::Modulo,
        };

        let sign = select! {
            Token::Plus => UnaryOperator::Plus,
            Token::Minus => UnaryOperator::Negate,
        };

        suffix_chain.pratt((
            // Precedence 1 (lowest): or
            infix(left(1), just(Token::Or), |l, _, r, _| {
                Expression::binary(BinaryOperator::Or, l, r)
            }),
            // Precedence 2: and
            infix(left(2), just(Token::And), |l, _, r, _| {
                Expression::binary(BinaryOperator::And, l, r)
            }),
            // Precedence 3: not and comparisons share a level, so `not a == b` is `not (a == b)`
            prefix(3, just(Token::Not), |_, operand, _| {
                Expression::unary(UnaryOperator::Not, operand)
            }),
            infix(left(3), comparator, |l, operator, r, _| {
                Expression::binary(operator, l, r)
            }),
            // Precedence 4: additive operators
            infix(left(4), additive, |l, operator, r, _| {
                Expression::binary(operator, l, r)
            }),
            // Precedence 5: multiplicative operators
            infix(left(5), multiplicative, |l, operator, r, _| {
                Expression::binary(operator, l, r)
            }),
            // Precedence 6: unary sign
            prefix(6, sign, |operator, operand, _| {
                Expression::unary(operator, operand)
            }),
        ))
    })
}

pub fn parser<'code, I>()
-> impl Parser<'code, I, Vec<Statement>, extra::Err<ParseError<'code, Token<'code>>>>
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    let name = select! {
        Token::Identifier(identifier) => Arc::<str>::from(identifier),
        Token::Text(text) => Arc::<str>::from(text),
    };
    let expression = expression();

    recursive(|statements| {
        let declaration = name
            .clone()
            .then_ignore(just(Token::Colon))
            .then(expression.clone())
            .then_ignore(just(Token::Semicolon))
            .map_with(|(property, value), extra| {
                Statement::Declaration(Declaration {
                    property,
                    value,
                    span: extra.span(),
                })
            });

        let selector = name
            .then(
                expression
                    .delimited_by(just(Token::BracketRoundOpen), just(Token::BracketRoundClose))
                    .or_not(),
            )
            .then(
                statements
                    .delimited_by(just(Token::BracketCurlyOpen), just(Token::BracketCurlyClose)),
            )
            .map_with(|((kind, condition), statements), extra| {
                Statement::Selector(Selector {
                    kind,
                    condition,
                    statements,
                    span: extra.span(),
                })
            });

        declaration.or(selector).repeated().collect::<Vec<_>>()
    })
}

fn tokenize<'code>(
    file_name: &str,
    source_code: &'code str,
) -> Result<Vec<Spanned<Token<'code>>>, RulesError> {
    let (tokens, errors) = lexer().parse(source_code).into_output_errors();
    if !errors.is_empty() {
        return Err(RulesError::Lex(Diagnostic::from_errors(
            file_name,
            source_code,
            errors,
        )));
    }
    Ok(tokens.unwrap_or_default())
}

/// Parses a whole rule file into its statement tree.
pub fn parse_rules(file_name: &str, source_code: &str) -> Result<Vec<Statement>, RulesError> {
    let tokens = tokenize(file_name, source_code)?;
    let input = tokens.as_slice().map(
        Span::from(source_code.len()..source_code.len()),
        |Spanned { node, span }| (node, span),
    );
    let (statements, errors) = parser().parse(input).into_output_errors();
    if !errors.is_empty() {
        return Err(RulesError::Parse(Diagnostic::from_errors(
            file_name,
            source_code,
            errors,
        )));
    }
    Ok(statements.unwrap_or_default())
}

/// Parses a single expression, e.g. a condition typed by a user.
pub fn parse_expression(file_name: &str, source_code: &str) -> Result<Expression, RulesError> {
    let tokens = tokenize(file_name, source_code)?;
    let input = tokens.as_slice().map(
        Span::from(source_code.len()..source_code.len()),
        |Spanned { node, span }| (node, span),
    );
    let (expression, errors) = expression().parse(input).into_output_errors();
    match expression {
        Some(expression) if errors.is_empty() => Ok(expression),
        _ => Err(RulesError::Parse(Diagnostic::from_errors(
            file_name,
            source_code,
            errors,
        ))),
    }
}

/// Parses and flattens a rule file, ready for [`crate::engine::Tree::set_rules`].
pub fn load_rules(file_name: &str, source_code: &str) -> Result<Vec<Rule>, RulesError> {
    let statements = parse_rules(file_name, source_code)?;
    Ok(flatten(&statements))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(code: &str) -> Expression {
        parse_expression("test.rules", code).unwrap()
    }

    fn id(name: &str) -> Expression {
        Expression::identifier(name)
    }

    fn int(value: i64) -> Expression {
        Expression::IntegerLiteral(BigInt::from(value))
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        assert_eq!(
            parse("a or b and c"),
            Expression::binary(BinaryOperator::Or, id("a"), Expression::and(id("b"), id("c")))
        );
    }

    #[test]
    fn test_not_applies_to_whole_comparison() {
        assert_eq!(
            parse("not a == b"),
            Expression::unary(
                UnaryOperator::Not,
                Expression::binary(BinaryOperator::Equal, id("a"), id("b"))
            )
        );
    }

    #[test]
    fn test_not_binds_tighter_than_and() {
        assert_eq!(
            parse("not a and b"),
            Expression::and(Expression::unary(UnaryOperator::Not, id("a")), id("b"))
        );
    }

    #[test]
    fn test_arithmetic_precedence_and_associativity() {
        assert_eq!(
            parse("1 + 2 * 3 - 4"),
            Expression::binary(
                BinaryOperator::Subtract,
                Expression::binary(
                    BinaryOperator::Add,
                    int(1),
                    Expression::binary(BinaryOperator::Multiply, int(2), int(3))
                ),
                int(4)
            )
        );
        assert_eq!(
            parse("7 ~/ 2 % 3"),
            Expression::binary(
                BinaryOperator::Modulo,
                Expression::binary(BinaryOperator::TruncatingDivide, int(7), int(2)),
                int(3)
            )
        );
    }

    #[test]
    fn test_suffix_chain_binds_tighter_than_sign() {
        assert_eq!(
            parse("-a.b(c)"),
            Expression::unary(
                UnaryOperator::Negate,
                Expression::apply(
                    Expression::binary(BinaryOperator::Member, id("a"), id("b")),
                    vec![id("c")]
                )
            )
        );
    }

    #[test]
    fn test_suffix_chain_interleaves_member_and_apply() {
        assert_eq!(
            parse("a.b(c).d"),
            Expression::binary(
                BinaryOperator::Member,
                Expression::apply(
                    Expression::binary(BinaryOperator::Member, id("a"), id("b")),
                    vec![id("c")]
                ),
                id("d")
            )
        );
    }

    #[test]
    fn test_application_arguments() {
        assert_eq!(
            parse("f()(1, 'x')"),
            Expression::apply(
                Expression::apply(id("f"), vec![]),
                vec![int(1), Expression::StringLiteral("x".into())]
            )
        );
    }

    #[test]
    fn test_statements() {
        let statements = parse_rules(
            "test.rules",
            "color: 'red'; button(enabled) { if(x > 1) { size: 2; } \"odd name\": 1; }",
        )
        .unwrap();
        assert_eq!(statements.len(), 2);
        let Statement::Selector(selector) = &statements[1] else {
            panic!("Expected selector, got {:?}", statements[1]);
        };
        assert_eq!(&*selector.kind, "button");
        assert_eq!(selector.condition, Some(id("enabled")));
        assert_eq!(selector.statements.len(), 2);
        assert!(matches!(
            &selector.statements[1],
            Statement::Declaration(Declaration { property, .. }) if &**property == "odd name"
        ));
    }

    #[test]
    fn test_empty_source() {
        assert!(parse_rules("empty.rules", "  // nothing here\n").unwrap().is_empty());
    }

    #[test]
    fn test_missing_semicolon_is_reported() {
        let error = parse_rules("broken.rules", "a: 1\nb: 2;").unwrap_err();
        let RulesError::Parse(diagnostics) = error else {
            panic!("Expected parse error, got {error:?}");
        };
        assert_eq!(diagnostics[0].file, "broken.rules");
        assert_eq!(diagnostics[0].line, 2);
    }

    #[test]
    fn test_dangling_operator_is_reported() {
        assert!(parse_expression("input", "a and").is_err());
        assert!(parse_expression("input", "").is_err());
    }
}
