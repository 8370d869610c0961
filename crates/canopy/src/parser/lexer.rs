use super::{ParseError, Span, Spanned};
use chumsky::prelude::*;
use num_bigint::BigInt;
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token<'code> {
    BracketRoundOpen,
    BracketRoundClose,
    BracketCurlyOpen,
    BracketCurlyClose,
    Colon,
    Semicolon,
    Comma,
    Dot,
    Equal,
    NotEqual,
    LessOrEqual,
    GreaterOrEqual,
    Less,
    Greater,
    Plus,
    Minus,
    Asterisk,
    Slash,
    TildeSlash,
    Percent,
    Not,
    And,
    Or,
    Identifier(&'code str),
    // Escapes are already resolved
    Text(String),
    Integer(BigInt),
    Double(f64),
}

impl<'code> Token<'code> {
    pub fn into_cow_str(self) -> Cow<'code, str> {
        match self {
            Self::BracketRoundOpen => "(".into(),
            Self::BracketRoundClose => ")".into(),
            Self::BracketCurlyOpen => "{".into(),
            Self::BracketCurlyClose => "}".into(),
            Self::Colon => ":".into(),
            Self::Semicolon => ";".into(),
            Self::Comma => ",".into(),
            Self::Dot => ".".into(),
            Self::Equal => "==".into(),
            Self::NotEqual => "!=".into(),
            Self::LessOrEqual => "<=".into(),
            Self::GreaterOrEqual => ">=".into(),
            Self::Less => "<".into(),
            Self::Greater => ">".into(),
            Self::Plus => "+".into(),
            Self::Minus => "-".into(),
            Self::Asterisk => "*".into(),
            Self::Slash => "/".into(),
            Self::TildeSlash => "~/".into(),
            Self::Percent => "%".into(),
            Self::Not => "not".into(),
            Self::And => "and".into(),
            Self::Or => "or".into(),
            Self::Identifier(identifier) => identifier.into(),
            Self::Text(text) => format!("{text:?}").into(),
            Self::Integer(integer) => integer.to_string().into(),
            Self::Double(double) => double.to_string().into(),
        }
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.clone().into_cow_str())
    }
}

pub fn lexer<'code>()
-> impl Parser<'code, &'code str, Vec<Spanned<Token<'code>>>, extra::Err<ParseError<'code, char>>> {
    let bracket = choice((
        just('(').to(Token::BracketRoundOpen),
        just(')').to(Token::BracketRoundClose),
        just('{').to(Token::BracketCurlyOpen),
        just('}').to(Token::BracketCurlyClose),
    ));

    let punctuation = choice((
        just(':').to(Token::Colon),
        just(';').to(Token::Semicolon),
        just(',').to(Token::Comma),
        just('.').to(Token::Dot),
    ));

    let comparator = choice((
        just("==").to(Token::Equal),
        just("!=").to(Token::NotEqual),
        just("<=").to(Token::LessOrEqual),
        just(">=").to(Token::GreaterOrEqual),
        just('<').to(Token::Less),
        just('>').to(Token::Greater),
    ));

    let arithmetic_operator = choice((
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Asterisk),
        just("~/").to(Token::TildeSlash),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
    ));

    let exponent = one_of("eE")
        .then(one_of("+-").or_not())
        .then(text::digits(10));

    // A number must not run straight into a word: `2x` and `1and` are errors
    let word_follows = any()
        .filter(|character: &char| character.is_alphanumeric() || *character == '_');

    let double = text::digits(10)
        .then(just('.'))
        .then(text::digits(10))
        .then(exponent.or_not())
        .to_slice()
        .from_str()
        .unwrapped()
        .map(Token::Double)
        .then_ignore(word_follows.clone().not());

    let integer = text::digits(10)
        .to_slice()
        .from_str()
        .unwrapped()
        .map(Token::Integer)
        .then_ignore(word_follows.not());

    let double_quoted = just('"')
        .ignore_then(none_of("\\\"").or(escape()).repeated().collect::<String>())
        .then_ignore(just('"'))
        .map(Token::Text);

    let single_quoted = just('\'')
        .ignore_then(none_of("\\'").or(escape()).repeated().collect::<String>())
        .then_ignore(just('\''))
        .map(Token::Text);

    // `not`, `and` and `or` are only recognized as whole words, so `android` stays an identifier
    let identifier_or_keyword = any()
        .filter(|character: &char| character.is_alphabetic() || *character == '_')
        .then(
            any()
                .filter(|character: &char| character.is_alphanumeric() || *character == '_')
                .repeated(),
        )
        .to_slice()
        .map(|identifier: &str| match identifier {
            "not" => Token::Not,
            "and" => Token::And,
            "or" => Token::Or,
            _ => Token::Identifier(identifier),
        });

    let line_comment = just("//")
        .then(any().and_is(text::newline().not()).repeated())
        .ignored();

    let block_comment = just("/*")
        .then(any().and_is(just("*/").not()).repeated())
        .then(just("*/"))
        .ignored();

    let trivia = choice((
        text::whitespace().at_least(1).ignored(),
        line_comment,
        block_comment,
    ))
    .repeated();

    let token = choice((
        bracket,
        punctuation,
        comparator,
        arithmetic_operator,
        double,
        integer,
        double_quoted,
        single_quoted,
        identifier_or_keyword,
    ));

    trivia.clone().ignore_then(
        token
            .map_with(|token, extra| Spanned {
                node: token,
                span: extra.span(),
            })
            .then_ignore(trivia)
            .recover_with(skip_then_retry_until(any().ignored(), end()))
            .repeated()
            .collect(),
    )
}

fn escape<'code>() -> impl Parser<'code, &'code str, char, extra::Err<ParseError<'code, char>>> + Clone
{
    just('\\').ignore_then(choice((
        just('n').to('\n'),
        just('r').to('\r'),
        just('t').to('\t'),
        just('a').to('\x07'),
        just('b').to('\x08'),
        just('f').to('\x0C'),
        just('v').to('\x0B'),
        just('0').to('\0'),
        just('x').ignore_then(code_point(2)),
        just('u').ignore_then(code_point(4)),
        any(),
    )))
}

fn code_point<'code>(
    digits: usize,
) -> impl Parser<'code, &'code str, char, extra::Err<ParseError<'code, char>>> + Clone {
    any()
        .filter(char::is_ascii_hexdigit)
        .repeated()
        .at_least(digits)
        .at_most(digits)
        .to_slice()
        .try_map(|hex: &str, span: Span| {
            u32::from_str_radix(hex, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| {
                    ParseError::custom(span, format!("'{hex}' is not a valid code point"))
                })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chumsky::prelude::Parser;

    fn tokens(code: &str) -> Vec<Token<'_>> {
        lexer()
            .parse(code)
            .into_output()
            .unwrap()
            .into_iter()
            .map(|token| token.node)
            .collect()
    }

    #[test]
    fn test_comments_are_skipped() {
        let code = "a /* block\n comment */ : // line comment\n 1 ;";
        assert_eq!(
            tokens(code),
            vec![
                Token::Identifier("a"),
                Token::Colon,
                Token::Integer(BigInt::from(1)),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn test_keywords_need_delimiters() {
        assert_eq!(
            tokens("android or nothing and not_me not x"),
            vec![
                Token::Identifier("android"),
                Token::Or,
                Token::Identifier("nothing"),
                Token::And,
                Token::Identifier("not_me"),
                Token::Not,
                Token::Identifier("x"),
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("a<=b>=c!=d==e<f>g~/h/i%j*k+l-m"),
            vec![
                Token::Identifier("a"),
                Token::LessOrEqual,
                Token::Identifier("b"),
                Token::GreaterOrEqual,
                Token::Identifier("c"),
                Token::NotEqual,
                Token::Identifier("d"),
                Token::Equal,
                Token::Identifier("e"),
                Token::Less,
                Token::Identifier("f"),
                Token::Greater,
                Token::Identifier("g"),
                Token::TildeSlash,
                Token::Identifier("h"),
                Token::Slash,
                Token::Identifier("i"),
                Token::Percent,
                Token::Identifier("j"),
                Token::Asterisk,
                Token::Identifier("k"),
                Token::Plus,
                Token::Identifier("l"),
                Token::Minus,
                Token::Identifier("m"),
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let code = r#""tab\tnew\nbell\aquote\"hex\x41uniézero\0other\q""#;
        assert_eq!(
            tokens(code),
            vec![Token::Text(
                "tab\tnew\nbell\x07quote\"hexAuni\u{e9}zero\0otherq".to_string()
            )]
        );
        assert_eq!(tokens("'it\\'s'"), vec![Token::Text("it's".to_string())]);
    }

    #[test]
    fn test_numbers_need_delimiters() {
        for code in ["2x", "1and 2", "1.5px", "3_000"] {
            assert!(lexer().parse(code).has_errors(), "{code} should not lex");
        }
        assert_eq!(
            tokens("2 x 3.x"),
            vec![
                Token::Integer(BigInt::from(2)),
                Token::Identifier("x"),
                Token::Integer(BigInt::from(3)),
                Token::Dot,
                Token::Identifier("x"),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let huge = "123456789012345678901234567890";
        assert_eq!(
            tokens(&format!("{huge} 1.5 2.0e3 7")),
            vec![
                Token::Integer(huge.parse().unwrap()),
                Token::Double(1.5),
                Token::Double(2000.0),
                Token::Integer(BigInt::from(7)),
            ]
        );
    }

    #[test]
    fn test_unknown_character_is_reported() {
        let (_, errors) = lexer().parse("a # b").into_output_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].span().start, 2);
    }

    #[test]
    fn test_unterminated_string_is_reported() {
        let (_, errors) = lexer().parse("name: \"open;").into_output_errors();
        assert!(!errors.is_empty());
    }
}
