use super::ParseError;
use ariadne::{Config, Label, Report, ReportKind, Source};
use std::fmt;
use std::io;
use std::ops::Range;
use thiserror::Error;

/// One lexing or parsing failure, located in the source text.
///
/// `Display` renders `file:line:column: message`, the offending source line
/// and a caret under the failing column.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{file}:{line}:{column}: {message}\n{source_line}\n{caret}")]
pub struct Diagnostic {
    pub file: String,
    /// Byte range into the source text.
    pub span: Range<usize>,
    /// 1-based.
    pub line: usize,
    /// 1-based, counted in characters.
    pub column: usize,
    pub source_line: String,
    pub caret: String,
    pub message: String,
    pub label: String,
}

impl Diagnostic {
    pub fn new(
        file: &str,
        source_code: &str,
        span: Range<usize>,
        message: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        let offset = span.start.min(source_code.len());
        let offset = floor_char_boundary(source_code, offset);
        let line_start = source_code[..offset].rfind('\n').map_or(0, |index| index + 1);
        let line_end = source_code[offset..]
            .find('\n')
            .map_or(source_code.len(), |index| offset + index);
        let source_line = source_code[line_start..line_end].trim_end_matches('\r');
        let before = &source_code[line_start..offset];
        // Tabs stay tabs so the caret lines up in terminals
        let mut caret: String = before
            .chars()
            .map(|character| if character == '\t' { '\t' } else { ' ' })
            .collect();
        caret.push('^');
        Self {
            file: file.to_owned(),
            span,
            line: source_code[..offset].matches('\n').count() + 1,
            column: before.chars().count() + 1,
            source_line: source_line.to_owned(),
            caret,
            message: message.into(),
            label: label.into(),
        }
    }

    pub fn from_errors<'code, T: fmt::Display + 'code>(
        file: &str,
        source_code: &str,
        errors: impl IntoIterator<Item = ParseError<'code, T>>,
    ) -> Vec<Self> {
        let mut diagnostics: Vec<Self> = errors
            .into_iter()
            .map(|error| {
                Self::new(
                    file,
                    source_code,
                    error.span().into_range(),
                    error.to_string(),
                    error.reason().to_string(),
                )
            })
            .collect();
        if diagnostics.is_empty() {
            // A failed parse always carries at least one diagnostic
            let end = source_code.len();
            diagnostics.push(Self::new(
                file,
                source_code,
                end..end,
                "unexpected end of input",
                "input ends here",
            ));
        }
        diagnostics
    }

    /// Writes a multi-line report with the source excerpt, the way a compiler would.
    pub fn write_report(
        &self,
        source_code: &str,
        colored: bool,
        writer: impl io::Write,
    ) -> io::Result<()> {
        let span = char_range(source_code, &self.span);
        let file = self.file.as_str();
        Report::build(ReportKind::Error, (file, span.clone()))
            .with_config(Config::default().with_color(colored))
            .with_message(&self.message)
            .with_label(Label::new((file, span)).with_message(&self.label))
            .finish()
            .write((file, Source::from(source_code)), writer)
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn char_range(source_code: &str, span: &Range<usize>) -> Range<usize> {
    let to_chars = |offset: usize| {
        let offset = floor_char_boundary(source_code, offset.min(source_code.len()));
        source_code[..offset].chars().count()
    };
    to_chars(span.start)..to_chars(span.end)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    #[error("{}", render(.0))]
    Lex(Vec<Diagnostic>),
    #[error("{}", render(.0))]
    Parse(Vec<Diagnostic>),
}

impl RulesError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Lex(diagnostics) | Self::Parse(diagnostics) => diagnostics,
        }
    }
}

fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_and_column() {
        let source = "a: 1;\n\tb: é #;\n";
        let offset = source.find('#').unwrap();
        let diagnostic = Diagnostic::new("x.rules", source, offset..offset + 1, "bad", "here");
        assert_eq!(diagnostic.line, 2);
        assert_eq!(diagnostic.column, 7);
        assert_eq!(diagnostic.source_line, "\tb: é #;");
        assert_eq!(diagnostic.caret, "\t     ^");
        assert_eq!(
            diagnostic.to_string(),
            "x.rules:2:7: bad\n\tb: é #;\n\t     ^"
        );
    }

    #[test]
    fn test_error_at_end_of_input() {
        let source = "a: 1";
        let diagnostic = Diagnostic::new("x.rules", source, 4..4, "missing ';'", "here");
        assert_eq!((diagnostic.line, diagnostic.column), (1, 5));
        assert_eq!(diagnostic.caret, "    ^");
    }

    #[test]
    fn test_report_mentions_message() {
        let source = "a: 1 +;";
        let diagnostic = Diagnostic::new("x.rules", source, 6..7, "unexpected ';'", "here");
        let mut report = Vec::new();
        diagnostic.write_report(source, false, &mut report).unwrap();
        let report = String::from_utf8(report).unwrap();
        assert!(report.contains("unexpected ';'"));
        assert!(report.contains("x.rules"));
    }

    #[test]
    fn test_rules_error_renders_every_diagnostic() {
        let source = "a\nb";
        let error = RulesError::Parse(vec![
            Diagnostic::new("x.rules", source, 0..1, "first", ""),
            Diagnostic::new("x.rules", source, 2..3, "second", ""),
        ]);
        let rendered = error.to_string();
        assert!(rendered.starts_with("x.rules:1:1: first"));
        assert!(rendered.contains("x.rules:2:1: second"));
        assert_eq!(error.diagnostics().len(), 2);
    }
}
