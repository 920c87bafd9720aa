//! Renders an [Error] against the original source text.
//!
//! A compiled query is always a single statement block from a single source
//! string, so a caret-annotated snippet can be built by hand from line/column
//! offsets rather than pulling in a multi-file diagnostics crate for one
//! caller.

use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::error::{Error, Reason};
use crate::span::Span;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    pub code: Option<String>,
    pub reason: String,
    pub hints: Vec<String>,
    pub span: Option<Span>,
    pub location: Option<SourceLocation>,
    pub display: Option<String>,
}

/// 0-based (line, column) of an error's start and end within the source text.
#[derive(Debug, Clone, Serialize)]
pub struct SourceLocation {
    pub start: (usize, usize),
    pub end: (usize, usize),
}

impl From<Error> for ErrorMessage {
    fn from(e: Error) -> Self {
        log::debug!("{:?}", e);
        ErrorMessage {
            code: e.code.map(str::to_string),
            reason: e.reason.to_string(),
            hints: e.hints,
            span: e.span,
            location: None,
            display: None,
        }
    }
}

impl ErrorMessage {
    /// Computes line/column location and a caret-annotated snippet against
    /// `source`, the statement block the error was raised while compiling.
    pub fn composed(mut self, source: &str) -> Self {
        if let Some(span) = self.span {
            self.location = Some(compose_location(span, source));
            self.display = Some(compose_display(&self, span, source));
        }
        self
    }
}

fn compose_location(span: Span, source: &str) -> SourceLocation {
    SourceLocation {
        start: span.start_line_col(source),
        end: Span::new(span.end, span.end).start_line_col(source),
    }
}

fn compose_display(message: &ErrorMessage, span: Span, source: &str) -> String {
    let (line, col) = span.start_line_col(source);
    let line_text = source.lines().nth(line).unwrap_or("");
    let width = (span.end.saturating_sub(span.start)).max(1);

    let mut out = String::new();
    if let Some(code) = &message.code {
        out.push_str(&format!("[{code}] "));
    }
    out.push_str(&format!("error: {}\n", message.reason));
    out.push_str(&format!("  --> line {}, column {}\n", line + 1, col + 1));
    out.push_str(&format!("   | {line_text}\n"));
    out.push_str(&format!("   | {}{}\n", " ".repeat(col), "^".repeat(width)));
    for hint in &message.hints {
        out.push_str(&format!("   = hint: {hint}\n"));
    }
    out
}

impl Display for ErrorMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(display) = &self.display {
            return f.write_str(display);
        }
        let code = self.code.as_ref().map(|c| format!("[{c}] ")).unwrap_or_default();
        writeln!(f, "{code}error: {}", self.reason)?;
        for hint in &self.hints {
            writeln!(f, "  hint: {hint}")?;
        }
        Ok(())
    }
}

/// Convenience: parse/lower a block and render any error against its own
/// source in one call, the shape a CLI frontend actually wants.
pub fn compose_error(err: Error, source: &str) -> ErrorMessage {
    ErrorMessage::from(err).composed(source)
}

/// True when `reason` indicates a bug in the compiler itself rather than a
/// problem with the user's query; hosts may want to report these
/// differently (e.g. file a crash report instead of showing a query hint).
pub fn is_internal(reason: &Reason) -> bool {
    matches!(reason, Reason::Bug { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WithErrorInfo;

    #[test]
    fn composes_caret_under_span() {
        let source = "x = GET process FROM ds WHERE pid = 4";
        let err = Error::new(Reason::UnresolvedReference { name: "ds".into() })
            .with_span(Some(Span::new(4, 7)))
            .push_hint("check the data source name");
        let message = compose_error(err, source);
        let display = message.display.unwrap();
        assert!(display.contains("line 1"));
        assert!(display.contains('^'));
        assert!(display.contains("check the data source name"));
    }

    #[test]
    fn no_span_skips_location() {
        let err = Error::new(Reason::Bug { details: "unreachable".into() });
        let message = compose_error(err, "anything");
        assert!(message.location.is_none());
        assert!(message.display.is_none());
    }
}
