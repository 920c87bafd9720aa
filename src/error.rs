//! Error types produced by the compiler core.
//!
//! A single [Error] struct carries a closed [Reason] enum, an optional
//! [Span], and a list of hints, with a [WithErrorInfo] builder trait so a
//! `?`-propagated error can pick up context as it unwinds.

use std::fmt;

use crate::span::Span;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
pub struct Error {
    pub span: Option<Span>,
    pub reason: Reason,
    pub hints: Vec<String>,
    pub code: Option<&'static str>,
}

/// One variant per error kind named in the error-handling design: unresolved
/// references, malformed mappings, dialect limitations, and so on. Kept as a
/// closed enum (rather than one type per kind) so callers can match
/// exhaustively.
#[derive(Debug, Clone)]
pub enum Reason {
    /// Kestrel source did not match the grammar.
    ParseError { message: String },
    /// A `Reference(name)` node has no matching `Variable` in scope.
    UnresolvedReference { name: String },
    /// An operator is incompatible with its operand types.
    InvalidComparison { message: String },
    /// An operator cannot be rendered for the active SQL dialect.
    UnsupportedOperator { operator: String, dialect: String },
    /// A named datasource/connection could not be found.
    SourceNotFound { name: String },
    /// A projection needs a known source schema but none was supplied.
    SourceSchemaNotFound,
    /// A reference comparison's column arity differs from its value arity.
    MismatchedFieldValueInMultiColumnComparison { fields: usize, values: usize },
    /// A multi-column reference comparison used an operator other than IN/NOT IN.
    InvalidOperatorInMultiColumnComparison { operator: String },
    /// A configured entity identifier is absent from a data-model mapping.
    IncompleteDataMapping { entity: String, identifier: String },
    /// A mapping file is structurally malformed.
    InvalidMapping { message: String },
    /// Two `ProjectEntity` instructions appeared in one translator chain.
    DualEntityProjection,
    /// An error surfaced verbatim from the backend connection.
    BackendError { message: String },
    /// Malformed or unreachable internal state.
    Bug { details: String },
}

impl Error {
    pub fn new(reason: Reason) -> Self {
        Error {
            span: None,
            reason,
            hints: Vec::new(),
            code: None,
        }
    }

    pub fn bug<S: ToString>(details: S) -> Self {
        Error::new(Reason::Bug {
            details: details.to_string(),
        })
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::ParseError { message } => write!(f, "parse error: {message}"),
            Reason::UnresolvedReference { name } => {
                write!(f, "reference to undefined variable `{name}`")
            }
            Reason::InvalidComparison { message } => write!(f, "invalid comparison: {message}"),
            Reason::UnsupportedOperator { operator, dialect } => {
                write!(f, "operator `{operator}` is not supported by dialect {dialect}")
            }
            Reason::SourceNotFound { name } => write!(f, "datasource `{name}` not found"),
            Reason::SourceSchemaNotFound => {
                write!(f, "projection requires a known source schema, but none was provided")
            }
            Reason::MismatchedFieldValueInMultiColumnComparison { fields, values } => write!(
                f,
                "comparison has {fields} field(s) but {values} value(s)"
            ),
            Reason::InvalidOperatorInMultiColumnComparison { operator } => write!(
                f,
                "multi-column reference comparison cannot use operator `{operator}`; only IN/NOT IN are valid"
            ),
            Reason::IncompleteDataMapping { entity, identifier } => write!(
                f,
                "identifier `{identifier}` for entity `{entity}` is missing in data mapping"
            ),
            Reason::InvalidMapping { message } => write!(f, "invalid mapping file: {message}"),
            Reason::DualEntityProjection => {
                write!(f, "a translator chain cannot contain two ProjectEntity instructions")
            }
            Reason::BackendError { message } => write!(f, "backend error: {message}"),
            Reason::Bug { details } => write!(f, "internal compiler error: {details}"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "[{code}] ")?;
        }
        write!(f, "{}", self.reason)?;
        for hint in &self.hints {
            write!(f, "\n  hint: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

pub trait WithErrorInfo: Sized {
    fn push_hint<S: Into<String>>(self, hint: S) -> Self;
    fn with_span(self, span: Option<Span>) -> Self;
    fn with_code(self, code: &'static str) -> Self;
}

impl WithErrorInfo for Error {
    fn push_hint<S: Into<String>>(mut self, hint: S) -> Self {
        self.hints.push(hint.into());
        self
    }

    fn with_span(mut self, span: Option<Span>) -> Self {
        self.span = span;
        self
    }

    fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }
}

impl<T, E: WithErrorInfo> WithErrorInfo for Result<T, E> {
    fn push_hint<S: Into<String>>(self, hint: S) -> Self {
        self.map_err(|e| e.push_hint(hint))
    }

    fn with_span(self, span: Option<Span>) -> Self {
        self.map_err(|e| e.with_span(span))
    }

    fn with_code(self, code: &'static str) -> Self {
        self.map_err(|e| e.with_code(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_hints() {
        let err = Error::new(Reason::UnresolvedReference {
            name: "foo".to_string(),
        })
        .push_hint("did you forget to assign `foo`?");
        let rendered = err.to_string();
        assert!(rendered.contains("foo"));
        assert!(rendered.contains("did you forget"));
    }
}
