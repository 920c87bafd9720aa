//! Feature map for SQL dialects.
//!
//! The general principle is to target the generic (ANSI-ish) dialect by
//! default, and only special-case a dialect when it genuinely cannot render
//! something the generic dialect can (MS SQL's lack of `REGEXP`, its
//! `OFFSET .. FETCH` in place of `LIMIT .. OFFSET`).
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Serialize,
    Default,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    strum::VariantNames,
)]
#[strum(serialize_all = "lowercase")]
pub enum Dialect {
    Ansi,
    #[default]
    Generic,
    MsSql,
    MySql,
    Postgres,
    SQLite,
}

impl Dialect {
    pub fn handler(&self) -> Box<dyn DialectHandler> {
        match self {
            Dialect::MsSql => Box::new(MsSqlDialect),
            Dialect::MySql => Box::new(MySqlDialect),
            Dialect::Postgres => Box::new(PostgresDialect),
            Dialect::SQLite => Box::new(SQLiteDialect),
            Dialect::Ansi | Dialect::Generic => Box::new(GenericDialect),
        }
    }
}

/// How a dialect wants `LIMIT`/`OFFSET` rendered. Every dialect Kestrel
/// targets supports at least one of these two forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitOffsetStyle {
    /// `LIMIT n OFFSET m`
    LimitOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`
    OffsetFetch,
}

/// The subset of dialect-specific rendering choices the SQL translator
/// needs: identifier quoting, regex support (Open Question: dialects
/// lacking `REGEXP` reject `MATCHES`/`NOT MATCHES` rather than emit
/// incorrect SQL), and limit/offset clause shape.
pub trait DialectHandler: Debug {
    fn dialect(&self) -> Dialect;

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn supports_regexp(&self) -> bool {
        true
    }

    fn regexp_function(&self) -> &'static str {
        "REGEXP"
    }

    fn limit_offset_style(&self) -> LimitOffsetStyle {
        LimitOffsetStyle::LimitOffset
    }
}

#[derive(Debug)]
pub struct GenericDialect;
impl DialectHandler for GenericDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Generic
    }
}

#[derive(Debug)]
pub struct AnsiDialect;
impl DialectHandler for AnsiDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Ansi
    }
}

#[derive(Debug)]
pub struct SQLiteDialect;
impl DialectHandler for SQLiteDialect {
    fn dialect(&self) -> Dialect {
        Dialect::SQLite
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

#[derive(Debug)]
pub struct MySqlDialect;
impl DialectHandler for MySqlDialect {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }
}

#[derive(Debug)]
pub struct PostgresDialect;
impl DialectHandler for PostgresDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }
}

#[derive(Debug)]
pub struct MsSqlDialect;
impl DialectHandler for MsSqlDialect {
    fn dialect(&self) -> Dialect {
        Dialect::MsSql
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn supports_regexp(&self) -> bool {
        false
    }

    fn limit_offset_style(&self) -> LimitOffsetStyle {
        LimitOffsetStyle::OffsetFetch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mssql_does_not_support_regexp() {
        let handler = Dialect::MsSql.handler();
        assert!(!handler.supports_regexp());
    }

    #[test]
    fn generic_and_ansi_support_regexp() {
        assert!(Dialect::Generic.handler().supports_regexp());
        assert!(Dialect::Ansi.handler().supports_regexp());
    }

    #[test]
    fn mysql_quotes_with_backticks() {
        assert_eq!(Dialect::MySql.handler().quote_ident("col"), "`col`");
    }
}
