//! # kestrel-core
//!
//! Compiler and query-planning core for the Kestrel threat-hunting query
//! language. Takes a Kestrel statement block, lowers it into an instruction
//! graph, normalizes native field names and comparisons against OCSF through
//! a reversible schema-mapping engine, and either translates the graph to
//! SQL for a target dialect or evaluates it directly over in-memory rows.
//!
//! ```ascii
//!           Kestrel source
//!
//!    (lex)  │
//!   (parse) │
//!           ▼
//!    Statement block
//!           │
//!  (lower, apply OCSF mapping)
//!           │
//!           ▼
//!       IR graph ──────────► eval::Evaluator ──► rows
//!           │                (resolves Analytic nodes
//!           │                 against a host Connection)
//!           ▼
//!     sql::Translator
//!           │
//!           ▼
//!          SQL
//! ```
//!
//! This crate only builds the graph and the two ways of running it; it does
//! not ship a concrete SQL driver, a CLI, or a host binary. See
//! [eval::Connection] for the trait a host implements to run the generated
//! SQL against a real backend, and [frame::FrameEvaluator] for running a
//! graph entirely in-process without one.
//!
//! ## Common use-cases
//!
//! - Compile Kestrel source straight to SQL:
//!
//!   ```
//!   use kestrel_core::{compile, MappingRegistry};
//!   use kestrel_core::sql::Dialect;
//!
//!   let registry = MappingRegistry::new();
//!   let graph = compile("a = GET process FROM ds WHERE pid = 4\nDISP a", &registry).unwrap();
//!   let sink = graph.get_sink_nodes()[0];
//!   let sql = kestrel_core::sql::translate(&graph, sink, Dialect::Generic, &registry).unwrap();
//!   assert!(sql.contains("pid"));
//!   ```
//!
//! - Evaluate a graph against a host-implemented [eval::Connection] (a real
//!   backend, or a test double), which also resolves any `APPLY` analytics
//!   the graph contains.
//!
//! - Evaluate a graph entirely in-process with [frame::FrameEvaluator], over
//!   named in-memory tables, no SQL or connection required.

#![forbid(unsafe_code)]

pub mod error;
mod error_message;
pub mod eval;
pub mod frame;
pub mod frontend;
pub mod ir;
pub mod mapping;
mod span;
pub mod sql;
mod utils;

pub use error::{Error, Reason, Result, WithErrorInfo};
pub use error_message::{compose_error, is_internal, ErrorMessage, SourceLocation};
pub use frontend::compile;
pub use ir::{Graph, Instruction, InstructionId, Row, Value};
pub use mapping::MappingRegistry;
pub use span::Span;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_plain_get_and_translates_to_sql() {
        let registry = MappingRegistry::new();
        let graph = compile("a = GET process FROM ds WHERE pid = 4 LIMIT 5\nDISP a", &registry).unwrap();
        let sink = graph.get_sink_nodes()[0];
        let sql = sql::translate(&graph, sink, sql::Dialect::Generic, &registry).unwrap();
        assert!(sql.contains("pid"));
        assert!(sql.contains("LIMIT 5"));
    }

    #[test]
    fn variable_reassignment_resolves_to_the_most_recent_node() {
        let registry = MappingRegistry::new();
        let graph = compile(
            "a = GET process FROM ds WHERE pid = 1\na = GET process FROM ds WHERE pid = 2\nDISP a",
            &registry,
        )
        .unwrap();
        let sink = graph.get_sink_nodes()[0];
        let sql = sql::translate(&graph, sink, sql::Dialect::Generic, &registry).unwrap();
        assert!(sql.contains('2'));
    }
}
