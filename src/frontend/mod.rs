//! Parses Kestrel statement blocks and lowers them into an IR graph.
//!
//! The grammar is small enough that a hand-written recursive-descent parser
//! over a hand-written lexer is clearer than pulling in a parser-combinator
//! crate; caret-style span information is threaded through both stages so
//! errors can point back at the exact token that caused them.

mod ast;
mod lexer;
mod lower;
mod parser;

pub use ast::{Block, Source, Statement, StatementKind};
pub use lower::Lowerer;
pub use parser::parse;

use chrono::Utc;

use crate::error::Result;
use crate::ir::Graph;
use crate::mapping::MappingRegistry;

/// Parses and lowers a Kestrel statement block in one step, against the
/// process-wide default mapping registry and the current wall-clock time.
pub fn compile(source: &str, registry: &MappingRegistry) -> Result<Graph> {
    let block = parse(source)?;
    Lowerer::new(registry, Utc::now()).lower(&block)
}
