//! Translates an IR graph into SQL for a target dialect.

mod dialect;
mod translator;

pub use dialect::{Dialect, DialectHandler, LimitOffsetStyle};
pub use translator::Translator;

use crate::error::Result;
use crate::ir::{Graph, InstructionId};
use crate::mapping::MappingRegistry;

/// Translates the chain feeding into `sink` into a single SQL statement for
/// `dialect`, lowering any raw backend table it reads through `registry`.
/// Convenience wrapper around [Translator] for callers that only need one
/// statement out of a graph.
pub fn translate(graph: &Graph, sink: InstructionId, dialect: Dialect, registry: &MappingRegistry) -> Result<String> {
    Translator::new(graph, dialect, registry).translate(sink)
}
