mod filter;
pub mod graph;
pub mod instruction;

pub use filter::{
    parse_operator, BasicComparison, BoolExp, FilterExpr, MultiComp, Operator, ReferenceValue, TimeRange,
};
pub use graph::Graph;
pub use instruction::{Instruction, InstructionId, Row};

use serde::{Deserialize, Serialize};

/// Scalar value carried by `Construct` rows, comparison operands, and
/// evaluated result cells. Kept as a closed enum rather than `serde_json::Value`
/// so the frame-native evaluator and the SQL literal-binder agree on exactly
/// what shapes exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Timestamp(chrono::DateTime<chrono::Utc>),
    Null,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bool(_) => "bool",
            Value::Timestamp(_) => "timestamp",
            Value::Null => "null",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Null => write!(f, "null"),
        }
    }
}
