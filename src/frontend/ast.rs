use crate::ir::Value;
use crate::span::Span;

#[derive(Debug, Clone)]
pub struct Block {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Assign { target: String, source: Source },
    Disp { variable: String },
    Explain { variable: String },
}

#[derive(Debug, Clone)]
pub enum Source {
    New {
        entity_type: Option<String>,
        rows: Vec<Vec<(String, Value)>>,
    },
    Get {
        entity_type: String,
        datasource: String,
        clauses: Clauses,
    },
    Find {
        relation: String,
        entity_type: String,
        base_variable: String,
        clauses: Clauses,
    },
    Transform {
        base_variable: String,
        attrs: Option<Vec<String>>,
        clauses: Clauses,
    },
    Apply {
        analytic: String,
        on_variable: String,
        args: Vec<(String, Value)>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Clauses {
    pub filter: Option<BoolExprAst>,
    pub timespan: Option<TimespanAst>,
    pub sort: Option<(String, bool)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum TimespanAst {
    Absolute { start: String, stop: String },
    /// `LAST <n> <unit>`, e.g. `LAST 5 MINUTES`.
    Relative { amount: i64, unit: String },
}

#[derive(Debug, Clone)]
pub enum BoolExprAst {
    And(Box<BoolExprAst>, Box<BoolExprAst>),
    Or(Box<BoolExprAst>, Box<BoolExprAst>),
    Comparison(ComparisonAst),
}

#[derive(Debug, Clone)]
pub struct ComparisonAst {
    pub field: String,
    pub op: String,
    pub rhs: ComparisonRhs,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ComparisonRhs {
    Value(Value),
    ValueList(Vec<Value>),
    Reference { variable: String, field: String },
}
