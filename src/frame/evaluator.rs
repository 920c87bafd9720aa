//! In-memory counterpart to [crate::sql::Translator]: evaluates an IR graph
//! directly over `Vec<Row>` frames instead of generating SQL. Selected when
//! a sink's data lives entirely in an in-process cache (no backend
//! connection needed), and used by this crate's own integration tests to
//! check frame results against the SQL path without standing up a database.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{Error, Reason, Result};
use crate::ir::{BasicComparison, BoolExp, FilterExpr, Graph, Instruction, InstructionId, MultiComp, Operator, Row, Value};
use crate::mapping::MappingRegistry;

use super::analytics::AnalyticsRegistry;

/// Evaluates IR graphs over named in-memory tables, normalizing native
/// `DataSource` rows to OCSF via a [MappingRegistry] the same way the SQL
/// path does through the schema-mapping engine.
pub struct FrameEvaluator<'a> {
    registry: &'a MappingRegistry,
    analytics: AnalyticsRegistry,
    tables: BTreeMap<String, Vec<Row>>,
}

impl<'a> FrameEvaluator<'a> {
    pub fn new(registry: &'a MappingRegistry) -> Self {
        FrameEvaluator {
            registry,
            analytics: AnalyticsRegistry::new(),
            tables: BTreeMap::new(),
        }
    }

    pub fn with_analytics(mut self, analytics: AnalyticsRegistry) -> Self {
        self.analytics = analytics;
        self
    }

    /// Registers the rows a `DataSource { name }` node should resolve to.
    pub fn register_table(&mut self, name: impl Into<String>, rows: Vec<Row>) {
        self.tables.insert(name.into(), rows);
    }

    pub fn evaluate(&self, graph: &Graph, sink: InstructionId) -> Result<Vec<Row>> {
        let source = match graph.node(sink) {
            Some(Instruction::Return) | Some(Instruction::Explain) => {
                let (trunk, _) = graph.get_trunk_n_branches(sink)?;
                *trunk.first().ok_or_else(|| Error::bug("sink node has no predecessor"))?
            }
            Some(_) => sink,
            None => return Err(Error::bug(format!("no such node {sink}"))),
        };
        self.eval_node(graph, source)
    }

    fn eval_node(&self, graph: &Graph, node: InstructionId) -> Result<Vec<Row>> {
        match graph.node(node).ok_or_else(|| Error::bug(format!("no such node {node}")))? {
            Instruction::Construct { rows } => Ok(rows.clone()),
            Instruction::DataSource { name } => self.tables.get(name).cloned().ok_or_else(|| {
                Error::new(Reason::SourceNotFound { name: name.clone() })
            }),
            Instruction::Variable { .. } => {
                let (trunk, _) = graph.get_trunk_n_branches(node)?;
                let pred = trunk.first().ok_or_else(|| Error::bug("Variable node has no predecessor"))?;
                self.eval_node(graph, *pred)
            }
            Instruction::ProjectEntity { ocsf_base, .. } => {
                let (trunk, _) = graph.get_trunk_n_branches(node)?;
                let pred = trunk.first().ok_or_else(|| Error::bug("ProjectEntity node has no predecessor"))?;
                let rows = self.eval_node(graph, *pred)?;
                Ok(project_entity(&rows, ocsf_base))
            }
            Instruction::ProjectAttrs { attrs } => {
                let (trunk, _) = graph.get_trunk_n_branches(node)?;
                let pred = trunk.first().ok_or_else(|| Error::bug("ProjectAttrs node has no predecessor"))?;
                let rows = self.eval_node(graph, *pred)?;
                Ok(project_attrs(&rows, attrs))
            }
            Instruction::Limit { n } => {
                let (trunk, _) = graph.get_trunk_n_branches(node)?;
                let pred = trunk.first().ok_or_else(|| Error::bug("Limit node has no predecessor"))?;
                let rows = self.eval_node(graph, *pred)?;
                Ok(rows.into_iter().take(*n as usize).collect())
            }
            Instruction::Offset { n } => {
                let (trunk, _) = graph.get_trunk_n_branches(node)?;
                let pred = trunk.first().ok_or_else(|| Error::bug("Offset node has no predecessor"))?;
                let rows = self.eval_node(graph, *pred)?;
                Ok(rows.into_iter().skip(*n as usize).collect())
            }
            Instruction::Sort { field, ascending } => {
                let (trunk, _) = graph.get_trunk_n_branches(node)?;
                let pred = trunk.first().ok_or_else(|| Error::bug("Sort node has no predecessor"))?;
                let mut rows = self.eval_node(graph, *pred)?;
                rows.sort_by(|a, b| {
                    let ord = compare_values(a.get(field), b.get(field));
                    if *ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                });
                Ok(rows)
            }
            Instruction::Filter { expr } => {
                let (trunk, branches) = graph.get_trunk_n_branches(node)?;
                let pred = trunk.first().ok_or_else(|| Error::bug("Filter node has no predecessor"))?;
                let rows = self.eval_node(graph, *pred)?;

                let mut branch_rows = BTreeMap::new();
                for branch in branches {
                    // The branch edge may target a `Reference` that was
                    // only linked to its `Variable` after the filter was
                    // built; key by the reference's own name either way.
                    let name = match graph.node(branch) {
                        Some(Instruction::Variable { name, .. }) => Some(name.clone()),
                        Some(Instruction::Reference { name }) => Some(name.clone()),
                        _ => None,
                    };
                    if let Some(name) = name {
                        branch_rows.insert(name, self.eval_node(graph, branch)?);
                    }
                }

                let mut out = Vec::new();
                for row in rows {
                    if matches_filter(&row, expr, &branch_rows)? {
                        out.push(row);
                    }
                }
                Ok(out)
            }
            Instruction::Analytic { name, args } => {
                let (trunk, _) = graph.get_trunk_n_branches(node)?;
                let pred = trunk.first().ok_or_else(|| Error::bug("Analytic node has no predecessor"))?;
                let rows = self.eval_node(graph, *pred)?;
                self.analytics.run(name, args, &rows)
            }
            Instruction::Reference { name } => {
                let (trunk, _) = graph.get_trunk_n_branches(node)?;
                match trunk.first() {
                    Some(&pred) => self.eval_node(graph, pred),
                    None => Err(Error::new(Reason::UnresolvedReference { name: name.clone() })),
                }
            }
        }
    }
}

fn project_entity(rows: &[Row], entity: &str) -> Vec<Row> {
    let prefix = format!("{entity}.");
    rows.iter()
        .map(|row| {
            row.iter()
                .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|stripped| (stripped.to_string(), v.clone())))
                .collect()
        })
        .collect()
}

fn project_attrs(rows: &[Row], attrs: &[String]) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            attrs
                .iter()
                .filter_map(|a| row.get(a).map(|v| (a.clone(), v.clone())))
                .collect()
        })
        .collect()
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            _ => Ordering::Equal,
        },
    }
}

fn matches_filter(row: &Row, expr: &FilterExpr, branch_rows: &BTreeMap<String, Vec<Row>>) -> Result<bool> {
    if let Some(range) = &expr.timerange {
        let Some(Value::Timestamp(ts)) = row.get("time") else {
            return Ok(false);
        };
        if *ts < range.start || *ts >= range.end {
            return Ok(false);
        }
    }
    match &expr.exp {
        Some(exp) => eval_bool_exp(row, exp, branch_rows),
        None => Ok(true),
    }
}

fn eval_bool_exp(row: &Row, exp: &BoolExp, branch_rows: &BTreeMap<String, Vec<Row>>) -> Result<bool> {
    match exp {
        BoolExp::And(a, b) => Ok(eval_bool_exp(row, a, branch_rows)? && eval_bool_exp(row, b, branch_rows)?),
        BoolExp::Or(a, b) => Ok(eval_bool_exp(row, a, branch_rows)? || eval_bool_exp(row, b, branch_rows)?),
        BoolExp::Comparison(c) => eval_comparison(row, c, branch_rows),
        BoolExp::MultiComp(MultiComp { comparisons }) => {
            for c in comparisons {
                if eval_comparison(row, c, branch_rows)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

fn eval_comparison(row: &Row, c: &BasicComparison, branch_rows: &BTreeMap<String, Vec<Row>>) -> Result<bool> {
    let lhs = row.get(&c.field);

    if c.is_composite() {
        return eval_composite_comparison(row, c, branch_rows);
    }

    if let Some(reference) = &c.reference {
        let branch = branch_rows.get(&reference.variable).ok_or_else(|| {
            Error::bug(format!("reference to `{}` with no evaluated branch", reference.variable))
        })?;
        let in_set = branch.iter().any(|r| r.get(&reference.field) == lhs);
        return Ok(match c.op {
            Operator::In => in_set,
            Operator::NotIn => !in_set,
            _ => {
                return Err(Error::new(Reason::InvalidOperatorInMultiColumnComparison {
                    operator: format!("{:?}", c.op),
                }))
            }
        });
    }

    if let Some(values) = &c.values {
        let in_list = values.iter().any(|v| Some(v) == lhs);
        return Ok(match c.op {
            Operator::In => in_list,
            Operator::NotIn => !in_list,
            _ => in_list,
        });
    }

    let rhs = c.value.as_ref().unwrap_or(&Value::Null);
    Ok(match c.op {
        Operator::Eq => lhs == Some(rhs),
        Operator::Ne => lhs != Some(rhs),
        Operator::Lt => compare_values(lhs, Some(rhs)) == Ordering::Less,
        Operator::Le => compare_values(lhs, Some(rhs)) != Ordering::Greater,
        Operator::Gt => compare_values(lhs, Some(rhs)) == Ordering::Greater,
        Operator::Ge => compare_values(lhs, Some(rhs)) != Ordering::Less,
        Operator::Like => like_matches(lhs, rhs),
        Operator::NotLike => !like_matches(lhs, rhs),
        Operator::Matches => regex_matches(lhs, rhs),
        Operator::NotMatches => !regex_matches(lhs, rhs),
        Operator::In | Operator::NotIn => false,
    })
}

/// Evaluates a composite (tuple) key comparison, e.g. `(pid, ppid) IN
/// newvar.(pid, ppid)`. `Value` has no `Hash`/`Eq` (it holds `f64`), so
/// membership is a row-by-row tuple equality scan rather than a set lookup.
fn eval_composite_comparison(row: &Row, c: &BasicComparison, branch_rows: &BTreeMap<String, Vec<Row>>) -> Result<bool> {
    let fields = c.all_fields();
    let lhs: Vec<Option<&Value>> = fields.iter().map(|f| row.get(*f)).collect();

    let in_set = if let Some(reference) = &c.reference {
        let branch = branch_rows.get(&reference.variable).ok_or_else(|| {
            Error::bug(format!("reference to `{}` with no evaluated branch", reference.variable))
        })?;
        let ref_fields = reference.all_fields();
        branch
            .iter()
            .any(|r| ref_fields.iter().zip(&lhs).all(|(f, l)| r.get(*f) == *l))
    } else if let Some(tuple_values) = &c.tuple_values {
        tuple_values.iter().any(|tuple| tuple.iter().zip(&lhs).all(|(v, l)| Some(v) == *l))
    } else {
        return Err(Error::bug("composite comparison has neither a reference nor literal tuple values"));
    };

    match c.op {
        Operator::In => Ok(in_set),
        Operator::NotIn => Ok(!in_set),
        _ => Err(Error::new(Reason::InvalidOperatorInMultiColumnComparison {
            operator: format!("{:?}", c.op),
        })),
    }
}

fn like_matches(lhs: Option<&Value>, rhs: &Value) -> bool {
    let (Some(Value::Str(s)), Value::Str(pattern)) = (lhs, rhs) else {
        return false;
    };
    let escaped = regex::escape(pattern).replace("%", ".*?").replace("_", ".");
    Regex::new(&format!("^{escaped}$")).map(|re| re.is_match(s)).unwrap_or(false)
}

fn regex_matches(lhs: Option<&Value>, rhs: &Value) -> bool {
    let (Some(Value::Str(s)), Value::Str(pattern)) = (lhs, rhs) else {
        return false;
    };
    Regex::new(pattern).map(|re| re.is_match(s)).unwrap_or(false)
}
