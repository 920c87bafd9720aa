use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Reason, Result};

use super::{Row, Value};

/// Comparison and membership operators a `BasicComparison` may carry.
/// `Matches`/`NotMatches` are regex operators that not every SQL dialect can
/// render (see `sql::dialect`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    NotLike,
    Matches,
    NotMatches,
}

impl Operator {
    /// True for the operators `MultiComp` accepts across its field/value columns.
    pub fn valid_in_multi_column_comparison(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    pub fn is_regex(self) -> bool {
        matches!(self, Operator::Matches | Operator::NotMatches)
    }
}

/// Parses a comparison operator token as written in a `WHERE` clause or a
/// mapping file's `native_op`/`ocsf_op` override. Returns `None` for unknown
/// tokens so callers can decide between falling back to a default operator
/// or raising a parse error.
pub fn parse_operator(s: &str) -> Option<Operator> {
    Some(match s.trim().to_ascii_uppercase().as_str() {
        "=" | "==" | "EQ" => Operator::Eq,
        "!=" | "<>" | "NE" => Operator::Ne,
        "<" | "LT" => Operator::Lt,
        "<=" | "LE" => Operator::Le,
        ">" | "GT" => Operator::Gt,
        ">=" | "GE" => Operator::Ge,
        "IN" => Operator::In,
        "NOT IN" | "NOTIN" => Operator::NotIn,
        "LIKE" => Operator::Like,
        "NOT LIKE" | "NOTLIKE" => Operator::NotLike,
        "MATCHES" => Operator::Matches,
        "NOT MATCHES" | "NOTMATCHES" => Operator::NotMatches,
        _ => return None,
    })
}

/// The right-hand side of a `BasicComparison` when it reads from another
/// variable's result set rather than a literal (e.g. `pid IN newvar.pid`).
/// `extra_fields` carries the rest of a composite (tuple) key's columns on
/// the referenced variable, in order after `field`; empty for an ordinary
/// single-column reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceValue {
    pub variable: String,
    pub field: String,
    #[serde(default)]
    pub extra_fields: Vec<String>,
}

impl ReferenceValue {
    /// All columns this reference reads, `field` followed by `extra_fields`,
    /// in tuple order.
    pub fn all_fields(&self) -> Vec<&str> {
        std::iter::once(self.field.as_str())
            .chain(self.extra_fields.iter().map(String::as_str))
            .collect()
    }
}

/// A single `field OP value` test, a reference comparison reading the values
/// of another variable's column, or (when `extra_fields`/`tuple_values` are
/// populated) a composite-key membership test over several columns at once,
/// e.g. `(pid, ppid) IN newvar.(pid, ppid)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicComparison {
    pub field: String,
    pub op: Operator,
    pub value: Option<Value>,
    pub values: Option<Vec<Value>>,
    pub reference: Option<ReferenceValue>,
    /// Additional LHS columns for a composite-key comparison, in order
    /// after `field`. Empty for an ordinary single-column comparison.
    #[serde(default)]
    pub extra_fields: Vec<String>,
    /// Literal tuple rows for a composite `IN`/`NOT IN` comparison, each
    /// inner vec aligned to `field` then `extra_fields`. Mutually exclusive
    /// with `values` (the single-column literal list) and with `reference`.
    #[serde(default)]
    pub tuple_values: Option<Vec<Vec<Value>>>,
}

impl BasicComparison {
    pub fn literal(field: impl Into<String>, op: Operator, value: Value) -> Self {
        BasicComparison {
            field: field.into(),
            op,
            value: Some(value),
            values: None,
            reference: None,
            extra_fields: Vec::new(),
            tuple_values: None,
        }
    }

    pub fn reference(field: impl Into<String>, op: Operator, variable: impl Into<String>, ref_field: impl Into<String>) -> Self {
        BasicComparison {
            field: field.into(),
            op,
            value: None,
            values: None,
            reference: Some(ReferenceValue {
                variable: variable.into(),
                field: ref_field.into(),
                extra_fields: Vec::new(),
            }),
            extra_fields: Vec::new(),
            tuple_values: None,
        }
    }

    /// A composite-key reference comparison, e.g. `(pid, ppid) IN
    /// newvar.(pid, ppid)`. `fields` and `ref_fields` must be the same
    /// non-zero length, tuple-aligned pairwise.
    pub fn composite_reference(
        fields: Vec<String>,
        op: Operator,
        variable: impl Into<String>,
        ref_fields: Vec<String>,
    ) -> Result<Self> {
        if fields.is_empty() || ref_fields.is_empty() {
            return Err(Error::new(Reason::InvalidComparison {
                message: "composite comparison requires at least one field".to_string(),
            }));
        }
        if fields.len() != ref_fields.len() {
            return Err(Error::new(Reason::MismatchedFieldValueInMultiColumnComparison {
                fields: fields.len(),
                values: ref_fields.len(),
            }));
        }
        let mut fields = fields.into_iter();
        let field = fields.next().expect("checked non-empty above");
        let mut ref_fields = ref_fields.into_iter();
        let ref_field = ref_fields.next().expect("checked non-empty above");
        Ok(BasicComparison {
            field,
            op,
            value: None,
            values: None,
            reference: Some(ReferenceValue {
                variable: variable.into(),
                field: ref_field,
                extra_fields: ref_fields.collect(),
            }),
            extra_fields: fields.collect(),
            tuple_values: None,
        })
    }

    /// A composite-key literal membership comparison, e.g. `(pid, ppid) IN
    /// [(1, 2), (3, 4)]`. Every row of `tuple_values` must have exactly
    /// `fields.len()` columns.
    pub fn composite_literal(fields: Vec<String>, op: Operator, tuple_values: Vec<Vec<Value>>) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::new(Reason::InvalidComparison {
                message: "composite comparison requires at least one field".to_string(),
            }));
        }
        if let Some(bad_row) = tuple_values.iter().find(|row| row.len() != fields.len()) {
            return Err(Error::new(Reason::MismatchedFieldValueInMultiColumnComparison {
                fields: fields.len(),
                values: bad_row.len(),
            }));
        }
        let mut fields = fields.into_iter();
        let field = fields.next().expect("checked non-empty above");
        Ok(BasicComparison {
            field,
            op,
            value: None,
            values: None,
            reference: None,
            extra_fields: fields.collect(),
            tuple_values: Some(tuple_values),
        })
    }

    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }

    pub fn is_composite(&self) -> bool {
        !self.extra_fields.is_empty()
    }

    /// All LHS columns this comparison reads, `field` followed by
    /// `extra_fields`, in tuple order.
    pub fn all_fields(&self) -> Vec<&str> {
        std::iter::once(self.field.as_str())
            .chain(self.extra_fields.iter().map(String::as_str))
            .collect()
    }
}

/// A single OCSF attribute expanded across several raw field names at once,
/// e.g. `src_ip` mapping to both `src_endpoint.ip` and `device.ip` depending
/// on which event types are mixed in a data source. Expands to an OR of
/// per-field comparisons at mapping time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiComp {
    pub comparisons: Vec<BasicComparison>,
}

/// Boolean combinator over comparisons, built by the frontend lowering pass
/// from `AND`/`OR` in a Kestrel `WHERE` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoolExp {
    Comparison(BasicComparison),
    MultiComp(MultiComp),
    And(Box<BoolExp>, Box<BoolExp>),
    Or(Box<BoolExp>, Box<BoolExp>),
}

/// Absolute or relative time bound attached to a `Filter`, applied against
/// the entity's designated timestamp field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
}

/// The full predicate carried by a `Filter` instruction: an optional boolean
/// expression plus an optional time range, both expressed in OCSF field
/// names at the point they're attached to the IR graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterExpr {
    pub exp: Option<BoolExp>,
    pub timerange: Option<TimeRange>,
}

impl FilterExpr {
    pub fn is_empty(&self) -> bool {
        self.exp.is_none() && self.timerange.is_none()
    }

    /// Names of the variables this filter reads from via reference
    /// comparisons (`pid IN newvar.pid`), used to add reference-branch edges
    /// in the IR graph.
    pub fn get_references(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(exp) = &self.exp {
            collect_references(exp, &mut out);
        }
        out
    }

    /// Substitutes every reference comparison's `ReferenceValue` with the
    /// literal values it resolves to against `branch_rows` (one evaluated
    /// row set per referenced variable name), returning a new filter with no
    /// `ReferenceValue`s left. Leaves `self` untouched.
    pub fn resolve_references(&self, branch_rows: &BTreeMap<String, Vec<Row>>) -> Result<FilterExpr> {
        let mut resolved = self.clone();
        if let Some(exp) = &mut resolved.exp {
            resolve_references_in_exp(exp, branch_rows)?;
        }
        Ok(resolved)
    }
}

fn resolve_references_in_exp(exp: &mut BoolExp, branch_rows: &BTreeMap<String, Vec<Row>>) -> Result<()> {
    match exp {
        BoolExp::Comparison(c) => resolve_references_in_comparison(c, branch_rows),
        BoolExp::MultiComp(m) => {
            for c in &mut m.comparisons {
                resolve_references_in_comparison(c, branch_rows)?;
            }
            Ok(())
        }
        BoolExp::And(a, b) | BoolExp::Or(a, b) => {
            resolve_references_in_exp(a, branch_rows)?;
            resolve_references_in_exp(b, branch_rows)
        }
    }
}

fn resolve_references_in_comparison(c: &mut BasicComparison, branch_rows: &BTreeMap<String, Vec<Row>>) -> Result<()> {
    let Some(reference) = c.reference.take() else {
        return Ok(());
    };
    let rows = branch_rows.get(&reference.variable).ok_or_else(|| {
        Error::new(Reason::UnresolvedReference {
            name: reference.variable.clone(),
        })
    })?;

    if reference.extra_fields.is_empty() {
        c.values = Some(rows.iter().filter_map(|r| r.get(&reference.field).cloned()).collect());
    } else {
        let ref_fields = reference.all_fields();
        c.tuple_values = Some(
            rows.iter()
                .filter_map(|r| ref_fields.iter().map(|f| r.get(*f).cloned()).collect::<Option<Vec<_>>>())
                .collect(),
        );
    }
    Ok(())
}

fn collect_references(exp: &BoolExp, out: &mut BTreeSet<String>) {
    match exp {
        BoolExp::Comparison(c) => {
            if let Some(r) = &c.reference {
                out.insert(r.variable.clone());
            }
        }
        BoolExp::MultiComp(m) => {
            for c in &m.comparisons {
                if let Some(r) = &c.reference {
                    out.insert(r.variable.clone());
                }
            }
        }
        BoolExp::And(a, b) | BoolExp::Or(a, b) => {
            collect_references(a, out);
            collect_references(b, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_references_across_and() {
        let exp = BoolExp::And(
            Box::new(BoolExp::Comparison(BasicComparison::reference(
                "pid", Operator::In, "newvar", "pid",
            ))),
            Box::new(BoolExp::Comparison(BasicComparison::literal(
                "name",
                Operator::Eq,
                Value::Str("cmd.exe".into()),
            ))),
        );
        let filter = FilterExpr {
            exp: Some(exp),
            timerange: None,
        };
        let refs = filter.get_references();
        assert_eq!(refs.len(), 1);
        assert!(refs.contains("newvar"));
    }

    #[test]
    fn multi_column_operator_validity() {
        assert!(Operator::In.valid_in_multi_column_comparison());
        assert!(!Operator::Eq.valid_in_multi_column_comparison());
    }

    #[test]
    fn composite_reference_builds_tuple_fields() {
        let c = BasicComparison::composite_reference(
            vec!["pid".into(), "ppid".into()],
            Operator::In,
            "newvar",
            vec!["pid".into(), "ppid".into()],
        )
        .unwrap();
        assert!(c.is_composite());
        assert_eq!(c.all_fields(), vec!["pid", "ppid"]);
        let r = c.reference.unwrap();
        assert_eq!(r.all_fields(), vec!["pid", "ppid"]);
    }

    #[test]
    fn composite_reference_rejects_mismatched_arity() {
        let err = BasicComparison::composite_reference(
            vec!["pid".into(), "ppid".into()],
            Operator::In,
            "newvar",
            vec!["pid".into()],
        )
        .unwrap_err();
        assert!(matches!(
            err.reason,
            Reason::MismatchedFieldValueInMultiColumnComparison { fields: 2, values: 1 }
        ));
    }

    #[test]
    fn composite_literal_rejects_row_with_wrong_arity() {
        let err = BasicComparison::composite_literal(
            vec!["pid".into(), "ppid".into()],
            Operator::In,
            vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(3)]],
        )
        .unwrap_err();
        assert!(matches!(
            err.reason,
            Reason::MismatchedFieldValueInMultiColumnComparison { fields: 2, values: 1 }
        ));
    }

    fn row_of(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn resolve_references_substitutes_single_column_reference() {
        let exp = BoolExp::Comparison(BasicComparison::reference("pid", Operator::In, "newvar", "pid"));
        let filter = FilterExpr {
            exp: Some(exp),
            timerange: None,
        };
        let mut branch_rows = BTreeMap::new();
        branch_rows.insert(
            "newvar".to_string(),
            vec![row_of(&[("pid", Value::Int(1))]), row_of(&[("pid", Value::Int(2))])],
        );

        let resolved = filter.resolve_references(&branch_rows).unwrap();
        match &resolved.exp {
            Some(BoolExp::Comparison(c)) => {
                assert!(!c.is_reference());
                assert_eq!(c.values, Some(vec![Value::Int(1), Value::Int(2)]));
            }
            other => panic!("expected a single comparison, got {other:?}"),
        }

        // the caller's filter is untouched: still has a reference, no resolved values.
        match &filter.exp {
            Some(BoolExp::Comparison(c)) => {
                assert!(c.is_reference());
                assert!(c.values.is_none());
            }
            other => panic!("expected a single comparison, got {other:?}"),
        }
        assert!(resolved.get_references().is_empty());
    }

    #[test]
    fn resolve_references_substitutes_composite_reference() {
        let comparison = BasicComparison::composite_reference(
            vec!["pid".into(), "ppid".into()],
            Operator::In,
            "newvar",
            vec!["pid".into(), "ppid".into()],
        )
        .unwrap();
        let filter = FilterExpr {
            exp: Some(BoolExp::Comparison(comparison)),
            timerange: None,
        };
        let mut branch_rows = BTreeMap::new();
        branch_rows.insert(
            "newvar".to_string(),
            vec![row_of(&[("pid", Value::Int(1)), ("ppid", Value::Int(10))])],
        );

        let resolved = filter.resolve_references(&branch_rows).unwrap();
        match &resolved.exp {
            Some(BoolExp::Comparison(c)) => {
                assert!(!c.is_reference());
                assert_eq!(c.tuple_values, Some(vec![vec![Value::Int(1), Value::Int(10)]]));
            }
            other => panic!("expected a single comparison, got {other:?}"),
        }
    }

    #[test]
    fn resolve_references_errors_on_unknown_variable() {
        let exp = BoolExp::Comparison(BasicComparison::reference("pid", Operator::In, "newvar", "pid"));
        let filter = FilterExpr {
            exp: Some(exp),
            timerange: None,
        };
        let err = filter.resolve_references(&BTreeMap::new()).unwrap_err();
        assert!(matches!(err.reason, Reason::UnresolvedReference { name } if name == "newvar"));
    }
}
