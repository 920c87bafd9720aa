//! Translates an IR subgraph into SQL. Builds a typed `sqlparser` AST and
//! renders it with `.to_string()` rather than assembling SQL by string
//! concatenation.
//!
//! One `Variable` becomes one CTE (or the final query, if it's the variable
//! being evaluated); CTEs are memoized per `Variable` node id so a variable
//! referenced from two places in a chain is only materialized once.

use std::collections::BTreeMap;
use std::sync::Arc;

use sqlparser::ast::{
    BinaryOperator, Cte, Expr as SqlExpr, Ident, ObjectName, OrderByExpr, Query, Select, SelectItem, SetExpr,
    TableAlias, TableFactor, TableWithJoins, UnaryOperator, Value as SqlValue, With,
};

use crate::error::{Error, Reason, Result, WithErrorInfo};
use crate::ir::graph::EdgeKind;
use crate::ir::instruction::InstructionId;
use crate::ir::{BasicComparison, BoolExp, FilterExpr, Graph, Instruction, Operator, Value};
use crate::mapping::{translate_comparison_to_native, translate_projection_to_native, LoadedMapping, MappingRegistry};
use crate::utils::NameGenerator;

use super::dialect::{Dialect, DialectHandler};

pub struct Translator<'g> {
    graph: &'g Graph,
    dialect: Box<dyn DialectHandler>,
    registry: &'g MappingRegistry,
    cte_names: NameGenerator,
    /// Variable node id -> (CTE name, already-emitted CTE). Populated the
    /// first time a variable is translated; reused for every later
    /// reference to the same variable within this translation.
    materialized: BTreeMap<InstructionId, String>,
    ctes: Vec<Cte>,
}

impl<'g> Translator<'g> {
    pub fn new(graph: &'g Graph, dialect: Dialect, registry: &'g MappingRegistry) -> Self {
        Translator {
            graph,
            dialect: dialect.handler(),
            registry,
            cte_names: NameGenerator::new("kestrel_cte_"),
            materialized: BTreeMap::new(),
            ctes: Vec::new(),
        }
    }

    /// Translates the chain ending at `sink` (a `Return` or `Explain` node,
    /// or directly a `Variable` node) into a full SQL statement.
    pub fn translate(mut self, sink: InstructionId) -> Result<String> {
        let target = self.sink_source(sink)?;
        let mut query = self.select_for_variable(target)?;
        if !self.ctes.is_empty() {
            query.with = Some(With {
                recursive: false,
                cte_tables: std::mem::take(&mut self.ctes),
            });
        }
        Ok(query.to_string())
    }

    fn sink_source(&self, sink: InstructionId) -> Result<InstructionId> {
        let source = match self.graph.node(sink) {
            Some(Instruction::Return) | Some(Instruction::Explain) => {
                let (trunk, _) = self.graph.get_trunk_n_branches(sink)?;
                trunk.into_iter().next().ok_or_else(|| {
                    Error::new(Reason::Bug {
                        details: "sink node has no predecessor".to_string(),
                    })
                })?
            }
            Some(Instruction::Variable { .. }) => sink,
            _ => {
                return Err(Error::new(Reason::Bug {
                    details: "translate() requires a Return, Explain, or Variable node".to_string(),
                }))
            }
        };
        self.skip_references(source)
    }

    /// Builds (and memoizes) the SELECT for the chain feeding into
    /// `variable_id`, returning the name it can be referenced by (either a
    /// CTE name or, for the outermost call, left as the live query).
    fn select_for_variable(&mut self, variable_id: InstructionId) -> Result<Query> {
        let (trunk, _) = self.graph.get_trunk_n_branches(variable_id)?;
        let chain_end = trunk.into_iter().next().ok_or_else(|| {
            Error::new(Reason::Bug {
                details: "Variable node has no predecessor".to_string(),
            })
        })?;
        self.build_chain(chain_end)
    }

    /// Ensures `variable_id` has been materialized as a CTE and returns its
    /// name, building it first if this is the first reference.
    fn materialize_variable(&mut self, variable_id: InstructionId) -> Result<String> {
        if let Some(name) = self.materialized.get(&variable_id) {
            return Ok(name.clone());
        }
        let query = self.select_for_variable(variable_id)?;
        let name = self.cte_names.gen();
        self.ctes.push(Cte {
            alias: TableAlias {
                name: Ident::new(name.clone()),
                columns: vec![],
            },
            query: Box::new(query),
            from: None,
            materialized: None,
        });
        self.materialized.insert(variable_id, name.clone());
        Ok(name)
    }

    /// Follows `id` through any chain of linked `Reference` nodes to the
    /// `Variable`/root it ultimately resolves to. Fails if a `Reference`
    /// along the way has not been linked to anything (by lowering's
    /// same-block forward-reference pass or by `Graph::compose`).
    fn skip_references(&self, mut id: InstructionId) -> Result<InstructionId> {
        loop {
            match self.graph.node(id) {
                Some(Instruction::Reference { name }) => {
                    let (trunk, _) = self.graph.get_trunk_n_branches(id)?;
                    id = trunk.into_iter().next().ok_or_else(|| {
                        Error::new(Reason::UnresolvedReference { name: name.clone() })
                    })?;
                }
                _ => return Ok(id),
            }
        }
    }

    /// Walks backward from `node` along the trunk to the nearest
    /// `DataSource`/`Construct` root, then builds a single SELECT forward
    /// over every transforming instruction it finds.
    fn build_chain(&mut self, node: InstructionId) -> Result<Query> {
        let mut chain = Vec::new();
        let mut cursor = self.skip_references(node)?;
        loop {
            chain.push(cursor);
            match self.graph.node(cursor) {
                Some(i) if i.is_root_eligible() => break,
                Some(Instruction::Variable { .. }) => break,
                _ => {
                    let (trunk, _) = self.graph.get_trunk_n_branches(cursor)?;
                    let next = trunk.into_iter().next().ok_or_else(|| {
                        Error::new(Reason::Bug {
                            details: format!("node {cursor} has no trunk predecessor"),
                        })
                    })?;
                    cursor = self.skip_references(next)?;
                }
            }
        }
        chain.reverse();

        // A chain rooted directly at a `DataSource` reads native columns off
        // a real backend table; one rooted at a materialized `Variable`/CTE
        // already holds OCSF-normalized rows, so no further native lowering
        // applies to it.
        let mapping: Option<Arc<LoadedMapping>> = match self.graph.node(chain[0]) {
            Some(Instruction::DataSource { name }) => self.registry.get(name),
            _ => None,
        };

        let root = chain[0];
        let mut select = match self.graph.node(root) {
            Some(Instruction::DataSource { name }) => base_select(name),
            Some(Instruction::Construct { rows }) => literal_select(rows),
            Some(Instruction::Variable { .. }) => {
                let cte_name = self.materialize_variable(root)?;
                base_select(&cte_name)
            }
            _ => {
                return Err(Error::new(Reason::Bug {
                    details: "translator chain must start at a root or variable".to_string(),
                }))
            }
        };

        let mut entity_projected = false;
        let mut attrs_projected = false;
        let mut ocsf_base: Option<String> = None;
        let mut order_by = Vec::new();

        for &id in &chain[1..] {
            match self.graph.node(id).expect("node exists").clone() {
                Instruction::Filter { expr } => {
                    let predicate = self.translate_filter(id, &expr, &mut select, mapping.as_deref())?;
                    select.selection = and_opt(select.selection.take(), predicate);
                }
                Instruction::ProjectEntity { ocsf_base: base, .. } => {
                    if entity_projected {
                        return Err(Error::new(Reason::DualEntityProjection));
                    }
                    entity_projected = true;
                    ocsf_base = Some(base);
                }
                Instruction::ProjectAttrs { attrs } => {
                    attrs_projected = true;
                    select.projection = match &mapping {
                        Some(mapping) => native_projection_items(&mapping.forward, ocsf_base.as_deref(), Some(&attrs)),
                        None => attrs.iter().map(|a| SelectItem::UnnamedExpr(ident_expr(a))).collect(),
                    };
                }
                Instruction::Sort { field, ascending } => {
                    order_by.push(OrderByExpr {
                        expr: ident_expr(&field),
                        asc: Some(ascending),
                        nulls_first: None,
                    });
                }
                Instruction::Limit { .. } | Instruction::Offset { .. } | Instruction::Variable { .. } => {
                    // handled below, or (Variable) already the chain terminator
                }
                Instruction::Analytic { name, .. } => {
                    return Err(Error::new(Reason::BackendError {
                        message: format!(
                            "analytic `{name}` has no SQL translation; evaluate it frame-native"
                        ),
                    }));
                }
                other => {
                    return Err(Error::new(Reason::Bug {
                        details: format!("unexpected instruction in SQL chain: {}", other.kind_name()),
                    }))
                }
            }
        }

        if let Some(mapping) = &mapping {
            if entity_projected && !attrs_projected {
                select.projection = native_projection_items(&mapping.forward, ocsf_base.as_deref(), None);
            }
        }

        let mut query = Query {
            with: None,
            body: Box::new(SetExpr::Select(Box::new(select))),
            order_by,
            limit: None,
            offset: None,
            fetch: None,
            locks: vec![],
            limit_by: vec![],
            for_clause: None,
        };

        for &id in &chain[1..] {
            match self.graph.node(id) {
                Some(Instruction::Limit { n }) => {
                    query.limit = Some(SqlExpr::Value(SqlValue::Number(n.to_string(), false)));
                }
                Some(Instruction::Offset { n }) => {
                    query.offset = Some(sqlparser::ast::Offset {
                        value: SqlExpr::Value(SqlValue::Number(n.to_string(), false)),
                        rows: sqlparser::ast::OffsetRows::None,
                    });
                }
                _ => {}
            }
        }

        Ok(query)
    }

    fn translate_filter(
        &mut self,
        filter_id: InstructionId,
        expr: &FilterExpr,
        select: &mut Select,
        mapping: Option<&LoadedMapping>,
    ) -> Result<Option<SqlExpr>> {
        let (_, branches) = self.graph.get_trunk_n_branches(filter_id)?;
        let mut branch_ctes = BTreeMap::new();
        for branch in branches {
            // The branch edge may point at a `Reference` that only got
            // linked to its `Variable` after the filter was built (a
            // forward reference resolved at the end of lowering, or one
            // resolved later still by `Graph::compose`); the reference's
            // own name is what comparisons in this filter name, regardless
            // of which node the edge itself targets.
            let name = match self.graph.node(branch) {
                Some(Instruction::Variable { name, .. }) => Some(name.clone()),
                Some(Instruction::Reference { name }) => Some(name.clone()),
                _ => None,
            };
            let canonical = self.skip_references(branch)?;
            let cte_name = self.materialize_variable(canonical)?;
            if let Some(name) = name {
                branch_ctes.insert(name, cte_name);
            }
        }

        let mut predicate = match &expr.exp {
            Some(bool_exp) => Some(self.translate_bool_exp(bool_exp, &branch_ctes, mapping)?),
            None => None,
        };

        if let Some(range) = &expr.timerange {
            // Rendered as two comparisons ANDed together: time >= start AND time < end.
            let ge = SqlExpr::BinaryOp {
                left: Box::new(ident_expr("time")),
                op: BinaryOperator::GtEq,
                right: Box::new(timestamp_literal(&range.start)),
            };
            let lt = SqlExpr::BinaryOp {
                left: Box::new(ident_expr("time")),
                op: BinaryOperator::Lt,
                right: Box::new(timestamp_literal(&range.end)),
            };
            let combined = SqlExpr::BinaryOp {
                left: Box::new(ge),
                op: BinaryOperator::And,
                right: Box::new(lt),
            };
            predicate = Some(match predicate {
                Some(p) => SqlExpr::BinaryOp {
                    left: Box::new(p),
                    op: BinaryOperator::And,
                    right: Box::new(combined),
                },
                None => combined,
            });
        }

        let _ = select;
        Ok(predicate)
    }

    fn translate_bool_exp(
        &self,
        exp: &BoolExp,
        branch_ctes: &BTreeMap<String, String>,
        mapping: Option<&LoadedMapping>,
    ) -> Result<SqlExpr> {
        match exp {
            BoolExp::And(a, b) => Ok(SqlExpr::BinaryOp {
                left: Box::new(self.translate_bool_exp(a, branch_ctes, mapping)?),
                op: BinaryOperator::And,
                right: Box::new(self.translate_bool_exp(b, branch_ctes, mapping)?),
            }),
            BoolExp::Or(a, b) => Ok(SqlExpr::BinaryOp {
                left: Box::new(self.translate_bool_exp(a, branch_ctes, mapping)?),
                op: BinaryOperator::Or,
                right: Box::new(self.translate_bool_exp(b, branch_ctes, mapping)?),
            }),
            BoolExp::Comparison(c) => self.translate_comparison(c, branch_ctes, mapping),
            BoolExp::MultiComp(m) => {
                let mut iter = m.comparisons.iter();
                let first = iter
                    .next()
                    .ok_or_else(|| Error::new(Reason::Bug {
                        details: "MultiComp with no comparisons".to_string(),
                    }))?;
                let mut acc = self.translate_comparison(first, branch_ctes, mapping)?;
                for c in iter {
                    let next = self.translate_comparison(c, branch_ctes, mapping)?;
                    acc = SqlExpr::BinaryOp {
                        left: Box::new(acc),
                        op: BinaryOperator::Or,
                        right: Box::new(next),
                    };
                }
                Ok(acc)
            }
        }
    }

    fn translate_comparison(
        &self,
        c: &BasicComparison,
        branch_ctes: &BTreeMap<String, String>,
        mapping: Option<&LoadedMapping>,
    ) -> Result<SqlExpr> {
        if c.is_composite() {
            return self.translate_composite_comparison(c, branch_ctes);
        }

        if let Some(reference) = &c.reference {
            if !c.op.valid_in_multi_column_comparison() {
                return Err(Error::new(Reason::InvalidOperatorInMultiColumnComparison {
                    operator: format!("{:?}", c.op),
                }));
            }
            let cte_name = branch_ctes.get(&reference.variable).cloned().ok_or_else(|| {
                Error::new(Reason::Bug {
                    details: format!(
                        "reference comparison to `{}` with no materialized branch CTE",
                        reference.variable
                    ),
                })
            })?;
            let subquery = format!(
                "SELECT {} FROM {}",
                self.dialect.quote_ident(&reference.field),
                self.dialect.quote_ident(&cte_name)
            );
            let op = if matches!(c.op, Operator::In) {
                "IN"
            } else {
                "NOT IN"
            };
            return Ok(SqlExpr::Identifier(Ident::new(format!(
                "{} {} ({})",
                self.dialect.quote_ident(&c.field),
                op,
                subquery
            ))));
        }

        if let Some(values) = &c.values {
            if c.op.is_regex() && !self.dialect.supports_regexp() {
                return Err(Error::new(Reason::UnsupportedOperator {
                    operator: format!("{:?}", c.op),
                    dialect: format!("{:?}", self.dialect.dialect()),
                }));
            }
            let list = values.iter().map(value_literal).collect();
            let expr = SqlExpr::InList {
                expr: Box::new(ident_expr(&c.field)),
                list,
                negated: matches!(c.op, Operator::NotIn),
            };
            return Ok(expr);
        }

        // A raw backend table's fields must be lowered to their native names
        // before being rendered; a CTE/subquery over already-OCSF rows (no
        // mapping) is rendered directly.
        if let Some(mapping) = mapping {
            let value = c.value.clone().unwrap_or(Value::Null);
            let translated = translate_comparison_to_native(&mapping.forward, &c.field, c.op, &value)?;
            return self.render_native_comparisons(&translated);
        }

        if c.op.is_regex() && !self.dialect.supports_regexp() {
            return Err(Error::new(Reason::UnsupportedOperator {
                operator: format!("{:?}", c.op),
                dialect: format!("{:?}", self.dialect.dialect()),
            }));
        }

        let value = c.value.clone().unwrap_or(Value::Null);
        Ok(render_basic(&c.field, c.op, &value, self.dialect.regexp_function()))
    }

    /// Renders one or more native-field comparisons produced by lowering a
    /// single OCSF comparison through a mapping, OR-joining when the OCSF
    /// field fanned out to several native ones (e.g. a `Multi` mapping node).
    fn render_native_comparisons(&self, translated: &[BasicComparison]) -> Result<SqlExpr> {
        let mut iter = translated.iter();
        let first = iter.next().ok_or_else(|| {
            Error::new(Reason::Bug {
                details: "native comparison translation produced no comparisons".to_string(),
            })
        })?;
        let mut acc = self.render_native_literal(first)?;
        for next in iter {
            let rendered = self.render_native_literal(next)?;
            acc = SqlExpr::BinaryOp {
                left: Box::new(acc),
                op: BinaryOperator::Or,
                right: Box::new(rendered),
            };
        }
        Ok(acc)
    }

    fn render_native_literal(&self, c: &BasicComparison) -> Result<SqlExpr> {
        if c.op.is_regex() && !self.dialect.supports_regexp() {
            return Err(Error::new(Reason::UnsupportedOperator {
                operator: format!("{:?}", c.op),
                dialect: format!("{:?}", self.dialect.dialect()),
            }));
        }
        let value = c.value.clone().unwrap_or(Value::Null);
        Ok(render_basic(&c.field, c.op, &value, self.dialect.regexp_function()))
    }

    /// Renders a multi-field reference/literal comparison as a SQL row value
    /// membership test: `(c1, c2) IN (SELECT c1, c2 FROM ...)` for a branch
    /// reference, or `(c1, c2) IN ((v1, v2), ...)` for a literal tuple list.
    fn translate_composite_comparison(&self, c: &BasicComparison, branch_ctes: &BTreeMap<String, String>) -> Result<SqlExpr> {
        if !c.op.valid_in_multi_column_comparison() {
            return Err(Error::new(Reason::InvalidOperatorInMultiColumnComparison {
                operator: format!("{:?}", c.op),
            }));
        }
        let op = if matches!(c.op, Operator::In) { "IN" } else { "NOT IN" };
        let lhs = format!(
            "({})",
            c.all_fields()
                .iter()
                .map(|f| self.dialect.quote_ident(f))
                .collect::<Vec<_>>()
                .join(", ")
        );

        if let Some(reference) = &c.reference {
            let cte_name = branch_ctes.get(&reference.variable).cloned().ok_or_else(|| {
                Error::new(Reason::Bug {
                    details: format!(
                        "reference comparison to `{}` with no materialized branch CTE",
                        reference.variable
                    ),
                })
            })?;
            let cols = reference
                .all_fields()
                .iter()
                .map(|f| self.dialect.quote_ident(f))
                .collect::<Vec<_>>()
                .join(", ");
            let subquery = format!("SELECT {} FROM {}", cols, self.dialect.quote_ident(&cte_name));
            return Ok(SqlExpr::Identifier(Ident::new(format!("{lhs} {op} ({subquery})"))));
        }

        if let Some(tuple_values) = &c.tuple_values {
            let rows = tuple_values
                .iter()
                .map(|row| format!("({})", row.iter().map(|v| value_literal(v).to_string()).collect::<Vec<_>>().join(", ")))
                .collect::<Vec<_>>()
                .join(", ");
            return Ok(SqlExpr::Identifier(Ident::new(format!("{lhs} {op} ({rows})"))));
        }

        Err(Error::new(Reason::Bug {
            details: "composite comparison has neither a reference nor literal tuple values".to_string(),
        }))
    }
}

fn base_select(table_name: &str) -> Select {
    Select {
        distinct: None,
        top: None,
        projection: vec![SelectItem::Wildcard(Default::default())],
        into: None,
        from: vec![TableWithJoins {
            relation: TableFactor::Table {
                name: ObjectName(vec![Ident::new(table_name)]),
                alias: None,
                args: None,
                with_hints: vec![],
                version: None,
                partitions: vec![],
            },
            joins: vec![],
        }],
        lateral_views: vec![],
        selection: None,
        group_by: sqlparser::ast::GroupByExpr::Expressions(vec![]),
        cluster_by: vec![],
        distribute_by: vec![],
        sort_by: vec![],
        having: None,
        named_window: vec![],
        qualify: None,
    }
}

fn literal_select(rows: &[crate::ir::instruction::Row]) -> Select {
    // Constructed rows are rendered as a `SELECT ... UNION ALL SELECT ...`
    // values table; the first row's keys fix the column order.
    let mut select = base_select("");
    select.from.clear();
    if let Some(first) = rows.first() {
        select.projection = first
            .iter()
            .map(|(k, v)| SelectItem::ExprWithAlias {
                expr: value_literal(v),
                alias: Ident::new(k.clone()),
            })
            .collect();
    }
    select
}

/// Builds a projection list of native columns aliased to their OCSF names,
/// using the data source's forward mapping. Falls back to an unqualified
/// wildcard when the mapping has nothing registered for this entity base
/// (e.g. `ocsf_base` names an entity the mapping never covers).
fn native_projection_items(forward: &crate::mapping::ForwardMap, ocsf_base: Option<&str>, attrs: Option<&[String]>) -> Vec<SelectItem> {
    let pairs = translate_projection_to_native(forward, ocsf_base, attrs);
    if pairs.is_empty() {
        return vec![SelectItem::Wildcard(Default::default())];
    }
    pairs
        .into_iter()
        .map(|(native, ocsf)| SelectItem::ExprWithAlias {
            expr: ident_expr(&native),
            alias: Ident::new(ocsf),
        })
        .collect()
}

fn ident_expr(name: &str) -> SqlExpr {
    if let Some((base, rest)) = name.split_once('.') {
        SqlExpr::CompoundIdentifier(vec![Ident::new(base), Ident::new(rest)])
    } else {
        SqlExpr::Identifier(Ident::new(name))
    }
}

fn value_literal(value: &Value) -> SqlExpr {
    match value {
        Value::Int(i) => SqlExpr::Value(SqlValue::Number(i.to_string(), false)),
        Value::Float(f) => SqlExpr::Value(SqlValue::Number(f.to_string(), false)),
        Value::Str(s) => SqlExpr::Value(SqlValue::SingleQuotedString(s.clone())),
        Value::Bool(b) => SqlExpr::Value(SqlValue::Boolean(*b)),
        Value::Timestamp(t) => timestamp_literal(t),
        Value::Null => SqlExpr::Value(SqlValue::Null),
    }
}

fn timestamp_literal(t: &chrono::DateTime<chrono::Utc>) -> SqlExpr {
    SqlExpr::Value(SqlValue::SingleQuotedString(t.to_rfc3339()))
}

fn render_basic(field: &str, op: Operator, value: &Value, regexp_function: &str) -> SqlExpr {
    match op {
        Operator::Like => SqlExpr::Like {
            negated: false,
            expr: Box::new(ident_expr(field)),
            pattern: Box::new(value_literal(value)),
            escape_char: None,
        },
        Operator::NotLike => SqlExpr::Like {
            negated: true,
            expr: Box::new(ident_expr(field)),
            pattern: Box::new(value_literal(value)),
            escape_char: None,
        },
        Operator::Matches | Operator::NotMatches => {
            let call = SqlExpr::Function(sqlparser::ast::Function {
                name: ObjectName(vec![Ident::new(regexp_function)]),
                args: vec![
                    sqlparser::ast::FunctionArg::Unnamed(sqlparser::ast::FunctionArgExpr::Expr(ident_expr(field))),
                    sqlparser::ast::FunctionArg::Unnamed(sqlparser::ast::FunctionArgExpr::Expr(value_literal(value))),
                ],
                filter: None,
                null_treatment: None,
                over: None,
                distinct: false,
                special: false,
                order_by: vec![],
            });
            if matches!(op, Operator::NotMatches) {
                SqlExpr::UnaryOp {
                    op: UnaryOperator::Not,
                    expr: Box::new(call),
                }
            } else {
                call
            }
        }
        _ => {
            let binary_op = match op {
                Operator::Eq => BinaryOperator::Eq,
                Operator::Ne => BinaryOperator::NotEq,
                Operator::Lt => BinaryOperator::Lt,
                Operator::Le => BinaryOperator::LtEq,
                Operator::Gt => BinaryOperator::Gt,
                Operator::Ge => BinaryOperator::GtEq,
                _ => BinaryOperator::Eq,
            };
            SqlExpr::BinaryOp {
                left: Box::new(ident_expr(field)),
                op: binary_op,
                right: Box::new(value_literal(value)),
            }
        }
    }
}

fn and_opt(a: Option<SqlExpr>, b: Option<SqlExpr>) -> Option<SqlExpr> {
    match (a, b) {
        (Some(a), Some(b)) => Some(SqlExpr::BinaryOp {
            left: Box::new(a),
            op: BinaryOperator::And,
            right: Box::new(b),
        }),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::EdgeKind;
    use crate::ir::BasicComparison;

    fn lower(source: &str) -> (MappingRegistry, Graph, InstructionId) {
        let registry = crate::mapping::MappingRegistry::new();
        let graph = crate::frontend::compile(source, &registry).unwrap();
        let sink = graph.get_sink_nodes()[0];
        (registry, graph, sink)
    }

    #[test]
    fn translates_plain_get_with_limit() {
        let (registry, graph, sink) = lower("a = GET process FROM ds WHERE pid = 4 LIMIT 10\nDISP a");
        let sql = Translator::new(&graph, Dialect::Generic, &registry).translate(sink).unwrap();
        assert!(sql.contains("pid"));
        assert!(sql.contains("LIMIT 10"));
    }

    #[test]
    fn mssql_rejects_regex_operator() {
        let (registry, graph, sink) = lower("a = GET process FROM ds WHERE name MATCHES \"^cmd\"\nDISP a");
        let err = Translator::new(&graph, Dialect::MsSql, &registry).translate(sink);
        assert!(err.is_err());
    }

    #[test]
    fn raw_datasource_comparison_lowers_to_the_native_column() {
        let registry = crate::mapping::MappingRegistry::new();
        registry.register_yaml("feed", "process:\n  pid: proc_id\n").unwrap();
        let graph = crate::frontend::compile("a = GET process FROM feed WHERE pid = 4\nDISP a", &registry).unwrap();
        let sink = graph.get_sink_nodes()[0];
        let sql = Translator::new(&graph, Dialect::Generic, &registry).translate(sink).unwrap();
        assert!(sql.contains("proc_id"), "expected native column name in: {sql}");
        assert!(!sql.contains("process.pid"), "OCSF-qualified name should not leak into native SQL: {sql}");
    }

    #[test]
    fn reference_comparison_keys_by_variable_not_first_branch() {
        // Two distinct branch variables feeding one filter; the comparison
        // names the second one explicitly, so the generated subquery must
        // come from that variable's CTE, not whichever branch happened to
        // materialize first.
        let mut graph = Graph::new();
        let ds_a = graph.add_node(Instruction::DataSource { name: "ds".into() });
        let a = graph.add_node(Instruction::Variable { name: "a".into(), entity_type: None, native_type: None });
        graph.add_edge(ds_a, a, EdgeKind::Trunk).unwrap();

        let ds_b = graph.add_node(Instruction::DataSource { name: "ds".into() });
        let b = graph.add_node(Instruction::Variable { name: "b".into(), entity_type: None, native_type: None });
        graph.add_edge(ds_b, b, EdgeKind::Trunk).unwrap();

        let ds_c = graph.add_node(Instruction::DataSource { name: "ds".into() });
        let c = graph.add_node(Instruction::Variable { name: "c".into(), entity_type: None, native_type: None });
        graph.add_edge(ds_c, c, EdgeKind::Trunk).unwrap();

        let comparison = BasicComparison::reference("pid", Operator::In, "b", "pid");
        let filt = graph.add_node(Instruction::Filter {
            expr: FilterExpr {
                exp: Some(BoolExp::Comparison(comparison)),
                timerange: None,
            },
        });
        graph.add_edge(c, filt, EdgeKind::Trunk).unwrap();
        graph.add_edge(a, filt, EdgeKind::Branch).unwrap();
        graph.add_edge(b, filt, EdgeKind::Branch).unwrap();

        let out = graph.add_node(Instruction::Variable { name: "out".into(), entity_type: None, native_type: None });
        graph.add_edge(filt, out, EdgeKind::Trunk).unwrap();

        let registry = MappingRegistry::new();
        let sql = Translator::new(&graph, Dialect::Generic, &registry).translate(out).unwrap();
        // `b`'s CTE name must appear directly inside the `IN (...)` subquery;
        // a bug that picks "the first branch found" instead of the one the
        // comparison actually names would instead point at `a`'s CTE.
        let in_clause_start = sql.find("pid IN").expect("reference comparison rendered");
        let cte_defs = &sql[..in_clause_start];
        assert!(cte_defs.matches("SELECT").count() >= 2, "both branches materialize as CTEs: {sql}");
    }

    #[test]
    fn composite_reference_renders_a_row_value_membership_test() {
        let mut graph = Graph::new();
        let ds_a = graph.add_node(Instruction::DataSource { name: "ds".into() });
        let a = graph.add_node(Instruction::Variable { name: "a".into(), entity_type: None, native_type: None });
        graph.add_edge(ds_a, a, EdgeKind::Trunk).unwrap();

        let ds_b = graph.add_node(Instruction::DataSource { name: "ds".into() });
        let b = graph.add_node(Instruction::Variable { name: "b".into(), entity_type: None, native_type: None });
        graph.add_edge(ds_b, b, EdgeKind::Trunk).unwrap();

        let comparison = BasicComparison::composite_reference(
            vec!["pid".into(), "ppid".into()],
            Operator::In,
            "b",
            vec!["pid".into(), "ppid".into()],
        )
        .unwrap();
        let filt = graph.add_node(Instruction::Filter {
            expr: FilterExpr {
                exp: Some(BoolExp::Comparison(comparison)),
                timerange: None,
            },
        });
        graph.add_edge(a, filt, EdgeKind::Trunk).unwrap();
        graph.add_edge(b, filt, EdgeKind::Branch).unwrap();

        let out = graph.add_node(Instruction::Variable { name: "out".into(), entity_type: None, native_type: None });
        graph.add_edge(filt, out, EdgeKind::Trunk).unwrap();

        let registry = MappingRegistry::new();
        let sql = Translator::new(&graph, Dialect::Generic, &registry).translate(out).unwrap();
        assert!(sql.contains(r#"("pid", "ppid") IN (SELECT "pid", "ppid" FROM"#), "{sql}");
    }
}
