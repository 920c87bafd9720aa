use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Reason, Result, WithErrorInfo};
use crate::ir::graph::EdgeKind;
use crate::ir::instruction::{InstructionId, Row};
use crate::ir::{BasicComparison, BoolExp, FilterExpr, Graph, Instruction, MultiComp, Operator, TimeRange, Value};
use crate::mapping::{translate_comparison_to_ocsf, MappingRegistry, ReverseMap};

use super::ast::*;

/// Lowers a parsed block of Kestrel statements into an IR graph, resolving
/// variable references against what has been assigned so far and mapping
/// `GET`'s `WHERE` clause from a data source's native field names into OCSF
/// field names using that data source's registered mapping.
pub struct Lowerer<'a> {
    graph: Graph,
    registry: &'a MappingRegistry,
    now: DateTime<Utc>,
    /// Name -> `Reference` node created the first time a not-yet-assigned
    /// variable was read, pending resolution once the whole block has been
    /// lowered (forward references) or a later `compose` (cross-block ones).
    pending_references: std::collections::BTreeMap<String, (InstructionId, crate::span::Span)>,
}

impl<'a> Lowerer<'a> {
    pub fn new(registry: &'a MappingRegistry, now: DateTime<Utc>) -> Self {
        Lowerer {
            graph: Graph::new(),
            registry,
            now,
            pending_references: std::collections::BTreeMap::new(),
        }
    }

    pub fn lower(mut self, block: &Block) -> Result<Graph> {
        for statement in &block.statements {
            self.lower_statement(statement)?;
        }
        self.resolve_pending_references();
        Ok(self.graph)
    }

    /// Links every `Reference` created by [Self::resolve_variable] to the
    /// `Variable` it names, now that the whole block has been lowered and
    /// forward references have had a chance to be assigned. A name still
    /// unmatched at this point is left as a dangling `Reference` node rather
    /// than an error here: it may name a variable from an enclosing scope
    /// that only exists once a caller `compose`s this graph with another
    /// one; evaluation rejects it if it is still dangling by then.
    fn resolve_pending_references(&mut self) {
        for (name, (ref_id, _span)) in std::mem::take(&mut self.pending_references) {
            if let Some(var_id) = self.graph.get_variable(&name) {
                self.graph
                    .add_edge(var_id, ref_id, EdgeKind::Trunk)
                    .expect("linking a forward reference cannot introduce a cycle");
            }
        }
    }

    fn lower_statement(&mut self, statement: &Statement) -> Result<()> {
        match &statement.kind {
            StatementKind::Assign { target, source } => {
                let result = self.lower_source(source, statement.span.start)?;
                let (entity_type, native_type) = self.infer_entity(result);
                let var = self.graph.add_node(Instruction::Variable {
                    name: target.clone(),
                    entity_type,
                    native_type,
                });
                self.graph
                    .add_edge(result, var, EdgeKind::Trunk)
                    .map_err(|e| e.with_span(Some(statement.span)))?;
                Ok(())
            }
            StatementKind::Disp { variable } => {
                let var_id = self.resolve_variable(variable, statement.span)?;
                let sink = self.graph.add_node(Instruction::Return);
                self.graph
                    .add_edge(var_id, sink, EdgeKind::Trunk)
                    .map_err(|e| e.with_span(Some(statement.span)))?;
                Ok(())
            }
            StatementKind::Explain { variable } => {
                let var_id = self.resolve_variable(variable, statement.span)?;
                let sink = self.graph.add_node(Instruction::Explain);
                self.graph
                    .add_edge(var_id, sink, EdgeKind::Trunk)
                    .map_err(|e| e.with_span(Some(statement.span)))?;
                Ok(())
            }
        }
    }

    /// Walks trunk predecessors of `start` looking for the node that fixes
    /// the chain's entity type: a `ProjectEntity`, or a `Variable` already
    /// tagged with one (e.g. `b = a` re-binding an existing variable). Stops
    /// at a root node or a still-dangling `Reference` and reports unknown.
    fn infer_entity(&self, start: InstructionId) -> (Option<String>, Option<String>) {
        let mut current = start;
        loop {
            match self.graph.node(current) {
                Some(Instruction::ProjectEntity { ocsf_base, native_base }) => {
                    return (Some(ocsf_base.clone()), Some(native_base.clone()));
                }
                Some(Instruction::Variable { entity_type, native_type, .. }) => {
                    return (entity_type.clone(), native_type.clone());
                }
                _ => {}
            }
            let trunk = match self.graph.get_trunk_n_branches(current) {
                Ok((trunk, _)) => trunk,
                Err(_) => return (None, None),
            };
            match trunk.first() {
                Some(&next) => current = next,
                None => return (None, None),
            }
        }
    }

    /// Resolves a name against what has been assigned so far in this block.
    /// If nothing by that name exists yet, emits a `Reference(name)` node
    /// instead of failing outright: it may be a forward reference to a
    /// variable this same block assigns later (linked once the whole block
    /// has been lowered, see [Self::resolve_pending_references]), or one
    /// from a scope a caller will later splice in via `Graph::compose`.
    fn resolve_variable(&mut self, name: &str, span: crate::span::Span) -> Result<InstructionId> {
        if let Some(id) = self.graph.get_variable(name) {
            return Ok(id);
        }
        if let Some(&(id, _)) = self.pending_references.get(name) {
            return Ok(id);
        }
        let id = self.graph.add_node(Instruction::Reference { name: name.to_string() });
        self.pending_references.insert(name.to_string(), (id, span));
        Ok(id)
    }

    fn lower_source(&mut self, source: &Source, span_start: usize) -> Result<InstructionId> {
        let span = crate::span::Span::new(span_start, span_start);
        match source {
            Source::New { rows, .. } => self.lower_new(rows),
            Source::Get {
                entity_type,
                datasource,
                clauses,
            } => self.lower_get(entity_type, datasource, clauses, span),
            Source::Find {
                relation,
                entity_type,
                base_variable,
                clauses,
            } => self.lower_find(relation, entity_type, base_variable, clauses, span),
            Source::Transform {
                base_variable,
                attrs,
                clauses,
            } => self.lower_transform(base_variable, attrs.as_deref(), clauses, span),
            Source::Apply {
                analytic,
                on_variable,
                args,
            } => self.lower_apply(analytic, on_variable, args, span),
        }
        .map_err(|e| {
            if e.span.is_none() {
                e.with_span(Some(span))
            } else {
                e
            }
        })
    }

    fn lower_new(&mut self, rows: &[Vec<(String, Value)>]) -> Result<InstructionId> {
        let rows: Vec<Row> = rows.iter().map(|r| r.iter().cloned().collect()).collect();
        Ok(self.graph.add_node(Instruction::Construct { rows }))
    }

    fn lower_get(
        &mut self,
        entity_type: &str,
        datasource: &str,
        clauses: &Clauses,
        span: crate::span::Span,
    ) -> Result<InstructionId> {
        let ds = self.graph.add_node(Instruction::DataSource {
            name: datasource.to_string(),
        });

        let reverse = self.registry.get(datasource).map(|m| m.reverse.clone());
        let expr = self.build_filter_expr(clauses, reverse.as_ref())?;

        let mut current = ds;
        if !expr.is_empty() {
            current = self.add_filter_node(current, expr, span)?;
        }

        let ocsf_base = self
            .registry
            .get(datasource)
            .map(|m| m.ocsf_entity_name(entity_type))
            .unwrap_or_else(|| entity_type.to_string());
        let projected = self.graph.add_node(Instruction::ProjectEntity {
            ocsf_base,
            native_base: entity_type.to_string(),
        });
        self.graph.add_edge(current, projected, EdgeKind::Trunk)?;
        current = projected;

        current = self.chain_sort_limit_offset(current, clauses)?;
        Ok(current)
    }

    fn lower_find(
        &mut self,
        relation: &str,
        entity_type: &str,
        base_variable: &str,
        clauses: &Clauses,
        span: crate::span::Span,
    ) -> Result<InstructionId> {
        let base_id = self.resolve_variable(base_variable, span)?;
        let ds_id = self.graph.find_datasource_of_node(base_id).ok_or_else(|| {
            Error::new(Reason::SourceNotFound {
                name: base_variable.to_string(),
            })
        })?;
        // The relation traversal reads from the same backing data source as
        // the base variable; duplicate the root so the base variable's own
        // chain isn't disturbed.
        let new_ds = self.graph.duplicate_dependent_subgraph_of_node(ds_id);

        let relation_exp = BoolExp::Comparison(BasicComparison::reference(
            format!("{relation}_ref"),
            Operator::In,
            base_variable,
            "id",
        ));
        let mut expr = self.build_filter_expr(clauses, None)?;
        expr.exp = Some(match expr.exp.take() {
            Some(existing) => BoolExp::And(Box::new(relation_exp), Box::new(existing)),
            None => relation_exp,
        });

        let filtered = self.add_filter_node(new_ds, expr, span)?;
        let ds_name = match self.graph.node(ds_id) {
            Some(Instruction::DataSource { name }) => Some(name.clone()),
            _ => None,
        };
        let ocsf_base = ds_name
            .as_deref()
            .and_then(|name| self.registry.get(name))
            .map(|m| m.ocsf_entity_name(entity_type))
            .unwrap_or_else(|| entity_type.to_string());
        let projected = self.graph.add_node(Instruction::ProjectEntity {
            ocsf_base,
            native_base: entity_type.to_string(),
        });
        self.graph.add_edge(filtered, projected, EdgeKind::Trunk)?;
        self.chain_sort_limit_offset(projected, clauses)
    }

    fn lower_transform(
        &mut self,
        base_variable: &str,
        attrs: Option<&[String]>,
        clauses: &Clauses,
        span: crate::span::Span,
    ) -> Result<InstructionId> {
        let base_id = self.resolve_variable(base_variable, span)?;

        let mut current = base_id;
        let expr = self.build_filter_expr(clauses, None)?;
        if !expr.is_empty() {
            current = self.add_filter_node(current, expr, span)?;
        }

        if let Some(attrs) = attrs {
            let projected = self.graph.add_node(Instruction::ProjectAttrs {
                attrs: attrs.to_vec(),
            });
            self.graph.add_edge(current, projected, EdgeKind::Trunk)?;
            current = projected;
        }

        self.chain_sort_limit_offset(current, clauses)
    }

    fn lower_apply(
        &mut self,
        analytic: &str,
        on_variable: &str,
        args: &[(String, Value)],
        span: crate::span::Span,
    ) -> Result<InstructionId> {
        let base_id = self.resolve_variable(on_variable, span)?;
        let args_rendered = args.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let node = self.graph.add_node(Instruction::Analytic {
            name: analytic.to_string(),
            args: args_rendered,
        });
        self.graph.add_edge(base_id, node, EdgeKind::Trunk)?;
        Ok(node)
    }

    fn chain_sort_limit_offset(&mut self, mut current: InstructionId, clauses: &Clauses) -> Result<InstructionId> {
        if let Some((field, ascending)) = &clauses.sort {
            let node = self.graph.add_node(Instruction::Sort {
                field: field.clone(),
                ascending: *ascending,
            });
            self.graph.add_edge(current, node, EdgeKind::Trunk)?;
            current = node;
        }
        if let Some(n) = clauses.offset {
            let node = self.graph.add_node(Instruction::Offset { n });
            self.graph.add_edge(current, node, EdgeKind::Trunk)?;
            current = node;
        }
        if let Some(n) = clauses.limit {
            let node = self.graph.add_node(Instruction::Limit { n });
            self.graph.add_edge(current, node, EdgeKind::Trunk)?;
            current = node;
        }
        Ok(current)
    }

    /// Adds a `Filter` node whose trunk predecessor is `predecessor`, wiring
    /// up a branch edge to every variable the filter's expression reads via
    /// a reference comparison.
    fn add_filter_node(
        &mut self,
        predecessor: InstructionId,
        expr: FilterExpr,
        span: crate::span::Span,
    ) -> Result<InstructionId> {
        let references = expr.get_references();
        let node = self.graph.add_node(Instruction::Filter { expr });
        self.graph.add_edge(predecessor, node, EdgeKind::Trunk)?;
        for name in references {
            let ref_var = self.resolve_variable(&name, span)?;
            self.graph.add_edge(ref_var, node, EdgeKind::Branch)?;
        }
        Ok(node)
    }

    fn build_filter_expr(&self, clauses: &Clauses, reverse: Option<&ReverseMap>) -> Result<FilterExpr> {
        let exp = match &clauses.filter {
            Some(ast) => Some(self.map_bool_expr(ast, reverse)?),
            None => None,
        };
        let timerange = match &clauses.timespan {
            Some(ts) => Some(self.resolve_timespan(ts)?),
            None => None,
        };
        Ok(FilterExpr { exp, timerange })
    }

    fn resolve_timespan(&self, ts: &TimespanAst) -> Result<TimeRange> {
        match ts {
            TimespanAst::Absolute { start, stop } => {
                let start = parse_timestamp(start)?;
                let end = parse_timestamp(stop)?;
                Ok(TimeRange { start, end })
            }
            TimespanAst::Relative { amount, unit } => {
                let delta = relative_duration(*amount, unit)?;
                Ok(TimeRange {
                    start: self.now - delta,
                    end: self.now,
                })
            }
        }
    }

    fn map_bool_expr(&self, ast: &BoolExprAst, reverse: Option<&ReverseMap>) -> Result<BoolExp> {
        match ast {
            BoolExprAst::And(a, b) => Ok(BoolExp::And(
                Box::new(self.map_bool_expr(a, reverse)?),
                Box::new(self.map_bool_expr(b, reverse)?),
            )),
            BoolExprAst::Or(a, b) => Ok(BoolExp::Or(
                Box::new(self.map_bool_expr(a, reverse)?),
                Box::new(self.map_bool_expr(b, reverse)?),
            )),
            BoolExprAst::Comparison(c) => self.map_comparison(c, reverse),
        }
    }

    fn map_comparison(&self, c: &ComparisonAst, reverse: Option<&ReverseMap>) -> Result<BoolExp> {
        let op = crate::ir::parse_operator(&c.op).ok_or_else(|| {
            Error::new(Reason::InvalidComparison {
                message: format!("unknown operator `{}`", c.op),
            })
            .with_span(Some(c.span))
        })?;

        let comparison = match &c.rhs {
            ComparisonRhs::Value(v) => BasicComparison::literal(&c.field, op, v.clone()),
            ComparisonRhs::ValueList(values) => {
                if !op.valid_in_multi_column_comparison() {
                    return Err(Error::new(Reason::InvalidOperatorInMultiColumnComparison {
                        operator: c.op.clone(),
                    })
                    .with_span(Some(c.span)));
                }
                BasicComparison {
                    field: c.field.clone(),
                    op,
                    value: None,
                    values: Some(values.clone()),
                    reference: None,
                    extra_fields: Vec::new(),
                    tuple_values: None,
                }
            }
            ComparisonRhs::Reference { variable, field } => {
                if !op.valid_in_multi_column_comparison() {
                    return Err(Error::new(Reason::InvalidOperatorInMultiColumnComparison {
                        operator: c.op.clone(),
                    })
                    .with_span(Some(c.span)));
                }
                BasicComparison::reference(&c.field, op, variable, field)
            }
        };

        match reverse {
            None => Ok(BoolExp::Comparison(comparison)),
            Some(reverse) => {
                if comparison.is_reference() {
                    // Reference comparisons already read OCSF-mapped columns
                    // off another variable's materialized result.
                    return Ok(BoolExp::Comparison(comparison));
                }
                let value = comparison.value.clone().unwrap_or(Value::Null);
                let mapped = translate_comparison_to_ocsf(reverse, &comparison.field, op, &value);
                match mapped.len() {
                    0 => Ok(BoolExp::Comparison(comparison)),
                    1 => Ok(BoolExp::Comparison(mapped.into_iter().next().unwrap())),
                    _ => Ok(BoolExp::MultiComp(MultiComp { comparisons: mapped })),
                }
            }
        }
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            Error::new(Reason::ParseError {
                message: format!("invalid timestamp `{s}`: {e}"),
            })
        })
}

fn relative_duration(amount: i64, unit: &str) -> Result<Duration> {
    let unit = unit.to_ascii_uppercase();
    let unit = unit.trim_end_matches('S');
    match unit {
        "SECOND" => Ok(Duration::seconds(amount)),
        "MINUTE" => Ok(Duration::minutes(amount)),
        "HOUR" => Ok(Duration::hours(amount)),
        "DAY" => Ok(Duration::days(amount)),
        "WEEK" => Ok(Duration::weeks(amount)),
        other => Err(Error::new(Reason::ParseError {
            message: format!("unknown time unit `{other}`"),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::parse;

    #[test]
    fn lowers_get_with_mapped_filter() {
        let registry = MappingRegistry::new();
        registry.register_yaml("ds", "process:\n  pid: proc_id\n").unwrap();
        let block = parse("x = GET process FROM ds WHERE pid = 4").unwrap();
        let graph = Lowerer::new(&registry, Utc::now()).lower(&block).unwrap();

        let filters = graph.get_nodes_by_type("Filter");
        assert_eq!(filters.len(), 1);
        match graph.node(filters[0]).unwrap() {
            Instruction::Filter { expr } => match expr.exp.as_ref().unwrap() {
                BoolExp::Comparison(c) => assert_eq!(c.field, "process.pid"),
                _ => panic!("expected comparison"),
            },
            _ => panic!("expected filter"),
        }
    }

    #[test]
    fn get_resolves_ocsf_base_through_the_entity_map() {
        let registry = MappingRegistry::new();
        registry.register_yaml("ds", "proc:\n  pid: pid\n").unwrap();
        registry.register_entity_alias("ds", "proc", "process").unwrap();
        let block = parse("a = GET proc FROM ds").unwrap();
        let graph = Lowerer::new(&registry, Utc::now()).lower(&block).unwrap();

        let projections = graph.get_nodes_by_type("ProjectEntity");
        assert_eq!(projections.len(), 1);
        match graph.node(projections[0]).unwrap() {
            Instruction::ProjectEntity { ocsf_base, native_base } => {
                assert_eq!(ocsf_base, "process");
                assert_eq!(native_base, "proc");
            }
            _ => panic!("expected ProjectEntity"),
        }

        let a = graph.get_variable("a").unwrap();
        match graph.node(a).unwrap() {
            Instruction::Variable { entity_type, native_type, .. } => {
                assert_eq!(entity_type.as_deref(), Some("process"));
                assert_eq!(native_type.as_deref(), Some("proc"));
            }
            _ => panic!("expected Variable"),
        }
    }

    #[test]
    fn lowers_transform_with_reference_branch() {
        let registry = MappingRegistry::new();
        let block = parse(
            "a = GET process FROM ds WHERE pid = 1\nb = GET process FROM ds WHERE pid = 2\nc = a WHERE pid IN b.pid",
        )
        .unwrap();
        let graph = Lowerer::new(&registry, Utc::now()).lower(&block).unwrap();
        let filters = graph.get_nodes_by_type("Filter");
        // one filter per GET plus one for the transform's reference comparison
        assert_eq!(filters.len(), 3);
        let b_var = graph.get_variable("b").unwrap();
        let reference_filter = filters
            .iter()
            .find(|&&f| graph.get_trunk_n_branches(f).unwrap().1.contains(&b_var))
            .expect("reference filter should branch to variable b");
        let (_, branch) = graph.get_trunk_n_branches(*reference_filter).unwrap();
        assert_eq!(branch, vec![b_var]);
    }

    #[test]
    fn unresolved_reference_lowers_to_a_dangling_reference_node() {
        // `nosuch` is never assigned in this block, so lowering succeeds
        // with a `Reference` node that has no trunk predecessor; the error
        // only surfaces once something tries to evaluate through it.
        let registry = MappingRegistry::new();
        let block = parse("DISP nosuch").unwrap();
        let graph = Lowerer::new(&registry, Utc::now()).lower(&block).unwrap();

        assert!(graph.referenced_variable_names().contains("nosuch"));

        let sink = graph.get_sink_nodes()[0];
        let evaluator = crate::frame::FrameEvaluator::new(&registry);
        assert!(evaluator.evaluate(&graph, sink).is_err());
    }

    #[test]
    fn forward_reference_within_the_same_block_resolves() {
        // `a` is read before it is assigned; lowering should link the
        // `Reference` node it creates to the `Variable` assigned later in
        // the same block instead of leaving it dangling.
        let registry = MappingRegistry::new();
        let block = parse("b = a WHERE pid = 1\na = GET process FROM ds").unwrap();
        let graph = Lowerer::new(&registry, Utc::now()).lower(&block).unwrap();

        assert!(graph.referenced_variable_names().is_empty());
        let a = graph.get_variable("a").unwrap();
        let filters = graph.get_nodes_by_type("Filter");
        assert_eq!(filters.len(), 1);
        let (trunk, _) = graph.get_trunk_n_branches(filters[0]).unwrap();
        // the filter's trunk predecessor is the (now-resolved) Reference
        // node, whose own trunk predecessor is `a`.
        let (ref_trunk, _) = graph.get_trunk_n_branches(trunk[0]).unwrap();
        assert_eq!(ref_trunk, vec![a]);
    }
}
