//! Resolves `Analytic` nodes and executes the rest of a plan as SQL against
//! a [Connection]. Walks the graph bottom-up, and whenever an `Analytic`
//! instruction is reached, pulls its predecessor's rows in-process, runs the
//! named analytic over them, writes the result back as a table, and splices
//! the node into a `DataSource` pointing at that table. Never mutates the
//! caller's graph: [Evaluator::evaluate_graph] works over a `deepcopy()` of
//! it, and identifies analytics by structure rather than call-stack depth.

use std::collections::BTreeSet;

use crate::error::{Error, Reason, Result};
use crate::ir::graph::EdgeKind;
use crate::ir::{Graph, Instruction, InstructionId, Row};
use crate::mapping::MappingRegistry;
use crate::sql::Dialect;

use super::backend::Connection;
use crate::frame::analytics::AnalyticsRegistry;

/// Drives evaluation of an IR graph: resolves `Analytic` nodes against a
/// connection, then hands the analytic-free remainder to the SQL translator.
pub struct Evaluator<'a> {
    analytics: AnalyticsRegistry,
    registry: &'a MappingRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(registry: &'a MappingRegistry) -> Self {
        Evaluator {
            analytics: AnalyticsRegistry::new(),
            registry,
        }
    }

    pub fn with_analytics(mut self, analytics: AnalyticsRegistry) -> Self {
        self.analytics = analytics;
        self
    }

    /// Evaluates the chain feeding `sink` and returns its rows. Resolves any
    /// `Analytic` nodes along the way by materializing their predecessor's
    /// rows through `conn`, running the analytic in-process, and writing the
    /// result back as a table before translating the rest to SQL.
    pub fn evaluate_graph(&self, graph: &Graph, sink: InstructionId, conn: &mut dyn Connection) -> Result<Vec<Row>> {
        let mut working = graph.deepcopy();
        let mut visited = BTreeSet::new();
        self.materialize_analytics(&mut working, sink, conn, &mut visited)?;
        let sql = crate::sql::translate(&working, sink, conn.dialect(), self.registry)?;
        conn.execute_query(&sql)
    }

    /// Renders the SQL a plan would run, without executing it. `Analytic`
    /// nodes have no SQL translation, so a chain containing one cannot be
    /// explained without a connection to resolve it against first.
    pub fn explain_graph(&self, graph: &Graph, sink: InstructionId, dialect: Dialect) -> Result<String> {
        crate::sql::translate(graph, sink, dialect, self.registry)
    }

    fn materialize_analytics(
        &self,
        graph: &mut Graph,
        node: InstructionId,
        conn: &mut dyn Connection,
        visited: &mut BTreeSet<InstructionId>,
    ) -> Result<()> {
        if !visited.insert(node) {
            return Ok(());
        }
        let (trunk, branches) = graph.get_trunk_n_branches(node)?;
        for pred in trunk.iter().chain(branches.iter()) {
            self.materialize_analytics(graph, *pred, conn, visited)?;
        }

        let Some(Instruction::Analytic { name, args }) = graph.node(node).cloned() else {
            return Ok(());
        };

        let pred = trunk.first().copied().ok_or_else(|| {
            Error::new(Reason::Bug {
                details: "Analytic node has no predecessor".to_string(),
            })
        })?;

        let temp_sink = graph.add_node(Instruction::Return);
        graph.add_edge(pred, temp_sink, EdgeKind::Trunk)?;
        let sql = crate::sql::translate(graph, temp_sink, conn.dialect(), self.registry)?;
        let rows = conn.execute_query(&sql)?;

        let out_rows = self.analytics.run(&name, &args, &rows)?;
        let table_name = format!("kestrel_analytic_{node}");
        conn.write_table(&table_name, &out_rows)?;

        *graph.node_mut(node).expect("node just matched above") = Instruction::DataSource { name: table_name };
        Ok(())
    }
}
