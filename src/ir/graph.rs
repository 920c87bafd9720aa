use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Reason, Result};
use crate::utils::{toposort, IdGenerator};

use super::instruction::{Instruction, InstructionId};

/// Why an edge exists: `Trunk` edges form the single linear chain a node was
/// built on top of; `Branch` edges are the extra predecessors a `Filter`
/// gains when one of its comparisons reads another variable's column. The
/// SQL translator walks trunk edges to build its CTE chain and branch edges
/// to resolve references into subqueries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EdgeKind {
    Trunk,
    Branch,
}

/// The instruction-level intermediate representation: a DAG of `Instruction`
/// nodes built up by the frontend as it lowers a Kestrel statement block, and
/// walked by the SQL translator/evaluator to produce a query plan. Every
/// mutation keeps the graph acyclic (Invariant: the IR is a DAG).
#[derive(Debug, Clone, Default)]
pub struct Graph {
    ids: IdGenerator<InstructionId>,
    nodes: BTreeMap<InstructionId, Instruction>,
    // predecessor -> (successor, kind)
    out_edges: BTreeMap<InstructionId, Vec<(InstructionId, EdgeKind)>>,
    // successor -> (predecessor, kind)
    in_edges: BTreeMap<InstructionId, Vec<(InstructionId, EdgeKind)>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, instruction: Instruction) -> InstructionId {
        let id = self.ids.gen();
        self.nodes.insert(id, instruction);
        self.out_edges.insert(id, Vec::new());
        self.in_edges.insert(id, Vec::new());
        id
    }

    pub fn node(&self, id: InstructionId) -> Option<&Instruction> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: InstructionId) -> Option<&mut Instruction> {
        self.nodes.get_mut(&id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = InstructionId> + '_ {
        self.nodes.keys().copied()
    }

    /// Adds a directed edge `from -> to` and rejects it if doing so would
    /// introduce a cycle.
    pub fn add_edge(&mut self, from: InstructionId, to: InstructionId, kind: EdgeKind) -> Result<()> {
        self.out_edges.entry(from).or_default().push((to, kind));
        self.in_edges.entry(to).or_default().push((from, kind));

        if self.toposort_all().is_none() {
            // revert
            self.out_edges.get_mut(&from).unwrap().retain(|(n, k)| !(*n == to && *k == kind));
            self.in_edges.get_mut(&to).unwrap().retain(|(n, k)| !(*n == from && *k == kind));
            return Err(Error::new(Reason::Bug {
                details: format!("adding edge {from} -> {to} would create a cycle"),
            }));
        }
        Ok(())
    }

    fn toposort_all(&self) -> Option<Vec<InstructionId>> {
        let deps: Vec<(InstructionId, Vec<InstructionId>)> = self
            .nodes
            .keys()
            .map(|&id| {
                let preds = self
                    .in_edges
                    .get(&id)
                    .map(|v| v.iter().map(|(p, _)| *p).collect())
                    .unwrap_or_default();
                (id, preds)
            })
            .collect();
        toposort(&deps, None).map(|order| order.into_iter().copied().collect())
    }

    pub fn predecessors(&self, id: InstructionId) -> Vec<InstructionId> {
        self.in_edges
            .get(&id)
            .map(|v| v.iter().map(|(p, _)| *p).collect())
            .unwrap_or_default()
    }

    pub fn successors(&self, id: InstructionId) -> Vec<InstructionId> {
        self.out_edges
            .get(&id)
            .map(|v| v.iter().map(|(s, _)| *s).collect())
            .unwrap_or_default()
    }

    /// Splits `id`'s predecessors into its trunk predecessor(s) (the linear
    /// chain it was built on) and its branch predecessors (variables pulled
    /// in only to resolve a reference comparison). Fails if `id` names a
    /// transforming node (anything but a root-eligible or `Reference` node)
    /// and does not have exactly one trunk predecessor.
    pub fn get_trunk_n_branches(&self, id: InstructionId) -> Result<(Vec<InstructionId>, Vec<InstructionId>)> {
        let mut trunk = Vec::new();
        let mut branch = Vec::new();
        for (pred, kind) in self.in_edges.get(&id).cloned().unwrap_or_default() {
            match kind {
                EdgeKind::Trunk => trunk.push(pred),
                EdgeKind::Branch => branch.push(pred),
            }
        }
        if let Some(instr) = self.nodes.get(&id) {
            if instr.is_transforming() && trunk.len() != 1 {
                return Err(Error::new(Reason::Bug {
                    details: format!(
                        "node {id} ({}) must have exactly one trunk predecessor, found {}",
                        instr.kind_name(),
                        trunk.len()
                    ),
                }));
            }
        }
        Ok((trunk, branch))
    }

    pub fn get_sink_nodes(&self) -> Vec<InstructionId> {
        self.nodes
            .iter()
            .filter(|(_, instr)| instr.is_sink())
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn get_nodes_by_type(&self, kind_name: &str) -> Vec<InstructionId> {
        self.nodes
            .iter()
            .filter(|(_, instr)| instr.kind_name() == kind_name)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Returns the most recently created `Variable` node with this name.
    /// Re-assignment creates a fresh node rather than mutating the old one,
    /// so "most recent" is simply the one with the highest id.
    pub fn get_variable(&self, name: &str) -> Option<InstructionId> {
        self.nodes
            .iter()
            .filter(|(_, instr)| matches!(instr, Instruction::Variable { name: n, .. } if n == name))
            .map(|(&id, _)| id)
            .max()
    }

    /// Walks trunk edges backward from `id` until it reaches a `DataSource`
    /// node, returning it. Used by the planner to know which connection a
    /// subgraph ultimately reads from, without call-stack introspection.
    pub fn find_datasource_of_node(&self, id: InstructionId) -> Option<InstructionId> {
        let mut current = id;
        loop {
            if matches!(self.nodes.get(&current), Some(Instruction::DataSource { .. })) {
                return Some(current);
            }
            let (trunk, _) = self.get_trunk_n_branches(current).ok()?;
            current = *trunk.first()?;
        }
    }

    /// Deep-copies the subgraph of `id` and everything it (transitively)
    /// depends on via trunk or branch edges, assigning every copied node a
    /// fresh id. Returns the id of the copy corresponding to `id`. Used
    /// before splicing a shared branch (e.g. a referenced variable) into a
    /// private translator chain, so resolving one reference can't mutate a
    /// subgraph still used elsewhere.
    pub fn duplicate_dependent_subgraph_of_node(&mut self, id: InstructionId) -> InstructionId {
        let mut remap: BTreeMap<InstructionId, InstructionId> = BTreeMap::new();
        self.duplicate_rec(id, &mut remap)
    }

    fn duplicate_rec(&mut self, id: InstructionId, remap: &mut BTreeMap<InstructionId, InstructionId>) -> InstructionId {
        if let Some(&new_id) = remap.get(&id) {
            return new_id;
        }
        let preds = self.in_edges.get(&id).cloned().unwrap_or_default();
        let mut new_preds = Vec::with_capacity(preds.len());
        for (pred, kind) in preds {
            let new_pred = self.duplicate_rec(pred, remap);
            new_preds.push((new_pred, kind));
        }

        let instruction = self.nodes.get(&id).expect("node exists").clone();
        let new_id = self.add_node(instruction);
        remap.insert(id, new_id);
        for (new_pred, kind) in new_preds {
            self.add_edge(new_pred, new_id, kind)
                .expect("duplicated subgraph cannot introduce a cycle");
        }
        new_id
    }

    /// Full clone with identical ids. Named for the defensive
    /// copy-before-mutate call sites that want an owned graph to mutate
    /// freely without touching the caller's.
    pub fn deepcopy(&self) -> Graph {
        self.clone()
    }

    /// Merges `other` into `self`, relabeling its node ids to avoid
    /// collisions, and returns a map from `other`'s old ids to their new ids
    /// in `self`. Then reconnects: every `Reference(name)` carried over from
    /// `other` that names a `Variable` already present in `self` gets a
    /// trunk edge to that variable, the same way lowering resolves a
    /// same-block forward reference. A `Reference` with no matching
    /// `Variable` in either graph is left dangling for a later `compose` or
    /// for evaluation to reject.
    pub fn compose(&mut self, other: &Graph) -> BTreeMap<InstructionId, InstructionId> {
        // Snapshot self's own variables before merging: `other`'s copied
        // nodes get fresh, higher ids, which would otherwise shadow a
        // same-named variable of `self`'s in `get_variable`'s
        // most-recent-wins lookup.
        let mut self_variables: BTreeMap<String, InstructionId> = BTreeMap::new();
        for (&id, instr) in &self.nodes {
            if let Instruction::Variable { name, .. } = instr {
                self_variables.entry(name.clone()).and_modify(|e| *e = (*e).max(id)).or_insert(id);
            }
        }

        let mut remap = BTreeMap::new();
        let order = other
            .toposort_all()
            .expect("source graph is acyclic by construction");

        for old_id in order {
            let instruction = other.nodes.get(&old_id).expect("node exists").clone();
            let new_id = self.add_node(instruction);
            remap.insert(old_id, new_id);
        }
        for (&old_id, &new_id) in remap.iter() {
            for (old_pred, kind) in other.in_edges.get(&old_id).cloned().unwrap_or_default() {
                let new_pred = remap[&old_pred];
                self.add_edge(new_pred, new_id, kind)
                    .expect("source graph's edges cannot introduce a cycle in the copy");
            }
        }

        for &new_id in remap.values() {
            let name = match self.nodes.get(&new_id) {
                Some(Instruction::Reference { name }) => name.clone(),
                _ => continue,
            };
            let already_linked = self.in_edges.get(&new_id).map(|e| !e.is_empty()).unwrap_or(false);
            if already_linked {
                continue;
            }
            if let Some(&var_id) = self_variables.get(&name) {
                self.add_edge(var_id, new_id, EdgeKind::Trunk)
                    .expect("reconnecting a reference cannot introduce a cycle");
            }
        }

        remap
    }

    pub fn referenced_variable_names(&self) -> BTreeSet<String> {
        self.nodes
            .values()
            .filter_map(|instr| match instr {
                Instruction::Reference { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}
