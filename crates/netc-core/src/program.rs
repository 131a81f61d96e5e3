//! Program: the graph container of the compiler.
//!
//! [`Program`] exclusively owns every [`ProgramNode`] in a petgraph
//! `StableGraph`, keyed by [`NodeKey`]. Everything else it holds refers to
//! nodes by key: the id map, the [`ProcessingOrder`], the input and output
//! lists. Edges run from a dependency to its user and carry the user-side
//! input slot, so the dependency list and the user set of a node are two
//! views of the same edge set and cannot drift apart.
//!
//! This module covers construction (from a topology or from a node subset of
//! another program), read-only queries, flag marking, layout recalculation,
//! the processing-order entry points and the diagnostic dump. The surgery
//! primitives live in [`crate::surgery`].

use std::fmt::Write as _;
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicU32, Ordering};

use indexmap::IndexMap;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::id::{NodeKey, PrimitiveId};
use crate::node::{DependencyEdge, ProgramNode};
use crate::options::BuildOptions;
use crate::order::{OrderSource, ProcessingOrder};
use crate::primitive::{Layout, Primitive, PrimitiveKind, PrimitiveType};
use crate::topology::Topology;

/// Small list of node keys, sized for the common fan-in/fan-out.
pub type NodeList = SmallVec<[NodeKey; 4]>;

pub(crate) fn ix(key: NodeKey) -> NodeIndex<u32> {
    key.into()
}

static NEXT_PROGRAM_ID: AtomicU32 = AtomicU32::new(0);

/// The program graph.
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) prog_id: u32,
    pub(crate) graph: StableGraph<ProgramNode, DependencyEdge, Directed, u32>,
    pub(crate) ids: IndexMap<PrimitiveId, NodeKey>,
    pub(crate) order: ProcessingOrder,
    pub(crate) inputs: Vec<NodeKey>,
    pub(crate) outputs: Vec<NodeKey>,
    pub(crate) optimized_out: Vec<PrimitiveId>,
    pub(crate) options: BuildOptions,
    pub(crate) is_internal: bool,
}

impl Program {
    /// Creates an empty program.
    pub fn new(options: BuildOptions, is_internal: bool) -> Self {
        Program {
            prog_id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
            graph: StableGraph::new(),
            ids: IndexMap::new(),
            order: ProcessingOrder::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            optimized_out: Vec::new(),
            options,
            is_internal,
        }
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Builds the node store from a topology and wires dependency edges.
    ///
    /// Declared outputs are marked; the processing order is left empty for
    /// the init phase to compute.
    pub fn from_topology(
        topology: &Topology,
        options: BuildOptions,
        is_internal: bool,
    ) -> Result<Self, CoreError> {
        let mut program = Program::new(options, is_internal);

        for prim in &topology.primitives {
            if program.ids.contains_key(&prim.id) {
                return Err(CoreError::DuplicateId { id: prim.id.clone() });
            }
            program.get_or_create(prim.clone());
        }
        program.add_split_outputs();

        let keys: Vec<NodeKey> = program.ids.values().copied().collect();
        for key in keys {
            program.add_node_dependencies(key)?;
        }
        program.collect_inputs();

        for id in &topology.inputs {
            let key = program.require_key(id.as_str())?;
            if program.dependency_count(key) != 0 {
                return Err(CoreError::InputHasDependencies { id: id.clone() });
            }
        }
        for id in &topology.outputs {
            let key = program.require_key(id.as_str())?;
            program.set_output(key, true);
        }
        Ok(program)
    }

    /// Builds an internal program from a subset of the nodes of `source`,
    /// keeping the dependency structure among them.
    ///
    /// Every dependency of a selected node must be selected too. `Data` nodes
    /// become `InputLayout` nodes of the same layout, so the subset can be
    /// compiled and fed on its own.
    pub fn from_nodes(
        source: &Program,
        nodes: &[NodeKey],
        options: BuildOptions,
    ) -> Result<Self, CoreError> {
        let mut program = Program::new(options, true);

        for &key in nodes {
            let node = source.get(key).ok_or(CoreError::UnknownKey { key })?;
            let prim = match node.kind() {
                PrimitiveKind::Data { layout } => Primitive::input_layout(node.id().clone(), *layout),
                _ => node.primitive().clone(),
            };
            let new_key = program.get_or_create(prim);
            let copy = &mut program.graph[ix(new_key)];
            copy.fused_activation = node.fused_activation;
            copy.set_output_padding(node.output_padding());
        }

        for &key in nodes {
            let node = &source[key];
            let dest = program.require_key(node.id().as_str())?;
            for dep in source.dependencies(key) {
                let dep_id = source[dep].id();
                let dest_dep = program
                    .key_of(dep_id.as_str())
                    .ok_or_else(|| CoreError::UnresolvedDependency {
                        id: node.id().clone(),
                        dependency: dep_id.clone(),
                    })?;
                program.connect(dest_dep, dest);
            }
        }
        program.collect_inputs();
        Ok(program)
    }

    /// Creates one crop helper per split output, named `split:part`, reading
    /// the split's input. Consumers resolve to the helpers; the split node
    /// itself ends up without users.
    fn add_split_outputs(&mut self) {
        let splits: Vec<(PrimitiveId, PrimitiveId, Vec<(String, u32)>)> = self
            .graph
            .node_weights()
            .filter_map(|node| match node.kind() {
                PrimitiveKind::Split { outputs } => {
                    let input = node.primitive().inputs.first()?.clone();
                    let parts = outputs
                        .iter()
                        .map(|o| (o.name.clone(), o.feature_offset))
                        .collect();
                    Some((node.id().clone(), input, parts))
                }
                _ => None,
            })
            .collect();

        for (split_id, input, parts) in splits {
            for (i, (name, offset)) in parts.iter().enumerate() {
                let features = parts.get(i + 1).map(|(_, next)| next.saturating_sub(*offset));
                let crop = Primitive {
                    id: split_id.split_part(name),
                    kind: PrimitiveKind::Crop {
                        feature_offset: *offset,
                        features,
                    },
                    inputs: vec![input.clone()],
                    output_padding: Default::default(),
                };
                self.get_or_create(crop);
            }
        }
    }

    fn add_node_dependencies(&mut self, key: NodeKey) -> Result<(), CoreError> {
        let node = &self.graph[ix(key)];
        let id = node.id().clone();
        let inputs = node.primitive().inputs.clone();
        for dep_id in inputs {
            let dep = self
                .key_of(dep_id.as_str())
                .ok_or_else(|| CoreError::UnresolvedDependency {
                    id: id.clone(),
                    dependency: dep_id.clone(),
                })?;
            self.connect(dep, key);
        }
        Ok(())
    }

    fn collect_inputs(&mut self) {
        self.inputs = self
            .ids
            .values()
            .copied()
            .filter(|&k| self.dependency_count(k) == 0)
            .collect();
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn prog_id(&self) -> u32 {
        self.prog_id
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn is_debug_build(&self) -> bool {
        self.options.debug
    }

    /// Internal programs are built by the compiler itself (e.g. for constant
    /// folding) and skip passes that only matter for user-visible programs.
    pub fn is_internal(&self) -> bool {
        self.is_internal
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    pub fn key_of(&self, id: &str) -> Option<NodeKey> {
        self.ids.get(id).copied()
    }

    /// Like [`key_of`](Self::key_of), but a missing id is an error.
    pub fn require_key(&self, id: &str) -> Result<NodeKey, CoreError> {
        self.key_of(id).ok_or_else(|| CoreError::NodeNotFound { id: id.into() })
    }

    pub fn node(&self, id: &str) -> Option<&ProgramNode> {
        self.key_of(id).and_then(|k| self.get(k))
    }

    /// Looks a node up by id and checks its primitive type.
    pub fn typed_node(&self, id: &str, ty: PrimitiveType) -> Result<&ProgramNode, CoreError> {
        let node = self
            .node(id)
            .ok_or_else(|| CoreError::NodeNotFound { id: id.into() })?;
        if node.primitive_type() != ty {
            return Err(CoreError::TypeMismatch {
                id: node.id().clone(),
                expected: ty,
                actual: node.primitive_type(),
            });
        }
        Ok(node)
    }

    pub fn contains_key(&self, key: NodeKey) -> bool {
        self.graph.contains_node(key.into())
    }

    pub fn get(&self, key: NodeKey) -> Option<&ProgramNode> {
        self.graph.node_weight(key.into())
    }

    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut ProgramNode> {
        self.graph.node_weight_mut(key.into())
    }

    pub(crate) fn check_key(&self, key: NodeKey) -> Result<(), CoreError> {
        if self.contains_key(key) {
            Ok(())
        } else {
            Err(CoreError::UnknownKey { key })
        }
    }

    /// Every live key, in id-registration order.
    pub fn keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.ids.values().copied()
    }

    /// Dependencies of `key` in input-slot order. A dependency feeding
    /// several slots appears once per slot.
    pub fn dependencies(&self, key: NodeKey) -> NodeList {
        let mut edges: SmallVec<[(u32, NodeKey); 4]> = self
            .graph
            .edges_directed(key.into(), Direction::Incoming)
            .map(|e| (e.weight().slot, NodeKey::from(e.source())))
            .collect();
        edges.sort_by_key(|&(slot, _)| slot);
        edges.into_iter().map(|(_, k)| k).collect()
    }

    /// Dependency at input `slot`.
    pub fn dependency(&self, key: NodeKey, slot: usize) -> Option<NodeKey> {
        self.dependencies(key).get(slot).copied()
    }

    pub fn dependency_count(&self, key: NodeKey) -> usize {
        self.graph
            .edges_directed(key.into(), Direction::Incoming)
            .count()
    }

    /// Distinct users of `key`, in key order.
    pub fn users(&self, key: NodeKey) -> NodeList {
        let mut users: NodeList = self
            .graph
            .edges_directed(key.into(), Direction::Outgoing)
            .map(|e| NodeKey::from(e.target()))
            .collect();
        users.sort();
        users.dedup();
        users
    }

    pub fn user_count(&self, key: NodeKey) -> usize {
        self.users(key).len()
    }

    pub fn processing_order(&self) -> &ProcessingOrder {
        &self.order
    }

    /// Direct access to the order, for passes that reorder nodes themselves.
    pub fn processing_order_mut(&mut self) -> &mut ProcessingOrder {
        &mut self.order
    }

    pub fn processing_number(&self, key: NodeKey) -> Option<usize> {
        self.order.processing_number(key)
    }

    /// Nodes in processing order.
    pub fn nodes_in_order(&self) -> impl Iterator<Item = (NodeKey, &ProgramNode)> + '_ {
        self.order.iter().map(move |k| (k, &self.graph[ix(k)]))
    }

    /// Nodes without dependencies.
    pub fn inputs(&self) -> &[NodeKey] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeKey] {
        &self.outputs
    }

    /// Ids of nodes removed by optimization.
    pub fn optimized_out(&self) -> &[PrimitiveId] {
        &self.optimized_out
    }

    // -----------------------------------------------------------------------
    // Processing order
    // -----------------------------------------------------------------------

    /// Recomputes the order depth-first from the outputs.
    pub fn calc_processing_order(&mut self) -> Result<(), CoreError> {
        let mut order = ProcessingOrder::new();
        let roots = self.outputs.clone();
        order.calc_dfs(&*self, &roots)?;
        self.order = order;
        Ok(())
    }

    /// Regroups the current order by breadth-first level.
    pub fn calc_bfs_processing_order(&mut self) {
        let mut order = std::mem::take(&mut self.order);
        order.calc_bfs(&*self);
        self.order = order;
    }

    pub fn is_order_correct(&self, key: NodeKey) -> bool {
        self.order.is_correct(self, key)
    }

    /// First node (in order) sitting at a wrong position, if any.
    pub fn first_misplaced_node(&self) -> Option<NodeKey> {
        self.order.iter().find(|&k| !self.is_order_correct(k))
    }

    // -----------------------------------------------------------------------
    // Flags and layouts
    // -----------------------------------------------------------------------

    pub fn set_output(&mut self, key: NodeKey, output: bool) {
        let Some(node) = self.graph.node_weight_mut(key.into()) else {
            return;
        };
        node.output = output;
        if output {
            if !self.outputs.contains(&key) {
                self.outputs.push(key);
            }
        } else {
            self.outputs.retain(|&k| k != key);
        }
    }

    /// Marks `key` constant when all its dependencies are constant. Nodes
    /// without dependencies keep their initial flag (`Data` constant, inputs
    /// not).
    pub fn mark_if_constant(&mut self, key: NodeKey) {
        let deps = self.dependencies(key);
        if deps.is_empty() {
            return;
        }
        let constant = deps.iter().all(|&d| self.graph[ix(d)].constant);
        self.graph[ix(key)].constant = constant;
    }

    /// Marks `key` as part of the data flow when it is a network input or any
    /// dependency is. Assumes dependencies are marked already.
    pub fn mark_if_data_flow(&mut self, key: NodeKey) {
        let data_flow = if self.graph[ix(key)].is_type(PrimitiveType::InputLayout) {
            true
        } else {
            self.dependencies(key)
                .iter()
                .any(|&d| self.graph[ix(d)].data_flow)
        };
        self.graph[ix(key)].data_flow = data_flow;
    }

    /// Recomputes the output layout of `key` from its dependencies' layouts.
    pub fn recalc_output_layout(&mut self, key: NodeKey) -> Option<Layout> {
        let deps = self.dependencies(key);
        let mut shapes = Vec::with_capacity(deps.len());
        let mut formats = Vec::with_capacity(deps.len());
        for dep in &deps {
            let layout = self.graph[ix(*dep)].output_layout();
            if let Some(layout) = layout {
                shapes.push(layout.shape);
                formats.push(layout.format);
            }
        }
        let node = &self.graph[ix(key)];
        let layout = if shapes.len() == deps.len() {
            node.kind().output_shape(&shapes).map(|shape| Layout {
                format: node.kind().output_format(&formats),
                shape,
                padding: node.output_padding(),
            })
        } else {
            None
        };
        self.graph[ix(key)].set_output_layout(layout);
        layout
    }

    /// Recomputes every layout in processing order.
    pub fn recalc_output_layouts(&mut self) {
        for key in self.order.to_vec() {
            self.recalc_output_layout(key);
        }
    }

    // -----------------------------------------------------------------------
    // Memory dependencies
    // -----------------------------------------------------------------------

    /// Records that `a` and `b` must not share a buffer (both directions).
    pub fn add_memory_dependency(&mut self, a: NodeKey, b: NodeKey) {
        if a == b {
            return;
        }
        let (Some(id_a), Some(id_b)) = (
            self.get(a).map(|n| n.id().clone()),
            self.get(b).map(|n| n.id().clone()),
        ) else {
            return;
        };
        self.graph[ix(a)].memory_dependencies.insert(id_b);
        self.graph[ix(b)].memory_dependencies.insert(id_a);
    }

    pub fn clear_memory_dependencies(&mut self) {
        for node in self.graph.node_weights_mut() {
            node.memory_dependencies.clear();
        }
    }

    /// Memory dependencies rendered one node per line, in processing order.
    pub fn memory_dependencies_string(&self) -> String {
        let mut out = String::from("Memory dependencies/restrictions:\n");
        for (_, node) in self.nodes_in_order() {
            let list: Vec<&str> = node.memory_dependencies().iter().map(|id| id.as_str()).collect();
            let _ = writeln!(
                out,
                "primitive: {} restricted list: {}",
                node.id(),
                list.join(", ")
            );
        }
        out
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Textual dump of the graph, in processing order, optionally filtered.
    ///
    /// A debugging aid; the format is not stable.
    pub fn dump(
        &self,
        stage: &str,
        with_full_info: bool,
        filter: Option<&dyn Fn(&ProgramNode) -> bool>,
    ) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "program {} after {}: {} nodes",
            self.prog_id,
            stage,
            self.node_count()
        );

        let unordered = self.keys().filter(|&k| !self.order.contains(k));
        let keys: Vec<NodeKey> = self.order.iter().chain(unordered).collect();

        for key in keys {
            let node = &self[key];
            if filter.is_some_and(|f| !f(node)) {
                continue;
            }
            let num = self
                .processing_number(key)
                .map_or_else(|| "-".to_string(), |n| n.to_string());
            let _ = write!(out, "{:>3} {} [{}]", num, node.id(), node.primitive_type());
            if with_full_info {
                let names = |keys: NodeList| -> String {
                    keys.iter()
                        .map(|&k| self[k].id().as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                let _ = write!(
                    out,
                    " deps: [{}] users: [{}]",
                    names(self.dependencies(key)),
                    names(self.users(key))
                );
                if let Some(layout) = node.output_layout() {
                    let _ = write!(out, " layout: {}", layout);
                }
                let mut flags = Vec::new();
                if node.is_output() {
                    flags.push("output".to_string());
                }
                if node.is_constant() {
                    flags.push("constant".to_string());
                }
                if node.is_in_data_flow() {
                    flags.push("data_flow".to_string());
                }
                if node.can_be_optimized {
                    flags.push("optimized".to_string());
                }
                if let Some(func) = node.fused_activation {
                    flags.push(format!("fused={:?}", func).to_lowercase());
                }
                if !flags.is_empty() {
                    let _ = write!(out, " {{{}}}", flags.join(", "));
                }
            }
            out.push('\n');
        }
        out
    }
}

impl Index<NodeKey> for Program {
    type Output = ProgramNode;

    /// Panics if `key` does not name a live node.
    fn index(&self, key: NodeKey) -> &ProgramNode {
        &self.graph[ix(key)]
    }
}

impl IndexMut<NodeKey> for Program {
    fn index_mut(&mut self, key: NodeKey) -> &mut ProgramNode {
        &mut self.graph[ix(key)]
    }
}

impl OrderSource for Program {
    fn dependencies_of(&self, key: NodeKey) -> Vec<NodeKey> {
        self.dependencies(key).to_vec()
    }

    fn users_of(&self, key: NodeKey) -> Vec<NodeKey> {
        self.users(key).to_vec()
    }

    fn all_keys(&self) -> Vec<NodeKey> {
        self.keys().collect()
    }

    fn cycle_error(&self, key: NodeKey) -> CoreError {
        CoreError::Cycle {
            id: self[key].id().clone(),
        }
    }
}
