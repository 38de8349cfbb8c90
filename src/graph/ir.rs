// Quantized graph intermediate representation
//
// Traced computation graph stored in a petgraph `StableGraph` arena. Node ids
// survive removals, so application points found before a mutation keep
// addressing the same nodes afterwards. Edges carry the positional input slot
// of the consumer, which lets a node use the same producer more than once.
//
// Call-module nodes own their module through the graph's submodule table,
// keyed by the qualified target name (e.g. "features.0").

use crate::error::{EditingError, Result};
use crate::nn::{EpsTunnel, Module};
use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::fmt;

/// Node identifier in the graph (petgraph NodeIndex)
pub type NodeId = NodeIndex;

/// Position of an edge among the arguments of its consumer
pub type InputSlot = usize;

/// Functions that can be called directly by a node (no owned module)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Function {
    Add,
    Mul,
    Relu,
    Relu6,
    LeakyRelu(f64),
}

impl Function {
    pub fn name(&self) -> &'static str {
        match self {
            Function::Add => "add",
            Function::Mul => "mul",
            Function::Relu => "relu",
            Function::Relu6 => "relu6",
            Function::LeakyRelu(_) => "leaky_relu",
        }
    }

    /// Number of positional arguments
    pub fn arity(&self) -> usize {
        match self {
            Function::Add | Function::Mul => 2,
            Function::Relu | Function::Relu6 | Function::LeakyRelu(_) => 1,
        }
    }

    /// Whether `f(c * x) == c * f(x)` for every `c > 0`.
    pub fn is_scale_homogeneous(&self) -> bool {
        match self {
            Function::Add | Function::Relu | Function::LeakyRelu(_) => true,
            // mul is homogeneous of degree two, relu6 clips at a fixed bound
            Function::Mul | Function::Relu6 => false,
        }
    }
}

/// Operation kind of a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Graph input
    Placeholder,
    /// Invocation of a submodule owned by the graph
    CallModule { target: String },
    /// Invocation of a free function
    CallFunction(Function),
    /// The single graph output
    Output,
}

impl NodeKind {
    pub fn opcode(&self) -> &'static str {
        match self {
            NodeKind::Placeholder => "placeholder",
            NodeKind::CallModule { .. } => "call_module",
            NodeKind::CallFunction(_) => "call_function",
            NodeKind::Output => "output",
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            NodeKind::CallModule { target } => Some(target),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, NodeKind::Placeholder)
    }

    pub fn is_output(&self) -> bool {
        matches!(self, NodeKind::Output)
    }
}

/// A node in the computation graph
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    /// Unique node name
    pub name: String,
    /// Operation kind
    pub kind: NodeKind,
}

/// Traced computation graph
#[derive(Debug, Clone)]
pub struct QuantGraph {
    /// The underlying petgraph structure
    graph: StableGraph<GraphNode, InputSlot>,

    /// Submodules owned by call-module nodes, keyed by target
    modules: FxHashMap<String, Module>,

    /// Node name to node ID mapping
    name_to_id: FxHashMap<String, NodeId>,

    /// Graph inputs, in declaration order
    placeholders: Vec<NodeId>,

    /// The output node, once set
    output: Option<NodeId>,
}

impl QuantGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self {
            graph: StableGraph::new(),
            modules: FxHashMap::default(),
            name_to_id: FxHashMap::default(),
            placeholders: Vec::new(),
            output: None,
        }
    }

    /// Add a graph input
    pub fn add_placeholder(&mut self, name: impl Into<String>) -> NodeId {
        let name = self.unique_name(&name.into());
        let node_id = self.insert_node(GraphNode {
            name,
            kind: NodeKind::Placeholder,
        });
        self.placeholders.push(node_id);
        node_id
    }

    /// Start building a call-module node that owns `module` under `target`
    pub fn call_module(&mut self, target: impl Into<String>, module: Module) -> NewNode<'_> {
        let target = target.into();
        NewNode::new(self, NodeKind::CallModule { target }, Some(module))
    }

    /// Start building a call-function node
    pub fn call_function(&mut self, function: Function) -> NewNode<'_> {
        NewNode::new(self, NodeKind::CallFunction(function), None)
    }

    /// Add the output node, consuming `value`
    pub fn set_output(&mut self, value: NodeId) -> Result<NodeId> {
        if let Some(existing) = self.output {
            return Err(EditingError::GraphInvariant(format!(
                "graph already has output node `{}`",
                self.name_of(existing)
            )));
        }
        self.ensure_node(value)?;

        let name = self.unique_name("output");
        let node_id = self.insert_node(GraphNode {
            name,
            kind: NodeKind::Output,
        });
        self.graph.add_edge(value, node_id, 0);
        self.output = Some(node_id);
        Ok(node_id)
    }

    fn insert_node(&mut self, node: GraphNode) -> NodeId {
        let name = node.name.clone();
        let node_id = self.graph.add_node(node);
        self.name_to_id.insert(name, node_id);
        node_id
    }

    fn unique_name(&self, base: &str) -> String {
        if !self.name_to_id.contains_key(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{}_{}", base, i))
            .find(|candidate| !self.name_to_id.contains_key(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    fn ensure_node(&self, node_id: NodeId) -> Result<()> {
        if self.graph.contains_node(node_id) {
            Ok(())
        } else {
            Err(EditingError::MissingNode(format!("#{}", node_id.index())))
        }
    }

    /// Get node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&GraphNode> {
        self.graph.node_weight(node_id)
    }

    /// Get node ID by name
    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.name_to_id.get(name).copied()
    }

    /// Node name, or a placeholder label for erased ids
    pub fn name_of(&self, node_id: NodeId) -> String {
        self.node(node_id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| format!("<erased #{}>", node_id.index()))
    }

    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.graph.contains_node(node_id)
    }

    /// All live nodes, in insertion order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.graph.node_indices().collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Graph inputs, in declaration order
    pub fn placeholders(&self) -> &[NodeId] {
        &self.placeholders
    }

    pub fn output_node(&self) -> Option<NodeId> {
        self.output
    }

    /// Positional inputs of a node as `(slot, producer)`, sorted by slot
    pub fn inputs(&self, node_id: NodeId) -> Vec<(InputSlot, NodeId)> {
        let mut inputs: Vec<(InputSlot, NodeId)> = self
            .graph
            .edges_directed(node_id, Direction::Incoming)
            .map(|edge| (*edge.weight(), edge.source()))
            .collect();
        inputs.sort_unstable_by_key(|&(slot, _)| slot);
        inputs
    }

    /// Distinct producers feeding a node, in slot order
    pub fn all_input_nodes(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut seen = FxHashSet::default();
        self.inputs(node_id)
            .into_iter()
            .map(|(_, source)| source)
            .filter(|source| seen.insert(*source))
            .collect()
    }

    /// Distinct consumers of a node, in id order
    pub fn users(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut users: Vec<NodeId> = self
            .graph
            .edges_directed(node_id, Direction::Outgoing)
            .map(|edge| edge.target())
            .collect();
        users.sort_unstable();
        users.dedup();
        users
    }

    /// Resolve a submodule by target name
    pub fn get_submodule(&self, target: &str) -> Result<&Module> {
        self.modules
            .get(target)
            .ok_or_else(|| EditingError::MissingSubmodule(target.to_string()))
    }

    pub fn get_submodule_mut(&mut self, target: &str) -> Result<&mut Module> {
        self.modules
            .get_mut(target)
            .ok_or_else(|| EditingError::MissingSubmodule(target.to_string()))
    }

    /// Module owned by a call-module node
    pub fn module_of(&self, node_id: NodeId) -> Option<&Module> {
        let target = self.node(node_id)?.kind.target()?;
        self.modules.get(target)
    }

    pub fn module_of_mut(&mut self, node_id: NodeId) -> Option<&mut Module> {
        let target = self.graph.node_weight(node_id)?.kind.target()?;
        self.modules.get_mut(target)
    }

    /// Epsilon tunnel owned by a call-module node
    pub fn eps_tunnel(&self, node_id: NodeId) -> Option<&EpsTunnel> {
        self.module_of(node_id).and_then(Module::as_eps_tunnel)
    }

    pub fn eps_tunnel_mut(&mut self, node_id: NodeId) -> Option<&mut EpsTunnel> {
        self.module_of_mut(node_id).and_then(Module::as_eps_tunnel_mut)
    }

    pub fn is_eps_tunnel(&self, node_id: NodeId) -> bool {
        self.eps_tunnel(node_id).is_some()
    }

    /// Call-module nodes whose module is an epsilon tunnel, in insertion order
    pub fn eps_tunnel_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&node_id| self.is_eps_tunnel(node_id))
            .collect()
    }

    /// Rewire every edge `old -> node` to `new -> node`, keeping input slots.
    ///
    /// Returns the number of rewired edges.
    pub fn replace_input_with(&mut self, node_id: NodeId, old: NodeId, new: NodeId) -> Result<usize> {
        self.ensure_node(node_id)?;
        self.ensure_node(new)?;
        if new == node_id {
            return Err(EditingError::GraphInvariant(format!(
                "cannot make `{}` consume itself",
                self.name_of(node_id)
            )));
        }

        let edges: Vec<_> = self
            .graph
            .edges_directed(node_id, Direction::Incoming)
            .filter(|edge| edge.source() == old)
            .map(|edge| (edge.id(), *edge.weight()))
            .collect();

        for (edge_id, slot) in &edges {
            self.graph.remove_edge(*edge_id);
            self.graph.add_edge(new, node_id, *slot);
        }

        Ok(edges.len())
    }

    /// Drop a submodule from the table. Returns whether it existed.
    pub fn delete_submodule(&mut self, target: &str) -> bool {
        self.modules.remove(target).is_some()
    }

    /// Remove a node that no longer has users
    pub fn erase_node(&mut self, node_id: NodeId) -> Result<()> {
        self.ensure_node(node_id)?;

        let users = self.users(node_id);
        if !users.is_empty() {
            let names: Vec<String> = users.iter().map(|&u| self.name_of(u)).collect();
            return Err(EditingError::GraphInvariant(format!(
                "cannot erase `{}`: still used by {}",
                self.name_of(node_id),
                names.join(", ")
            )));
        }

        if let Some(node) = self.graph.remove_node(node_id) {
            self.name_to_id.remove(&node.name);
        }
        self.placeholders.retain(|&p| p != node_id);
        if self.output == Some(node_id) {
            self.output = None;
        }

        Ok(())
    }

    /// Compute topological sort
    pub fn topological_sort(&self) -> Result<Vec<NodeId>> {
        toposort(&self.graph, None).map_err(|cycle| {
            EditingError::GraphInvariant(format!("graph contains a cycle through `{}`", self.name_of(cycle.node_id())))
        })
    }

    /// Check that the graph is a valid single-output, acyclic dataflow graph
    /// with no dangling edges.
    pub fn validate(&self) -> Result<()> {
        let outputs: Vec<NodeId> = self
            .graph
            .node_indices()
            .filter(|&id| self.graph[id].kind.is_output())
            .collect();
        if outputs.len() != 1 || self.output != outputs.first().copied() {
            return Err(EditingError::GraphInvariant(format!(
                "expected exactly one registered output node, found {}",
                outputs.len()
            )));
        }

        self.topological_sort()?;

        for node_id in self.graph.node_indices() {
            let node = &self.graph[node_id];
            let inputs = self.inputs(node_id);
            let has_users = !self.users(node_id).is_empty();

            // slots must be exactly 0..n: a hole is a dangling input
            if inputs.iter().enumerate().any(|(i, &(slot, _))| slot != i) {
                return Err(EditingError::GraphInvariant(format!(
                    "`{}` has non-contiguous input slots",
                    node.name
                )));
            }

            let expected_inputs = match &node.kind {
                NodeKind::Placeholder => 0,
                NodeKind::CallModule { target } => {
                    if !self.modules.contains_key(target) {
                        return Err(EditingError::GraphInvariant(format!(
                            "`{}` calls missing submodule `{}`",
                            node.name, target
                        )));
                    }
                    1
                }
                NodeKind::CallFunction(function) => function.arity(),
                NodeKind::Output => 1,
            };
            if inputs.len() != expected_inputs {
                return Err(EditingError::GraphInvariant(format!(
                    "`{}` ({}) has {} inputs, expected {}",
                    node.name,
                    node.kind.opcode(),
                    inputs.len(),
                    expected_inputs
                )));
            }

            match &node.kind {
                NodeKind::Output if has_users => {
                    return Err(EditingError::GraphInvariant("output node has users".to_string()));
                }
                NodeKind::CallModule { .. } | NodeKind::CallFunction(_) if !has_users => {
                    return Err(EditingError::GraphInvariant(format!(
                        "`{}` does not reach the output",
                        node.name
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Export to Graphviz DOT format
    pub fn visualize_dot(&self) -> String {
        Dot(self).to_string()
    }

    /// Get graph statistics
    pub fn statistics(&self) -> GraphStatistics {
        let mut op_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut eps_tunnels = 0;
        let mut identity_tunnels = 0;

        for node_id in self.graph.node_indices() {
            let label = match &self.graph[node_id].kind {
                NodeKind::CallModule { .. } => match self.module_of(node_id) {
                    Some(module) => module.kind().to_string(),
                    None => "<missing>".to_string(),
                },
                NodeKind::CallFunction(function) => function.name().to_string(),
                other => other.opcode().to_string(),
            };
            *op_counts.entry(label).or_insert(0) += 1;

            if let Some(tunnel) = self.eps_tunnel(node_id) {
                eps_tunnels += 1;
                if tunnel.is_identity() {
                    identity_tunnels += 1;
                }
            }
        }

        GraphStatistics {
            total_nodes: self.graph.node_count(),
            total_edges: self.graph.edge_count(),
            num_inputs: self.placeholders.len(),
            num_submodules: self.modules.len(),
            eps_tunnels,
            identity_tunnels,
            op_counts,
        }
    }

    /// Access the underlying petgraph
    pub fn petgraph(&self) -> &StableGraph<GraphNode, InputSlot> {
        &self.graph
    }
}

impl Default for QuantGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for adding call nodes to the graph
pub struct NewNode<'a> {
    graph: &'a mut QuantGraph,
    name: Option<String>,
    kind: NodeKind,
    module: Option<Module>,
    inputs: Vec<NodeId>,
}

impl<'a> NewNode<'a> {
    fn new(graph: &'a mut QuantGraph, kind: NodeKind, module: Option<Module>) -> Self {
        Self {
            graph,
            name: None,
            kind,
            module,
            inputs: Vec::new(),
        }
    }

    /// Set node name (made unique on collision)
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append a positional input
    pub fn input(mut self, source_id: NodeId) -> Self {
        self.inputs.push(source_id);
        self
    }

    /// Finish building and add to graph
    pub fn finish(self) -> Result<NodeId> {
        for &source_id in &self.inputs {
            self.graph.ensure_node(source_id)?;
        }
        if let NodeKind::CallModule { target } = &self.kind {
            if self.graph.modules.contains_key(target) {
                return Err(EditingError::GraphInvariant(format!(
                    "submodule `{}` is already registered",
                    target
                )));
            }
        }

        let base = match (&self.name, &self.kind) {
            (Some(name), _) => name.clone(),
            (None, NodeKind::CallModule { target }) => target.replace('.', "_"),
            (None, NodeKind::CallFunction(function)) => function.name().to_string(),
            (None, other) => other.opcode().to_string(),
        };
        let name = self.graph.unique_name(&base);

        if let (NodeKind::CallModule { target }, Some(module)) = (&self.kind, self.module) {
            self.graph.modules.insert(target.clone(), module);
        }

        let node_id = self.graph.insert_node(GraphNode { name, kind: self.kind });
        for (slot, source_id) in self.inputs.into_iter().enumerate() {
            self.graph.graph.add_edge(source_id, node_id, slot);
        }

        Ok(node_id)
    }
}

struct Dot<'a>(&'a QuantGraph);

impl fmt::Display for Dot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.0;
        writeln!(f, "digraph QuantGraph {{")?;
        writeln!(f, "  rankdir=TB;")?;
        writeln!(f, "  node [shape=box, style=rounded];")?;

        for node_id in graph.graph.node_indices() {
            let node = &graph.graph[node_id];
            let (detail, color) = match &node.kind {
                NodeKind::Placeholder => ("placeholder".to_string(), "lightgray"),
                NodeKind::Output => ("output".to_string(), "lightgray"),
                NodeKind::CallFunction(function) => (function.name().to_string(), "lightblue"),
                NodeKind::CallModule { target } => match graph.modules.get(target) {
                    Some(module @ Module::EpsTunnel(_)) => (module.summary(), "lightyellow"),
                    Some(module) => (module.summary(), "lightgreen"),
                    None => (format!("{} <missing>", target), "red"),
                },
            };

            writeln!(
                f,
                "  node{} [label=\"{}\\n{}\", fillcolor={}, style=filled];",
                node_id.index(),
                node.name,
                detail,
                color
            )?;
        }

        let mut edges: Vec<_> = graph.graph.edge_references().collect();
        edges.sort_by_key(|edge| (edge.target().index(), *edge.weight()));
        for edge in edges {
            writeln!(
                f,
                "  node{} -> node{} [label=\"arg{}\"];",
                edge.source().index(),
                edge.target().index(),
                edge.weight()
            )?;
        }

        writeln!(f, "}}")
    }
}

/// Graph statistics
#[derive(Debug, Clone, PartialEq)]
pub struct GraphStatistics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub num_inputs: usize,
    pub num_submodules: usize,
    pub eps_tunnels: usize,
    pub identity_tunnels: usize,
    pub op_counts: BTreeMap<String, usize>,
}

impl fmt::Display for GraphStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph Statistics:")?;
        writeln!(f, "  Total nodes: {}", self.total_nodes)?;
        writeln!(f, "  Total edges: {}", self.total_edges)?;
        writeln!(f, "  Graph inputs: {}", self.num_inputs)?;
        writeln!(f, "  Submodules: {}", self.num_submodules)?;
        writeln!(f, "  Epsilon tunnels: {} ({} identity)", self.eps_tunnels, self.identity_tunnels)?;
        writeln!(f, "  Operation types:")?;

        let mut sorted_ops: Vec<_> = self.op_counts.iter().collect();
        sorted_ops.sort_by(|a, b| b.1.cmp(a.1));

        for (op, count) in sorted_ops {
            writeln!(f, "    {}: {}", op, count)?;
        }

        Ok(())
    }
}
