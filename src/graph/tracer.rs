// Symbolic tracing
//
// Turns a module tree into a `QuantGraph`. Leaf modules become opaque
// call-module nodes; everything else is traced into. Which module kinds are
// leaves is an explicit capability set handed to the tracer, so two tracers
// with different sets can coexist.

use super::ir::{Function, NodeId, QuantGraph};
use crate::error::{EditingError, Result};
use crate::nn::{ActKind, Module, ModuleKind};
use rustc_hash::FxHashSet;
use tracing::debug;

/// A network to be traced
#[derive(Debug, Clone)]
pub enum ModuleTree {
    /// A single module
    Leaf(Module),
    /// Named children applied in order; names form the dotted target path
    Sequential(Vec<(String, ModuleTree)>),
    /// `x + body(x)`
    Residual(Box<ModuleTree>),
}

impl ModuleTree {
    pub fn sequential<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = (S, ModuleTree)>,
        S: Into<String>,
    {
        ModuleTree::Sequential(children.into_iter().map(|(name, child)| (name.into(), child)).collect())
    }

    pub fn residual(body: ModuleTree) -> Self {
        ModuleTree::Residual(Box::new(body))
    }
}

/// Set of module kinds that a tracer keeps opaque
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafTypes(FxHashSet<ModuleKind>);

impl LeafTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ModuleKind) -> Self {
        self.0.insert(kind);
        self
    }

    /// The kinds the QAT library must never trace into
    pub fn quantlib() -> Self {
        Self::new().with(ModuleKind::EpsTunnel).with(ModuleKind::PactActivation)
    }

    pub fn contains(&self, kind: ModuleKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<ModuleKind> for LeafTypes {
    fn from_iter<T: IntoIterator<Item = ModuleKind>>(iter: T) -> Self {
        LeafTypes(iter.into_iter().collect())
    }
}

impl Extend<ModuleKind> for LeafTypes {
    fn extend<T: IntoIterator<Item = ModuleKind>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

/// Symbolic tracer interface
pub trait Tracer {
    /// Whether `module` (at `qualified_name`) becomes an opaque call-node
    fn is_leaf_module(&self, module: &Module, qualified_name: &str) -> bool;

    /// Trace `root` into a graph with a single input `x` and a single output
    fn trace(&self, root: &ModuleTree) -> Result<QuantGraph> {
        let mut graph = QuantGraph::new();
        let x = graph.add_placeholder("x");
        let out = trace_into(self, &mut graph, root, "", x)?;
        graph.set_output(out)?;
        debug!(nodes = graph.node_count(), "traced module tree");
        Ok(graph)
    }
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn trace_into<T: Tracer + ?Sized>(
    tracer: &T,
    graph: &mut QuantGraph,
    tree: &ModuleTree,
    prefix: &str,
    input: NodeId,
) -> Result<NodeId> {
    match tree {
        ModuleTree::Sequential(children) => children.iter().try_fold(input, |current, (name, child)| {
            trace_into(tracer, graph, child, &qualify(prefix, name), current)
        }),
        ModuleTree::Residual(body) => {
            let body_out = trace_into(tracer, graph, body, prefix, input)?;
            graph.call_function(Function::Add).input(input).input(body_out).finish()
        }
        ModuleTree::Leaf(module) => {
            let target = if prefix.is_empty() {
                module.kind().to_string().to_lowercase()
            } else {
                prefix.to_string()
            };

            if tracer.is_leaf_module(module, &target) {
                return graph.call_module(target, module.clone()).input(input).finish();
            }

            match module {
                Module::PactActivation(act) => {
                    let function = match act.act_kind() {
                        ActKind::Identity => return Ok(input),
                        ActKind::Relu => Function::Relu,
                        ActKind::Relu6 => Function::Relu6,
                        ActKind::LeakyRelu => Function::LeakyRelu(act.leaky()),
                    };
                    graph
                        .call_function(function)
                        .name(target.replace('.', "_"))
                        .input(input)
                        .finish()
                }
                other => Err(EditingError::NotTraceable {
                    target,
                    kind: other.kind(),
                }),
            }
        }
    }
}

/// Tracer whose leaves are the standard layers plus a caller-supplied set
#[derive(Debug, Clone)]
pub struct CustomTracer {
    leaf_types: LeafTypes,
}

impl CustomTracer {
    pub fn new(leaf_types: LeafTypes) -> Result<Self> {
        if leaf_types.is_empty() {
            return Err(EditingError::invalid_argument(
                "CustomTracer",
                "leaf_types",
                "{}",
                &["a non-empty set of module kinds"],
            ));
        }
        Ok(Self { leaf_types })
    }

    pub fn leaf_types(&self) -> &LeafTypes {
        &self.leaf_types
    }
}

impl Tracer for CustomTracer {
    fn is_leaf_module(&self, module: &Module, _qualified_name: &str) -> bool {
        let kind = module.kind();
        kind.is_standard() || self.leaf_types.contains(kind)
    }
}

/// Tracer that keeps every quantization module opaque
#[derive(Debug, Clone)]
pub struct QuantTracer {
    inner: CustomTracer,
}

impl QuantTracer {
    /// Extend the quantization leaf set with `other`
    pub fn new(other: impl IntoIterator<Item = ModuleKind>) -> Self {
        let mut leaf_types = LeafTypes::quantlib();
        leaf_types.extend(other);
        Self {
            inner: CustomTracer { leaf_types },
        }
    }

    pub fn leaf_types(&self) -> &LeafTypes {
        self.inner.leaf_types()
    }
}

impl Default for QuantTracer {
    fn default() -> Self {
        Self {
            inner: CustomTracer {
                leaf_types: LeafTypes::quantlib(),
            },
        }
    }
}

impl Tracer for QuantTracer {
    fn is_leaf_module(&self, module: &Module, qualified_name: &str) -> bool {
        self.inner.is_leaf_module(module, qualified_name)
    }
}

/// Trace `root` with the default quantization tracer
pub fn symbolic_trace(root: &ModuleTree) -> Result<QuantGraph> {
    QuantTracer::default().trace(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use crate::nn::{EpsTunnel, PactActivation, PactConfig};

    fn pact(act_kind: &str) -> Module {
        let config = PactConfig {
            act_kind: act_kind.to_string(),
            ..Default::default()
        };
        Module::PactActivation(PactActivation::asymmetric(&config).unwrap())
    }

    fn tunnel() -> Module {
        Module::EpsTunnel(EpsTunnel::scalar(0.5, 1.0).unwrap())
    }

    fn targets(graph: &QuantGraph) -> Vec<String> {
        graph
            .node_ids()
            .into_iter()
            .filter_map(|id| graph.node(id)?.kind.target().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_empty_leaf_set_rejected() {
        let err = CustomTracer::new(LeafTypes::new()).unwrap_err();
        assert!(matches!(
            err,
            EditingError::InvalidConfiguration {
                component: "CustomTracer",
                ..
            }
        ));
    }

    #[test]
    fn test_quant_tracer_keeps_quant_modules_opaque() {
        let tree = ModuleTree::sequential([
            ("eps_in", ModuleTree::Leaf(tunnel())),
            ("act", ModuleTree::Leaf(pact("relu"))),
            ("relu", ModuleTree::Leaf(Module::ReLU)),
        ]);

        let graph = symbolic_trace(&tree).unwrap();
        graph.validate().unwrap();
        assert_eq!(targets(&graph), vec!["eps_in", "act", "relu"]);
        assert_eq!(graph.node_count(), 5);
    }

    #[test]
    fn test_nested_targets_are_dotted() {
        let tree = ModuleTree::sequential([(
            "features",
            ModuleTree::sequential([("0", ModuleTree::Leaf(tunnel())), ("1", ModuleTree::Leaf(Module::ReLU))]),
        )]);

        let graph = symbolic_trace(&tree).unwrap();
        assert_eq!(targets(&graph), vec!["features.0", "features.1"]);
        assert!(graph.node_by_name("features_0").is_some());
    }

    #[test]
    fn test_duplicate_child_names_rejected() {
        let tree = ModuleTree::sequential([
            ("a", ModuleTree::Leaf(tunnel())),
            ("a", ModuleTree::Leaf(Module::EpsTunnel(EpsTunnel::scalar(1.0, 1.0).unwrap()))),
            ("r", ModuleTree::Leaf(Module::ReLU)),
        ]);

        let err = symbolic_trace(&tree).unwrap_err();
        assert!(matches!(err, EditingError::GraphInvariant(ref msg) if msg.contains("`a`")));
    }

    #[test]
    fn test_custom_tracer_traces_into_pact() {
        let tracer = CustomTracer::new(LeafTypes::new().with(ModuleKind::EpsTunnel)).unwrap();
        let tree = ModuleTree::sequential([
            ("eps", ModuleTree::Leaf(tunnel())),
            ("act", ModuleTree::Leaf(pact("leaky_relu"))),
            ("skip", ModuleTree::Leaf(pact("identity"))),
        ]);

        let graph = tracer.trace(&tree).unwrap();
        graph.validate().unwrap();

        let act = graph.node_by_name("act").unwrap();
        assert_eq!(graph.node(act).unwrap().kind, NodeKind::CallFunction(Function::LeakyRelu(0.1)));
        // identity activation leaves no node behind
        assert_eq!(graph.node_count(), 4);
    }

    #[test]
    fn test_tunnel_without_leaf_status_not_traceable() {
        let tracer = CustomTracer::new(LeafTypes::new().with(ModuleKind::PactActivation)).unwrap();
        let tree = ModuleTree::sequential([("eps", ModuleTree::Leaf(tunnel()))]);

        let err = tracer.trace(&tree).unwrap_err();
        assert!(matches!(
            err,
            EditingError::NotTraceable {
                kind: ModuleKind::EpsTunnel,
                ..
            }
        ));
    }

    #[test]
    fn test_residual_adds_skip_connection() {
        let tree = ModuleTree::sequential([("block", ModuleTree::residual(ModuleTree::Leaf(Module::ReLU)))]);

        let graph = symbolic_trace(&tree).unwrap();
        graph.validate().unwrap();
        let add = graph.node_by_name("add").unwrap();
        let x = graph.placeholders()[0];
        let relu = graph.node_by_name("block").unwrap();
        assert_eq!(graph.inputs(add), vec![(0, x), (1, relu)]);
    }

    #[test]
    fn test_quant_tracer_extends_leaf_set() {
        let tracer = QuantTracer::new([ModuleKind::Linear]);
        assert!(tracer.leaf_types().contains(ModuleKind::EpsTunnel));
        assert!(tracer.leaf_types().contains(ModuleKind::PactActivation));
        assert!(tracer.leaf_types().contains(ModuleKind::Linear));
        assert_eq!(QuantTracer::default().leaf_types().len(), 2);
    }
}
