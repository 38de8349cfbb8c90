// Graph substrate for quantization-aware editing
//
// - `ir`: the traced graph and its mutation primitives
// - `eval`: reference evaluation on concrete inputs
// - `tracer`: module tree to graph, with explicit leaf capability sets

pub mod eval;
pub mod ir;
pub mod tracer;

pub use ir::{Function, GraphNode, GraphStatistics, InputSlot, NewNode, NodeId, NodeKind, QuantGraph};
pub use tracer::{symbolic_trace, CustomTracer, LeafTypes, ModuleTree, QuantTracer, Tracer};
