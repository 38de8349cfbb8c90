//! # Hologram QAT - Epsilon-Tunnel Graph Editing
//!
//! Graph rewrites that finish the fake-to-true conversion of
//! quantization-aware trained networks.
//!
//! ## Overview
//!
//! After conversion every quantized region of the traced network is fenced
//! by epsilon tunnels: scale-tracking modules that record the quantization
//! step size entering (`eps_in`) and leaving (`eps_out`) the region. This
//! crate provides the editors that clean those tunnels up:
//!
//! - **Construct reconciliation** - regions whose boundary tunnels agree on
//!   a step size are switched to integer-native arithmetic
//! - **Tunnel removal** - identity tunnels (and, depending on the policy,
//!   other vacuous ones) are spliced out of the graph
//!
//! ## Editing Flow
//!
//! ```text
//! ModuleTree → trace → QuantGraph → ConstructSimplifier → TunnelRemover → QuantGraph
//! ```
//!
//! Every rewriter follows the same find / check / apply cycle and runs to a
//! fixpoint. A batch of application points is validated as a whole before
//! any mutation, and a failed batch leaves the graph unmodified.
//!
//! ## Usage
//!
//! ```no_run
//! use hologram_qat::config::EditingConfig;
//! use hologram_qat::graph::{symbolic_trace, ModuleTree};
//! use hologram_qat::nn::{EpsTunnel, Module};
//! use hologram_qat::Pipeline;
//!
//! let net = ModuleTree::sequential([
//!     ("eps_in", ModuleTree::Leaf(Module::EpsTunnel(EpsTunnel::scalar(0.5, 1.0)?))),
//!     ("relu", ModuleTree::Leaf(Module::ReLU)),
//!     ("eps_out", ModuleTree::Leaf(Module::EpsTunnel(EpsTunnel::scalar(0.5, 0.5)?))),
//! ]);
//! let graph = symbolic_trace(&net)?;
//!
//! let config = EditingConfig::find_and_load()?.unwrap_or_default();
//! let pipeline = Pipeline::from_config(&config.merge_with_overrides(None, None, None, None)?);
//! let (_graph, stats) = pipeline.run(graph)?;
//! println!("{}", stats);
//! # Ok::<(), anyhow::Error>(())
//! ```

// Module declarations
pub mod config;
pub mod editing;
pub mod error;
pub mod graph;
pub mod nn;

// Re-exports for convenient access
pub use editing::{
    ApplicationPoint, EpsTunnelConstructSimplifier, EpsTunnelRemover, GraphRewrite, Pipeline, PipelineStats,
    RemovalPolicy, RewriteStats, Rewriter,
};
pub use error::{EditingError, Result};
pub use graph::{symbolic_trace, NodeId, QuantGraph};
