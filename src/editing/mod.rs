// Graph editing
//
// - `editors`: finder/checker/applier roles and the fixpoint `Rewriter`
// - `epstunnels`: rewriters acting on epsilon tunnels
// - `pipeline`: ordered sequence of rewriters

pub mod editors;
pub mod epstunnels;
pub mod pipeline;

pub use editors::{Applier, ApplicationPoint, Checker, Finder, RewriteStats, Rewriter};
pub use epstunnels::{EpsTunnelConstruct, EpsTunnelConstructSimplifier, EpsTunnelRemover, RemovalPolicy};
pub use pipeline::{GraphRewrite, Pipeline, PipelineStats};
