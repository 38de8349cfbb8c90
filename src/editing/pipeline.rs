// Editing pipeline
//
// Runs a sequence of rewriters over a graph. Each rewriter runs to its own
// fixpoint before the next one starts, and owns the graph exclusively while
// it runs.

use super::editors::{Applier, Checker, Finder, RewriteStats, Rewriter};
use super::epstunnels::{EpsTunnelConstructSimplifier, EpsTunnelRemover};
use crate::config::MergedConfig;
use crate::graph::QuantGraph;
use anyhow::{Context, Result};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::info;

/// A rewrite that can be scheduled in a [`Pipeline`]
pub trait GraphRewrite {
    /// Name of the rewrite (for logging)
    fn name(&self) -> &str;

    /// Rewrite the graph to fixpoint
    fn rewrite(&self, graph: &mut QuantGraph) -> crate::error::Result<RewriteStats>;
}

impl<F, C, A> GraphRewrite for Rewriter<F, C, A>
where
    F: Finder,
    F::Core: fmt::Debug,
    C: Checker<Core = F::Core>,
    A: Applier<Core = F::Core>,
{
    fn name(&self) -> &str {
        Rewriter::name(self)
    }

    fn rewrite(&self, graph: &mut QuantGraph) -> crate::error::Result<RewriteStats> {
        self.run_in_place(graph)
    }
}

/// Ordered sequence of rewriters
pub struct Pipeline {
    rewriters: Vec<Box<dyn GraphRewrite>>,
}

impl Pipeline {
    pub fn new(rewriters: Vec<Box<dyn GraphRewrite>>) -> Self {
        Self { rewriters }
    }

    /// Construct reconciliation followed by tunnel removal
    pub fn from_config(config: &MergedConfig) -> Self {
        Self::new(vec![
            Box::new(EpsTunnelConstructSimplifier::new().configured(config)),
            Box::new(EpsTunnelRemover::new(config.removal_policy).configured(config)),
        ])
    }

    pub fn len(&self) -> usize {
        self.rewriters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewriters.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.rewriters.iter().map(|r| r.name()).collect()
    }

    /// Run every rewriter in order and hand the graph back
    pub fn run(&self, mut graph: QuantGraph) -> Result<(QuantGraph, PipelineStats)> {
        let start_time = Instant::now();
        let nodes_before = graph.node_count();

        info!("Starting QAT editing pipeline ({} rewriters)...", self.rewriters.len());

        let mut rewrites = Vec::with_capacity(self.rewriters.len());
        for rewriter in &self.rewriters {
            let stats = rewriter
                .rewrite(&mut graph)
                .with_context(|| format!("rewriter `{}` failed", rewriter.name()))?;
            rewrites.push(stats);
        }

        let stats = PipelineStats {
            nodes_before,
            nodes_after: graph.node_count(),
            duration: start_time.elapsed(),
            rewrites,
        };
        info!(
            "Pipeline complete: {} → {} nodes in {:?}",
            stats.nodes_before, stats.nodes_after, stats.duration
        );

        Ok((graph, stats))
    }
}

/// Statistics of a whole pipeline run
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub nodes_before: usize,
    pub nodes_after: usize,
    pub duration: Duration,
    pub rewrites: Vec<RewriteStats>,
}

impl PipelineStats {
    pub fn nodes_removed(&self) -> usize {
        self.nodes_before.saturating_sub(self.nodes_after)
    }

    pub fn total_applied(&self) -> usize {
        self.rewrites.iter().map(|r| r.applied).sum()
    }
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline Statistics:")?;
        writeln!(
            f,
            "  Nodes: {} → {} (removed {})",
            self.nodes_before,
            self.nodes_after,
            self.nodes_removed()
        )?;
        writeln!(f, "  Total time: {:?}", self.duration)?;

        if !self.rewrites.is_empty() {
            writeln!(f, "  Rewriters:")?;
            for stat in &self.rewrites {
                writeln!(f, "    {}", stat)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editing::epstunnels::RemovalPolicy;

    #[test]
    fn test_pipeline_from_config() {
        let pipeline = Pipeline::from_config(&MergedConfig::default());
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.names(), vec!["EpsTunnelConstructSimplifier", "EpsTunnelRemover"]);
    }

    #[test]
    fn test_empty_pipeline_keeps_graph() {
        let mut graph = QuantGraph::new();
        let x = graph.add_placeholder("x");
        graph.set_output(x).unwrap();

        let (graph, stats) = Pipeline::new(Vec::new()).run(graph).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(stats.total_applied(), 0);
        assert!(stats.to_string().contains("Nodes: 2 → 2 (removed 0)"));
    }

    #[test]
    fn test_remover_is_a_graph_rewrite() {
        let rewrite: Box<dyn GraphRewrite> = Box::new(EpsTunnelRemover::new(RemovalPolicy::Force));
        assert_eq!(rewrite.name(), "EpsTunnelRemover");
    }
}
