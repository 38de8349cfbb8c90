// Graph editing framework
//
// A rewrite is split in three roles:
// - `Finder`: pure scan of the graph producing candidate cores
// - `Checker`: validates a whole batch before anything is mutated
// - `Applier`: mutates the graph for a single core
//
// `Rewriter` composes the three, tags every application point with its own
// name and drives the find/check/apply cycle to a fixpoint. A batch either
// applies completely or leaves the graph as it was.

use crate::config::{MergedConfig, DEFAULT_MAX_ITERATIONS};
use crate::error::{EditingError, Result};
use crate::graph::QuantGraph;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A place in the graph where a rewrite can be applied
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationPoint<K> {
    rewriter: String,
    core: K,
}

impl<K> ApplicationPoint<K> {
    pub fn new(rewriter: impl Into<String>, core: K) -> Self {
        Self {
            rewriter: rewriter.into(),
            core,
        }
    }

    /// Name of the rewriter that produced this point
    pub fn rewriter(&self) -> &str {
        &self.rewriter
    }

    pub fn core(&self) -> &K {
        &self.core
    }

    pub fn into_core(self) -> K {
        self.core
    }
}

/// Scans a graph for places where a rewrite applies
///
/// Must not mutate anything: calling `find` twice on the same graph returns
/// the same cores in the same order.
pub trait Finder {
    type Core;

    fn find(&self, graph: &QuantGraph) -> Vec<Self::Core>;
}

/// Validates a batch of application points as a whole
pub trait Checker {
    type Core;

    fn check(&self, graph: &QuantGraph, points: &[ApplicationPoint<Self::Core>]) -> Result<()>;
}

/// Rewrites the graph at a single application point
pub trait Applier {
    type Core;

    fn apply(&self, graph: &mut QuantGraph, core: &Self::Core) -> Result<()>;
}

/// Finder, checker and applier bound to a name
pub struct Rewriter<F, C, A> {
    name: String,
    finder: F,
    checker: C,
    applier: A,
    max_iterations: usize,
    validate_after_apply: bool,
    verbose: bool,
}

impl<F, C, A> Rewriter<F, C, A>
where
    F: Finder,
    F::Core: fmt::Debug,
    C: Checker<Core = F::Core>,
    A: Applier<Core = F::Core>,
{
    pub fn from_parts(name: impl Into<String>, finder: F, checker: C, applier: A) -> Self {
        Self {
            name: name.into(),
            finder,
            checker,
            applier,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            validate_after_apply: true,
            verbose: false,
        }
    }

    /// Bound on find/apply rounds before giving up with `FixpointNotReached`
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Run `QuantGraph::validate` after every application
    pub fn with_validation(mut self, validate_after_apply: bool) -> Self {
        self.validate_after_apply = validate_after_apply;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Take iteration limit, validation and verbosity from a merged config
    pub fn configured(self, config: &MergedConfig) -> Self {
        self.with_max_iterations(config.max_iterations)
            .with_validation(config.validate_after_apply)
            .with_verbose(config.verbose)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn finder(&self) -> &F {
        &self.finder
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Application points of the current graph, tagged with this rewriter
    pub fn find(&self, graph: &QuantGraph) -> Vec<ApplicationPoint<F::Core>> {
        self.finder
            .find(graph)
            .into_iter()
            .map(|core| ApplicationPoint::new(self.name.clone(), core))
            .collect()
    }

    /// Reject points produced by another rewriter, then run the checker
    pub fn check(&self, graph: &QuantGraph, points: &[ApplicationPoint<F::Core>]) -> Result<()> {
        if let Some(foreign) = points.iter().find(|ap| ap.rewriter != self.name) {
            return Err(EditingError::ForeignApplicationPoint {
                rewriter: self.name.clone(),
                producer: foreign.rewriter.clone(),
            });
        }
        self.checker.check(graph, points)
    }

    /// Check the batch, then apply every point in order.
    ///
    /// On any error the graph is restored to its state before the call.
    pub fn apply(&self, graph: &mut QuantGraph, points: &[ApplicationPoint<F::Core>]) -> Result<()> {
        self.check(graph, points)?;

        let snapshot = graph.clone();
        if let Err(err) = self.apply_checked(graph, points) {
            warn!(rewriter = %self.name, error = %err, "rolling back batch");
            *graph = snapshot;
            return Err(err);
        }

        Ok(())
    }

    fn apply_checked(&self, graph: &mut QuantGraph, points: &[ApplicationPoint<F::Core>]) -> Result<()> {
        for ap in points {
            if self.verbose {
                info!(rewriter = %self.name, point = ?ap.core, "applying");
            } else {
                debug!(rewriter = %self.name, point = ?ap.core, "applying");
            }

            self.applier.apply(graph, &ap.core)?;

            if self.validate_after_apply {
                graph.validate()?;
            }
        }
        Ok(())
    }

    /// Find, check and apply until no application point remains.
    ///
    /// Either the run reaches its fixpoint or the graph is left untouched.
    pub fn run_in_place(&self, graph: &mut QuantGraph) -> Result<RewriteStats> {
        let start_time = Instant::now();
        let nodes_before = graph.node_count();
        let snapshot = graph.clone();

        match self.fixpoint(graph) {
            Ok((iterations, applied)) => {
                let stats = RewriteStats {
                    rewriter: self.name.clone(),
                    iterations,
                    applied,
                    nodes_before,
                    nodes_after: graph.node_count(),
                    duration: start_time.elapsed(),
                };
                info!(
                    rewriter = %self.name,
                    iterations,
                    applied,
                    "converged: {} → {} nodes",
                    stats.nodes_before,
                    stats.nodes_after
                );
                Ok(stats)
            }
            Err(err) => {
                *graph = snapshot;
                Err(err)
            }
        }
    }

    /// Run to fixpoint, taking ownership of the graph and handing it back
    pub fn run(&self, mut graph: QuantGraph) -> Result<QuantGraph> {
        self.run_in_place(&mut graph)?;
        Ok(graph)
    }

    fn fixpoint(&self, graph: &mut QuantGraph) -> Result<(usize, usize)> {
        let mut iterations = 0;
        let mut applied = 0;

        loop {
            let points = self.find(graph);
            if points.is_empty() {
                return Ok((iterations, applied));
            }
            if iterations == self.max_iterations {
                return Err(EditingError::FixpointNotReached {
                    rewriter: self.name.clone(),
                    iterations,
                });
            }

            iterations += 1;
            debug!(rewriter = %self.name, iteration = iterations, points = points.len(), "found application points");

            self.apply(graph, &points)?;
            applied += points.len();
        }
    }
}

/// Statistics of one rewriter run
#[derive(Debug, Clone)]
pub struct RewriteStats {
    pub rewriter: String,
    /// Find/apply rounds that changed the graph
    pub iterations: usize,
    /// Application points applied over all rounds
    pub applied: usize,
    pub nodes_before: usize,
    pub nodes_after: usize,
    pub duration: Duration,
}

impl RewriteStats {
    pub fn nodes_removed(&self) -> usize {
        self.nodes_before.saturating_sub(self.nodes_after)
    }

    pub fn changed(&self) -> bool {
        self.applied > 0
    }
}

impl fmt::Display for RewriteStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} points in {} iterations, nodes {} → {} ({:?})",
            self.rewriter, self.applied, self.iterations, self.nodes_before, self.nodes_after, self.duration
        )
    }
}
