// Epsilon-tunnel construct reconciliation
//
// A construct is a connected region of scale-homogeneous nodes enclosed by
// tunnels: `backward` tunnels feed it, `forward` tunnels carry its results
// out. When every boundary tunnel agrees on the step size `e` inside the
// region, the region can run on raw integers: the backward tunnels stop
// rescaling to `e` (eps_out := 1) and the forward tunnels stop expecting it
// (eps_in := 1). Outputs of the forward tunnels are unchanged.

use crate::editing::editors::{Applier, ApplicationPoint, Checker, Finder, Rewriter};
use crate::error::{EditingError, Result};
use crate::graph::{NodeId, NodeKind, QuantGraph};
use crate::nn::epstunnel::eps_all_equal;
use crate::nn::Module;
use ndarray::Array1;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use tracing::debug;

/// Boundary tunnels and interior nodes of an integer-native region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpsTunnelConstruct {
    /// Tunnels entering the region
    pub backward: Vec<NodeId>,
    /// Non-tunnel nodes inside the region
    pub core: Vec<NodeId>,
    /// Tunnels leaving the region
    pub forward: Vec<NodeId>,
}

impl EpsTunnelConstruct {
    /// Every node of the construct, each once
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut seen = FxHashSet::default();
        self.backward
            .iter()
            .chain(&self.core)
            .chain(&self.forward)
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn tunnels(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.backward.iter().chain(&self.forward).copied()
    }
}

/// Finds constructs whose boundary tunnels still carry a non-unit scale
#[derive(Debug, Clone, Copy, Default)]
pub struct EpsTunnelConstructFinder;

/// Connected non-tunnel region around `start`, stopping at tunnels
fn grow_region(graph: &QuantGraph, start: NodeId) -> Vec<NodeId> {
    let mut region = vec![start];
    let mut seen: FxHashSet<NodeId> = [start].into_iter().collect();
    let mut queue: VecDeque<NodeId> = VecDeque::from([start]);

    while let Some(node_id) = queue.pop_front() {
        let neighbours = graph.all_input_nodes(node_id).into_iter().chain(graph.users(node_id));
        for next in neighbours {
            if !graph.is_eps_tunnel(next) && seen.insert(next) {
                region.push(next);
                queue.push_back(next);
            }
        }
    }

    region.sort_unstable();
    region
}

fn is_homogeneous(graph: &QuantGraph, node_id: NodeId) -> bool {
    match graph.node(node_id).map(|n| &n.kind) {
        Some(NodeKind::CallFunction(function)) => function.is_scale_homogeneous(),
        Some(NodeKind::CallModule { .. }) => graph.module_of(node_id).map_or(false, Module::is_scale_homogeneous),
        _ => false,
    }
}

impl EpsTunnelConstructFinder {
    /// Build the construct around `region`, if it is one that still needs reconciling
    fn construct_from(&self, graph: &QuantGraph, region: Vec<NodeId>) -> Option<EpsTunnelConstruct> {
        if !region.iter().all(|&id| is_homogeneous(graph, id)) {
            return None;
        }
        let members: FxHashSet<NodeId> = region.iter().copied().collect();

        let mut backward: Vec<NodeId> = region
            .iter()
            .flat_map(|&id| graph.all_input_nodes(id))
            .filter(|&id| graph.is_eps_tunnel(id))
            .collect();
        backward.sort_unstable();
        backward.dedup();

        let mut forward: Vec<NodeId> = region
            .iter()
            .flat_map(|&id| graph.users(id))
            .filter(|&id| graph.is_eps_tunnel(id))
            .collect();
        forward.sort_unstable();
        forward.dedup();

        if backward.is_empty() || forward.is_empty() {
            return None;
        }

        // a backward tunnel also read outside the region keeps its scale
        if !backward
            .iter()
            .all(|&t| graph.users(t).iter().all(|user| members.contains(user)))
        {
            return None;
        }

        let mut scales = backward
            .iter()
            .filter_map(|&t| graph.eps_tunnel(t).map(|tunnel| tunnel.eps_out()))
            .chain(forward.iter().filter_map(|&t| graph.eps_tunnel(t).map(|tunnel| tunnel.eps_in())));
        let common: &Array1<f64> = scales.next()?;
        if !scales.all(|eps| eps_all_equal(common, eps)) {
            return None;
        }
        if common.iter().all(|&eps| eps == 1.0) {
            return None;
        }

        // per-channel scales only commute with elementwise nodes
        let uniform = common.iter().all(|&eps| eps == common[0]);
        if !uniform
            && region
                .iter()
                .any(|&id| matches!(graph.module_of(id), Some(Module::Linear(_))))
        {
            return None;
        }

        Some(EpsTunnelConstruct {
            backward,
            core: region,
            forward,
        })
    }
}

impl Finder for EpsTunnelConstructFinder {
    type Core = EpsTunnelConstruct;

    fn find(&self, graph: &QuantGraph) -> Vec<EpsTunnelConstruct> {
        let mut explored: FxHashSet<NodeId> = FxHashSet::default();
        let mut claimed: FxHashSet<NodeId> = FxHashSet::default();
        let mut constructs = Vec::new();

        for tunnel in graph.eps_tunnel_nodes() {
            for start in graph.users(tunnel) {
                if graph.is_eps_tunnel(start) || explored.contains(&start) {
                    continue;
                }

                let region = grow_region(graph, start);
                explored.extend(region.iter().copied());

                let Some(construct) = self.construct_from(graph, region) else {
                    continue;
                };
                // sharing a tunnel with an earlier construct: next round
                if construct.tunnels().any(|t| claimed.contains(&t)) {
                    continue;
                }
                claimed.extend(construct.tunnels());
                constructs.push(construct);
            }
        }

        constructs
    }
}

/// Rejects batches whose constructs share a node
#[derive(Debug, Clone, Copy, Default)]
pub struct EpsTunnelConstructChecker;

impl Checker for EpsTunnelConstructChecker {
    type Core = EpsTunnelConstruct;

    fn check(&self, graph: &QuantGraph, points: &[ApplicationPoint<EpsTunnelConstruct>]) -> Result<()> {
        let mut counts: FxHashMap<NodeId, usize> = FxHashMap::default();
        for ap in points {
            for node_id in ap.core().nodes() {
                *counts.entry(node_id).or_insert(0) += 1;
            }
        }

        for ap in points {
            if let Some(node_id) = ap.core().nodes().into_iter().find(|id| counts[id] > 1) {
                return Err(EditingError::Overlap {
                    rewriter: ap.rewriter().to_string(),
                    node: graph.name_of(node_id),
                    count: counts[&node_id],
                });
            }
        }

        Ok(())
    }
}

/// Moves the region's step size out of its boundary tunnels
#[derive(Debug, Clone, Copy, Default)]
pub struct EpsTunnelConstructApplier;

impl EpsTunnelConstructApplier {
    fn log_neighbourhood(graph: &QuantGraph, role: &str, node_id: NodeId) {
        let names = |ids: Vec<NodeId>| ids.into_iter().map(|id| graph.name_of(id)).collect::<Vec<_>>();
        debug!(
            role,
            tunnel = %graph.name_of(node_id),
            preds = ?names(graph.all_input_nodes(node_id)),
            users = ?names(graph.users(node_id)),
            "reconciling construct boundary"
        );
    }
}

impl Applier for EpsTunnelConstructApplier {
    type Core = EpsTunnelConstruct;

    fn apply(&self, graph: &mut QuantGraph, core: &EpsTunnelConstruct) -> Result<()> {
        for &node_id in &core.backward {
            Self::log_neighbourhood(graph, "backward", node_id);
            let name = graph.name_of(node_id);
            graph
                .eps_tunnel_mut(node_id)
                .ok_or_else(|| EditingError::structural(name, "backward node is not an epsilon tunnel"))?
                .set_eps_out_ones();
        }

        for &node_id in &core.forward {
            Self::log_neighbourhood(graph, "forward", node_id);
            let name = graph.name_of(node_id);
            graph
                .eps_tunnel_mut(node_id)
                .ok_or_else(|| EditingError::structural(name, "forward node is not an epsilon tunnel"))?
                .set_eps_in_ones();
        }

        Ok(())
    }
}

/// Rewriter reconciling the boundary tunnels of integer-native regions
pub type EpsTunnelConstructSimplifier =
    Rewriter<EpsTunnelConstructFinder, EpsTunnelConstructChecker, EpsTunnelConstructApplier>;

impl EpsTunnelConstructSimplifier {
    pub fn new() -> Self {
        Rewriter::from_parts(
            "EpsTunnelConstructSimplifier",
            EpsTunnelConstructFinder,
            EpsTunnelConstructChecker,
            EpsTunnelConstructApplier,
        )
    }
}

impl Default for EpsTunnelConstructSimplifier {
    fn default() -> Self {
        Self::new()
    }
}
