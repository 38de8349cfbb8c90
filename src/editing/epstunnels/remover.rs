// Epsilon-tunnel removal
//
// Splices redundant tunnels out of the graph. Which tunnels count as
// redundant depends on the removal policy; a tunnel whose only consumer is
// the graph output is never removed, so the output scale stays explicit.

use crate::editing::editors::{Applier, ApplicationPoint, Checker, Finder, Rewriter};
use crate::error::{EditingError, Result};
use crate::graph::{NodeId, QuantGraph};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Which tunnels the remover may splice out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RemovalPolicy {
    /// Only tunnels with `eps_in == eps_out`
    Identity,
    /// Identity tunnels and tunnels re-expressing a graph input in unit steps
    #[default]
    Vacuous,
    /// Every tunnel, once all scales have been propagated
    Force,
}

const POLICY_NAMES: &[&str] = &["identity", "vacuous", "force"];

impl RemovalPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalPolicy::Identity => "identity",
            RemovalPolicy::Vacuous => "vacuous",
            RemovalPolicy::Force => "force",
        }
    }
}

impl FromStr for RemovalPolicy {
    type Err = EditingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "identity" => Ok(RemovalPolicy::Identity),
            "vacuous" => Ok(RemovalPolicy::Vacuous),
            "force" => Ok(RemovalPolicy::Force),
            other => Err(EditingError::invalid_argument(
                "EpsTunnelRemover",
                "removal_policy",
                other,
                POLICY_NAMES,
            )),
        }
    }
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects removable tunnels according to a [`RemovalPolicy`]
#[derive(Debug, Clone, Default)]
pub struct EpsTunnelRemoverFinder {
    policy: RemovalPolicy,
}

impl EpsTunnelRemoverFinder {
    pub fn new(policy: RemovalPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RemovalPolicy {
        self.policy
    }
}

fn is_identity_tunnel(graph: &QuantGraph, node_id: NodeId) -> bool {
    graph.eps_tunnel(node_id).map_or(false, |t| t.is_identity())
}

/// Tunnel right behind a graph input that already emits unit steps
fn is_integerised_placeholder(graph: &QuantGraph, node_id: NodeId) -> bool {
    let Some(tunnel) = graph.eps_tunnel(node_id) else {
        return false;
    };
    match graph.all_input_nodes(node_id).as_slice() {
        [pred] => graph.node(*pred).map_or(false, |n| n.kind.is_placeholder()) && tunnel.has_unit_eps_out(),
        _ => false,
    }
}

fn feeds_output_only(graph: &QuantGraph, node_id: NodeId) -> bool {
    match (graph.users(node_id).as_slice(), graph.output_node()) {
        ([user], Some(output)) => *user == output,
        _ => false,
    }
}

impl Finder for EpsTunnelRemoverFinder {
    type Core = NodeId;

    fn find(&self, graph: &QuantGraph) -> Vec<NodeId> {
        // filtered more than once below, so keep it as a Vec
        let tunnels = graph.eps_tunnel_nodes();

        let candidates: Vec<NodeId> = match self.policy {
            RemovalPolicy::Force => tunnels,
            RemovalPolicy::Identity => tunnels
                .iter()
                .copied()
                .filter(|&id| is_identity_tunnel(graph, id))
                .collect(),
            RemovalPolicy::Vacuous => {
                let identity = tunnels.iter().copied().filter(|&id| is_identity_tunnel(graph, id));
                let integerised = tunnels.iter().copied().filter(|&id| is_integerised_placeholder(graph, id));
                let mut seen = FxHashSet::default();
                identity.chain(integerised).filter(|id| seen.insert(*id)).collect()
            }
        };

        candidates
            .into_iter()
            .filter(|&id| !feeds_output_only(graph, id))
            .collect()
    }
}

/// Rejects batches that target a node more than once
#[derive(Debug, Clone, Copy, Default)]
pub struct EpsTunnelRemoverChecker;

impl Checker for EpsTunnelRemoverChecker {
    type Core = NodeId;

    fn check(&self, graph: &QuantGraph, points: &[ApplicationPoint<NodeId>]) -> Result<()> {
        let mut counts: FxHashMap<NodeId, usize> = FxHashMap::default();
        for ap in points {
            *counts.entry(*ap.core()).or_insert(0) += 1;
        }

        if counts.len() == points.len() {
            return Ok(());
        }

        // report the first repeated node in batch order
        match points.iter().find(|ap| counts[ap.core()] > 1) {
            Some(ap) => Err(EditingError::Overlap {
                rewriter: ap.rewriter().to_string(),
                node: graph.name_of(*ap.core()),
                count: counts[ap.core()],
            }),
            None => Ok(()),
        }
    }
}

/// Splices one tunnel out: its consumer reads the tunnel's input directly
#[derive(Debug, Clone, Copy, Default)]
pub struct EpsTunnelRemoverApplier;

impl Applier for EpsTunnelRemoverApplier {
    type Core = NodeId;

    fn apply(&self, graph: &mut QuantGraph, core: &NodeId) -> Result<()> {
        let node_id = *core;
        let name = graph.name_of(node_id);

        let target = match graph.node(node_id).and_then(|n| n.kind.target()) {
            Some(target) if graph.is_eps_tunnel(node_id) => target.to_string(),
            _ => return Err(EditingError::structural(name, "not an epsilon tunnel call")),
        };

        let pred = match graph.all_input_nodes(node_id).as_slice() {
            [pred] => *pred,
            preds => {
                return Err(EditingError::structural(
                    name,
                    format!("expected exactly one predecessor, found {}", preds.len()),
                ))
            }
        };
        let user = match graph.users(node_id).as_slice() {
            [user] => *user,
            users => {
                return Err(EditingError::structural(
                    name,
                    format!("expected exactly one user, found {}", users.len()),
                ))
            }
        };

        graph.replace_input_with(user, node_id, pred)?;
        graph.delete_submodule(&target);
        graph.erase_node(node_id)?;

        debug!(
            tunnel = %name,
            pred = %graph.name_of(pred),
            user = %graph.name_of(user),
            "removed epsilon tunnel"
        );
        Ok(())
    }
}

/// Rewriter removing redundant epsilon tunnels
pub type EpsTunnelRemover = Rewriter<EpsTunnelRemoverFinder, EpsTunnelRemoverChecker, EpsTunnelRemoverApplier>;

impl EpsTunnelRemover {
    pub fn new(policy: RemovalPolicy) -> Self {
        Rewriter::from_parts(
            "EpsTunnelRemover",
            EpsTunnelRemoverFinder::new(policy),
            EpsTunnelRemoverChecker,
            EpsTunnelRemoverApplier,
        )
    }

    pub fn policy(&self) -> RemovalPolicy {
        self.finder().policy()
    }
}

impl Default for EpsTunnelRemover {
    fn default() -> Self {
        Self::new(RemovalPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Function;
    use crate::nn::{EpsTunnel, Module};

    fn tunnel(eps_in: f64, eps_out: f64) -> Module {
        Module::EpsTunnel(EpsTunnel::scalar(eps_in, eps_out).unwrap())
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("IDENTITY".parse::<RemovalPolicy>().unwrap(), RemovalPolicy::Identity);
        assert_eq!("Force".parse::<RemovalPolicy>().unwrap(), RemovalPolicy::Force);
        assert_eq!(RemovalPolicy::default(), RemovalPolicy::Vacuous);

        let err = "sometimes".parse::<RemovalPolicy>().unwrap_err();
        assert!(err.to_string().contains("expected identity, vacuous or force"));

        // every accepted name is listed in the error message
        assert!("identity_only".parse::<RemovalPolicy>().is_err());
        for name in POLICY_NAMES {
            assert_eq!(name.parse::<RemovalPolicy>().unwrap().as_str(), *name);
        }
    }

    #[test]
    fn test_integerised_placeholder_selected_only_when_vacuous() {
        // x -> t(0.5 -> 1) -> relu -> output
        let mut graph = QuantGraph::new();
        let x = graph.add_placeholder("x");
        let t = graph.call_module("t", tunnel(0.5, 1.0)).input(x).finish().unwrap();
        let relu = graph.call_function(Function::Relu).input(t).finish().unwrap();
        graph.set_output(relu).unwrap();

        assert_eq!(EpsTunnelRemoverFinder::new(RemovalPolicy::Vacuous).find(&graph), vec![t]);
        assert!(EpsTunnelRemoverFinder::new(RemovalPolicy::Identity).find(&graph).is_empty());
    }

    #[test]
    fn test_identity_and_integerised_counted_once() {
        let mut graph = QuantGraph::new();
        let x = graph.add_placeholder("x");
        let t = graph.call_module("t", tunnel(1.0, 1.0)).input(x).finish().unwrap();
        let relu = graph.call_function(Function::Relu).input(t).finish().unwrap();
        graph.set_output(relu).unwrap();

        assert_eq!(EpsTunnelRemoverFinder::new(RemovalPolicy::Vacuous).find(&graph), vec![t]);
    }

    #[test]
    fn test_force_still_spares_output_tunnel() {
        let mut graph = QuantGraph::new();
        let x = graph.add_placeholder("x");
        let t0 = graph.call_module("t0", tunnel(0.5, 0.25)).input(x).finish().unwrap();
        let relu = graph.call_function(Function::Relu).input(t0).finish().unwrap();
        let t1 = graph.call_module("t1", tunnel(0.25, 0.125)).input(relu).finish().unwrap();
        graph.set_output(t1).unwrap();

        assert_eq!(EpsTunnelRemoverFinder::new(RemovalPolicy::Force).find(&graph), vec![t0]);
    }

    #[test]
    fn test_checker_reports_repeated_node() {
        let mut graph = QuantGraph::new();
        let x = graph.add_placeholder("x");
        let t = graph.call_module("t", tunnel(1.0, 1.0)).input(x).finish().unwrap();

        let points = vec![ApplicationPoint::new("r", t), ApplicationPoint::new("r", t)];
        let err = EpsTunnelRemoverChecker.check(&graph, &points).unwrap_err();
        match err {
            EditingError::Overlap { node, count, .. } => {
                assert_eq!(node, "t");
                assert_eq!(count, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_applier_rejects_non_tunnel() {
        let mut graph = QuantGraph::new();
        let x = graph.add_placeholder("x");
        let relu = graph.call_function(Function::Relu).input(x).finish().unwrap();
        graph.set_output(relu).unwrap();

        let err = EpsTunnelRemoverApplier.apply(&mut graph, &relu).unwrap_err();
        assert!(matches!(err, EditingError::StructuralAssumptionViolated { .. }));
    }

    #[test]
    fn test_applier_requires_single_user() {
        // x -> t -> add(t, t)
        let mut graph = QuantGraph::new();
        let x = graph.add_placeholder("x");
        let t = graph.call_module("t", tunnel(1.0, 1.0)).input(x).finish().unwrap();
        let relu = graph.call_function(Function::Relu).input(t).finish().unwrap();
        let add = graph.call_function(Function::Add).input(t).input(relu).finish().unwrap();
        graph.set_output(add).unwrap();

        let err = EpsTunnelRemoverApplier.apply(&mut graph, &t).unwrap_err();
        assert!(err.to_string().contains("expected exactly one user, found 2"));
        assert!(graph.contains_node(t));
    }

    #[test]
    fn test_applier_splices_tunnel() {
        let mut graph = QuantGraph::new();
        let x = graph.add_placeholder("x");
        let t = graph.call_module("t", tunnel(1.0, 1.0)).input(x).finish().unwrap();
        let relu = graph.call_function(Function::Relu).input(t).finish().unwrap();
        graph.set_output(relu).unwrap();

        EpsTunnelRemoverApplier.apply(&mut graph, &t).unwrap();

        assert!(!graph.contains_node(t));
        assert!(graph.get_submodule("t").is_err());
        assert_eq!(graph.all_input_nodes(relu), vec![x]);
        graph.validate().unwrap();
    }
}
