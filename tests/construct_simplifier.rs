//! Integration tests for construct reconciliation

mod common;

use approx::assert_relative_eq;
use common::{add_relu, add_tunnel, init_tracing};
use hologram_qat::editing::epstunnels::EpsTunnelConstructFinder;
use hologram_qat::editing::Finder;
use hologram_qat::graph::{Function, QuantGraph};
use hologram_qat::nn::{EpsTunnel, Linear, Module};
use hologram_qat::{EpsTunnelConstructSimplifier, EpsTunnelRemover, Pipeline, RemovalPolicy};
use ndarray::{array, Array1};

fn assert_values_close(actual: &Array1<f64>, expected: &Array1<f64>) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert_relative_eq!(*a, *e, epsilon = 1e-12, max_relative = 1e-12);
    }
}

/// x -> relu -> b(0.5 -> 0.125) -> linear -> relu -> f(0.125 -> 0.25) -> relu -> output
#[test]
fn test_reconciles_linear_region() {
    init_tracing();

    let mut graph = QuantGraph::new();
    let x = graph.add_placeholder("x");
    let r0 = add_relu(&mut graph, x);
    let b = add_tunnel(&mut graph, "b", 0.5, 0.125, r0);
    let weight = array![[1.0, -0.5], [0.25, 2.0]];
    let fc = graph
        .call_module("fc", Module::Linear(Linear::new(weight, None).unwrap()))
        .input(b)
        .finish()
        .unwrap();
    let r1 = add_relu(&mut graph, fc);
    let f = add_tunnel(&mut graph, "f", 0.125, 0.25, r1);
    let r2 = add_relu(&mut graph, f);
    graph.set_output(r2).unwrap();

    let input = array![3.0, -1.5];
    let before = graph.evaluate(&[input.clone()]).unwrap();
    let nodes_before = graph.node_count();

    let simplifier = EpsTunnelConstructSimplifier::new();
    let stats = simplifier.run_in_place(&mut graph).unwrap();

    assert_eq!(stats.applied, 1);
    assert_eq!(graph.node_count(), nodes_before);
    assert_eq!(graph.eps_tunnel(b).unwrap().eps_in(), &array![0.5]);
    assert_eq!(graph.eps_tunnel(b).unwrap().eps_out(), &array![1.0]);
    assert_eq!(graph.eps_tunnel(f).unwrap().eps_in(), &array![1.0]);
    assert_eq!(graph.eps_tunnel(f).unwrap().eps_out(), &array![0.25]);
    assert_values_close(&graph.evaluate(&[input]).unwrap(), &before);

    // reconciled regions are not found again
    assert!(simplifier.find(&graph).is_empty());
}

/// Two backward tunnels feeding an add, one forward tunnel
#[test]
fn test_reconciles_merge_region() {
    let mut graph = QuantGraph::new();
    let x = graph.add_placeholder("x");
    let r0 = add_relu(&mut graph, x);
    let b1 = add_tunnel(&mut graph, "b1", 0.5, 0.125, r0);
    let b2 = add_tunnel(&mut graph, "b2", 0.25, 0.125, r0);
    let add = graph.call_function(Function::Add).input(b1).input(b2).finish().unwrap();
    let f = add_tunnel(&mut graph, "f", 0.125, 0.5, add);
    let r1 = add_relu(&mut graph, f);
    graph.set_output(r1).unwrap();

    let constructs = EpsTunnelConstructFinder.find(&graph);
    assert_eq!(constructs.len(), 1);
    assert_eq!(constructs[0].backward, vec![b1, b2]);
    assert_eq!(constructs[0].core, vec![add]);
    assert_eq!(constructs[0].forward, vec![f]);

    let input = array![0.75, -2.0, 6.5];
    let before = graph.evaluate(&[input.clone()]).unwrap();

    let graph = EpsTunnelConstructSimplifier::new().run(graph).unwrap();

    for tunnel in [b1, b2] {
        assert!(graph.eps_tunnel(tunnel).unwrap().has_unit_eps_out());
    }
    assert_eq!(graph.eps_tunnel(f).unwrap().eps_in(), &array![1.0]);
    assert_values_close(&graph.evaluate(&[input]).unwrap(), &before);
}

/// A backward tunnel also read outside the region keeps its scale
#[test]
fn test_backward_tunnel_with_outside_user() {
    // x -> relu -> b -> relu -> f -> add -> output, plus b -> relu -> add
    let mut graph = QuantGraph::new();
    let x = graph.add_placeholder("x");
    let r0 = add_relu(&mut graph, x);
    let b = add_tunnel(&mut graph, "b", 0.5, 0.125, r0);
    let r1 = add_relu(&mut graph, b);
    let f = add_tunnel(&mut graph, "f", 0.125, 0.25, r1);
    let side = add_relu(&mut graph, b);
    let add = graph.call_function(Function::Add).input(f).input(side).finish().unwrap();
    graph.set_output(add).unwrap();

    assert!(EpsTunnelConstructFinder.find(&graph).is_empty());

    let stats = EpsTunnelConstructSimplifier::new().run_in_place(&mut graph).unwrap();
    assert_eq!(stats.applied, 0);
    assert_eq!(graph.eps_tunnel(b).unwrap().eps_out(), &array![0.125]);
}

/// Regions sharing a tunnel are reconciled in successive rounds
#[test]
fn test_adjacent_regions_reconciled_in_turn() {
    init_tracing();

    // x -> relu -> b -> relu_a -> m -> relu_b -> f -> relu -> output
    let mut graph = QuantGraph::new();
    let x = graph.add_placeholder("x");
    let r0 = add_relu(&mut graph, x);
    let b = add_tunnel(&mut graph, "b", 0.5, 0.125, r0);
    let relu_a = add_relu(&mut graph, b);
    let m = add_tunnel(&mut graph, "m", 0.125, 0.125, relu_a);
    let relu_b = add_relu(&mut graph, m);
    let f = add_tunnel(&mut graph, "f", 0.125, 0.25, relu_b);
    let r1 = add_relu(&mut graph, f);
    graph.set_output(r1).unwrap();

    let first = EpsTunnelConstructFinder.find(&graph);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].backward, vec![b]);
    assert_eq!(first[0].forward, vec![m]);

    let input = array![-1.0, 2.5];
    let before = graph.evaluate(&[input.clone()]).unwrap();

    let stats = EpsTunnelConstructSimplifier::new().run_in_place(&mut graph).unwrap();
    assert_eq!(stats.iterations, 2);
    assert_eq!(stats.applied, 2);

    let middle = graph.eps_tunnel(m).unwrap();
    assert!(middle.has_unit_eps_out());
    assert!(middle.is_identity());
    assert_values_close(&graph.evaluate(&[input.clone()]).unwrap(), &before);

    // the now transparent middle tunnel is spliced out by the remover
    let graph = EpsTunnelRemover::new(RemovalPolicy::Identity).run(graph).unwrap();
    assert!(!graph.contains_node(m));
    assert_values_close(&graph.evaluate(&[input]).unwrap(), &before);
}

/// Per-channel scales are reconciled across elementwise regions
#[test]
fn test_per_channel_scales() {
    let mut graph = QuantGraph::new();
    let x = graph.add_placeholder("x");
    let r0 = add_relu(&mut graph, x);
    let b = graph
        .call_module(
            "b",
            Module::EpsTunnel(EpsTunnel::new(array![0.5, 0.5], array![0.125, 0.25]).unwrap()),
        )
        .input(r0)
        .finish()
        .unwrap();
    let r1 = graph.call_function(Function::LeakyRelu(0.125)).input(b).finish().unwrap();
    let f = graph
        .call_module(
            "f",
            Module::EpsTunnel(EpsTunnel::new(array![0.125, 0.25], array![0.5]).unwrap()),
        )
        .input(r1)
        .finish()
        .unwrap();
    let r2 = add_relu(&mut graph, f);
    graph.set_output(r2).unwrap();

    let input = array![1.0, -4.0];
    let before = graph.evaluate(&[input.clone()]).unwrap();

    let graph = EpsTunnelConstructSimplifier::new().run(graph).unwrap();

    assert_eq!(graph.eps_tunnel(b).unwrap().eps_out(), &array![1.0, 1.0]);
    assert_eq!(graph.eps_tunnel(f).unwrap().eps_in(), &array![1.0, 1.0]);
    assert_values_close(&graph.evaluate(&[input]).unwrap(), &before);
}

/// Reconciliation followed by removal of the tunnels it made transparent
#[test]
fn test_pipeline_removes_reconciled_tunnels() {
    init_tracing();

    let mut graph = QuantGraph::new();
    let x = graph.add_placeholder("x");
    let r0 = add_relu(&mut graph, x);
    let b = add_tunnel(&mut graph, "b", 1.0, 0.125, r0);
    let r1 = add_relu(&mut graph, b);
    let f = add_tunnel(&mut graph, "f", 0.125, 1.0, r1);
    let r2 = add_relu(&mut graph, f);
    graph.set_output(r2).unwrap();

    let input = array![5.0, -5.0, 0.5];
    let before = graph.evaluate(&[input.clone()]).unwrap();

    let pipeline = Pipeline::new(vec![
        Box::new(EpsTunnelConstructSimplifier::new()),
        Box::new(EpsTunnelRemover::new(RemovalPolicy::Vacuous)),
    ]);
    let (graph, stats) = pipeline.run(graph).unwrap();

    assert_eq!(stats.rewrites.len(), 2);
    assert_eq!(stats.rewrites[0].applied, 1);
    assert_eq!(stats.rewrites[1].applied, 2);
    assert_eq!(stats.nodes_removed(), 2);
    assert!(graph.eps_tunnel_nodes().is_empty());
    assert_values_close(&graph.evaluate(&[input]).unwrap(), &before);
}
