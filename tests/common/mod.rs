//! Shared helpers for integration tests

#![allow(dead_code)]

use hologram_qat::graph::{Function, NodeId, QuantGraph};
use hologram_qat::nn::{EpsTunnel, Module};

/// Route `tracing` output through the test harness (`RUST_LOG=debug cargo test`)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn tunnel(eps_in: f64, eps_out: f64) -> Module {
    Module::EpsTunnel(EpsTunnel::scalar(eps_in, eps_out).unwrap())
}

pub fn add_tunnel(graph: &mut QuantGraph, target: &str, eps_in: f64, eps_out: f64, input: NodeId) -> NodeId {
    graph.call_module(target, tunnel(eps_in, eps_out)).input(input).finish().unwrap()
}

pub fn add_relu(graph: &mut QuantGraph, input: NodeId) -> NodeId {
    graph.call_function(Function::Relu).input(input).finish().unwrap()
}

/// Names of the live nodes along the unique path from the input to the output
pub fn chain_names(graph: &QuantGraph) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = graph.placeholders()[0];
    loop {
        names.push(graph.name_of(current));
        match graph.users(current).as_slice() {
            [next] => current = *next,
            _ => return names,
        }
    }
}
