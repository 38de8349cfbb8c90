// Epsilon-tunnel editors
//
// - `simplifier`: reconcile the boundary tunnels of integer-native regions
// - `remover`: splice redundant tunnels out of the graph

pub mod remover;
pub mod simplifier;

pub use remover::{
    EpsTunnelRemover, EpsTunnelRemoverApplier, EpsTunnelRemoverChecker, EpsTunnelRemoverFinder, RemovalPolicy,
};
pub use simplifier::{
    EpsTunnelConstruct, EpsTunnelConstructApplier, EpsTunnelConstructChecker, EpsTunnelConstructFinder,
    EpsTunnelConstructSimplifier,
};
