// Leaf modules that can be owned by a traced graph
//
// Call-module nodes of a `QuantGraph` resolve their target to one of these
// modules. The set is closed: graph editors dispatch on `ModuleKind` with
// exhaustive matches instead of run-time type inspection.

pub mod epstunnel;
pub mod linear;
pub mod pact;

pub use epstunnel::EpsTunnel;
pub use linear::Linear;
pub use pact::{ActKind, InitClip, PactActivation, PactConfig};

use crate::error::{EditingError, Result};
use ndarray::{Array1, Zip};
use std::fmt;

/// Discriminant of a [`Module`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModuleKind {
    EpsTunnel,
    PactActivation,
    Linear,
    ReLU,
    Identity,
}

impl ModuleKind {
    /// Standard layers are always traced as atomic call-nodes.
    pub fn is_standard(&self) -> bool {
        matches!(self, ModuleKind::Linear | ModuleKind::ReLU | ModuleKind::Identity)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleKind::EpsTunnel => "EpsTunnel",
            ModuleKind::PactActivation => "PactActivation",
            ModuleKind::Linear => "Linear",
            ModuleKind::ReLU => "ReLU",
            ModuleKind::Identity => "Identity",
        };
        f.write_str(name)
    }
}

/// A module owned by the graph through a call-module node
#[derive(Debug, Clone, PartialEq)]
pub enum Module {
    EpsTunnel(EpsTunnel),
    PactActivation(PactActivation),
    Linear(Linear),
    ReLU,
    Identity,
}

impl Module {
    pub fn kind(&self) -> ModuleKind {
        match self {
            Module::EpsTunnel(_) => ModuleKind::EpsTunnel,
            Module::PactActivation(_) => ModuleKind::PactActivation,
            Module::Linear(_) => ModuleKind::Linear,
            Module::ReLU => ModuleKind::ReLU,
            Module::Identity => ModuleKind::Identity,
        }
    }

    pub fn as_eps_tunnel(&self) -> Option<&EpsTunnel> {
        match self {
            Module::EpsTunnel(tunnel) => Some(tunnel),
            _ => None,
        }
    }

    pub fn as_eps_tunnel_mut(&mut self) -> Option<&mut EpsTunnel> {
        match self {
            Module::EpsTunnel(tunnel) => Some(tunnel),
            _ => None,
        }
    }

    pub fn is_eps_tunnel(&self) -> bool {
        matches!(self, Module::EpsTunnel(_))
    }

    pub fn forward(&self, x: &Array1<f64>) -> Result<Array1<f64>> {
        match self {
            Module::EpsTunnel(tunnel) => tunnel.forward(x),
            Module::PactActivation(act) => Ok(act.forward(x)),
            Module::Linear(linear) => linear.forward(x),
            Module::ReLU => Ok(x.mapv(|v| v.max(0.0))),
            Module::Identity => Ok(x.clone()),
        }
    }

    /// Whether `forward(c * x) == c * forward(x)` for every `c > 0`.
    ///
    /// Only homogeneous modules can sit inside an integer-native construct.
    pub fn is_scale_homogeneous(&self) -> bool {
        match self {
            Module::EpsTunnel(_) | Module::ReLU | Module::Identity => true,
            Module::PactActivation(act) => act.is_scale_homogeneous(),
            Module::Linear(linear) => linear.bias().is_none(),
        }
    }

    /// Short label used in logs and DOT exports.
    pub fn summary(&self) -> String {
        match self {
            Module::EpsTunnel(tunnel) => {
                format!("EpsTunnel(eps_in={}, eps_out={})", tunnel.eps_in(), tunnel.eps_out())
            }
            Module::PactActivation(act) => format!("PactActivation({}, n_levels={})", act.act_kind(), act.n_levels()),
            Module::Linear(linear) => format!("Linear({}→{})", linear.in_features(), linear.out_features()),
            other => other.kind().to_string(),
        }
    }
}

/// Apply `f` elementwise, broadcasting length-one operands.
pub(crate) fn broadcast_zip(
    lhs: &Array1<f64>,
    rhs: &Array1<f64>,
    context: &str,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Array1<f64>> {
    match (lhs.len(), rhs.len()) {
        (l, r) if l == r => Ok(Zip::from(lhs).and(rhs).map_collect(|&a, &b| f(a, b))),
        (1, _) => {
            let a = lhs[0];
            Ok(rhs.mapv(|b| f(a, b)))
        }
        (_, 1) => {
            let b = rhs[0];
            Ok(lhs.mapv(|a| f(a, b)))
        }
        (l, r) => Err(EditingError::ShapeMismatch(format!(
            "{}: cannot broadcast {} elements against {}",
            context, l, r
        ))),
    }
}
