//! PACT (PArametrized Clipping acTivation) activations.
//!
//! Only the configuration surface and the statistics-mode forward pass live
//! here: the quantization kernels themselves are provided by the training
//! backend. Constructors validate their enumerated arguments eagerly so that
//! an unknown activation kind is reported when the layer is built, never when
//! a graph is traced or rewritten.

use crate::error::{EditingError, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Activation applied by a PACT layer in statistics mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActKind {
    Identity,
    Relu,
    Relu6,
    LeakyRelu,
}

impl ActKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActKind::Identity => "identity",
            ActKind::Relu => "relu",
            ActKind::Relu6 => "relu6",
            ActKind::LeakyRelu => "leaky_relu",
        }
    }
}

impl FromStr for ActKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "identity" => Ok(ActKind::Identity),
            "relu" => Ok(ActKind::Relu),
            "relu6" => Ok(ActKind::Relu6),
            "leaky_relu" => Ok(ActKind::LeakyRelu),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for ActKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the clipping bounds are initialised when quantization starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitClip {
    Max,
    Std,
    Const,
}

impl FromStr for InitClip {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "max" => Ok(InitClip::Max),
            "std" => Ok(InitClip::Std),
            "const" => Ok(InitClip::Const),
            other => Err(other.to_string()),
        }
    }
}

/// Unvalidated PACT layer arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PactConfig {
    pub n_levels: u32,
    pub init_clip: String,
    pub learn_clip: bool,
    pub act_kind: String,
    pub leaky: f64,
    pub nb_std: f64,
}

impl Default for PactConfig {
    fn default() -> Self {
        Self {
            n_levels: 256,
            init_clip: "max".to_string(),
            learn_clip: true,
            act_kind: "relu".to_string(),
            leaky: 0.1,
            nb_std: 3.0,
        }
    }
}

const UNSIGNED_ACT_KINDS: &[&str] = &["relu", "relu6", "leaky_relu"];
const ASYMMETRIC_ACT_KINDS: &[&str] = &["identity", "relu", "relu6", "leaky_relu"];
const INIT_CLIPS: &[&str] = &["max", "std", "const"];

/// A validated PACT activation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PactActivation {
    n_levels: u32,
    act_kind: ActKind,
    init_clip: InitClip,
    learn_clip: bool,
    leaky: f64,
    nb_std: f64,
    clip_lo: f64,
    clip_hi: f64,
    signed: bool,
}

impl PactActivation {
    /// Unsigned PACT activation, clipping to `[0, clip_hi]`.
    pub fn unsigned(config: &PactConfig) -> Result<Self> {
        Self::build("PACTUnsignedAct", config, UNSIGNED_ACT_KINDS, false)
    }

    /// Signed PACT activation, clipping to `[clip_lo, clip_hi]`.
    pub fn asymmetric(config: &PactConfig) -> Result<Self> {
        Self::build("PACTAsymmetricAct", config, ASYMMETRIC_ACT_KINDS, true)
    }

    fn build(component: &'static str, config: &PactConfig, valid_kinds: &[&str], signed: bool) -> Result<Self> {
        let act_kind_name = config.act_kind.to_lowercase();
        if !valid_kinds.contains(&act_kind_name.as_str()) {
            return Err(EditingError::invalid_argument(component, "act_kind", act_kind_name, valid_kinds));
        }
        let act_kind = ActKind::from_str(&act_kind_name)
            .map_err(|value| EditingError::invalid_argument(component, "act_kind", value, valid_kinds))?;

        let init_clip = InitClip::from_str(&config.init_clip)
            .map_err(|value| EditingError::invalid_argument(component, "init_clip", value, INIT_CLIPS))?;

        if config.n_levels < 2 {
            return Err(EditingError::invalid_argument(
                component,
                "n_levels",
                config.n_levels.to_string(),
                &["an integer >= 2"],
            ));
        }

        Ok(Self {
            n_levels: config.n_levels,
            act_kind,
            init_clip,
            learn_clip: config.learn_clip,
            leaky: config.leaky,
            nb_std: config.nb_std,
            clip_lo: if signed { -1.0 } else { 0.0 },
            clip_hi: 1.0,
            signed,
        })
    }

    pub fn n_levels(&self) -> u32 {
        self.n_levels
    }

    pub fn act_kind(&self) -> ActKind {
        self.act_kind
    }

    pub fn init_clip(&self) -> InitClip {
        self.init_clip
    }

    pub fn learn_clip(&self) -> bool {
        self.learn_clip
    }

    pub fn leaky(&self) -> f64 {
        self.leaky
    }

    pub fn nb_std(&self) -> f64 {
        self.nb_std
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn clip_bounds(&self) -> (f64, f64) {
        (self.clip_lo, self.clip_hi)
    }

    /// Overwrite the clipping bounds (e.g. after statistics collection).
    pub fn set_clip_bounds(&mut self, clip_lo: f64, clip_hi: f64) -> Result<()> {
        let lo = if self.signed { clip_lo } else { 0.0 };
        if !(clip_hi > lo) {
            return Err(EditingError::invalid_argument(
                "PactActivation",
                "clip_hi",
                clip_hi.to_string(),
                &["a value greater than clip_lo"],
            ));
        }
        self.clip_lo = lo;
        self.clip_hi = clip_hi;
        Ok(())
    }

    /// Quantization step of the layer output.
    pub fn eps(&self) -> f64 {
        if self.signed {
            (self.clip_hi - self.clip_lo) / f64::from(self.n_levels - 1)
        } else {
            self.clip_hi / f64::from(self.n_levels - 1)
        }
    }

    /// Statistics-mode forward pass: the plain activation, no quantization.
    pub fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        match self.act_kind {
            ActKind::Identity => x.clone(),
            ActKind::Relu => x.mapv(|v| v.max(0.0)),
            ActKind::Relu6 => x.mapv(|v| v.clamp(0.0, 6.0)),
            ActKind::LeakyRelu => {
                let slope = self.leaky;
                x.mapv(|v| if v >= 0.0 { v } else { slope * v })
            }
        }
    }

    /// Whether `forward(c * x) == c * forward(x)` for every `c > 0`.
    pub fn is_scale_homogeneous(&self) -> bool {
        // judged on the statistics-mode forward, which does not clip to the learned bounds
        !matches!(self.act_kind, ActKind::Relu6)
    }
}
