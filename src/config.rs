//! Configuration file support for the QAT editing pipeline
//!
//! Editing settings can be loaded from TOML files and overridden by the
//! caller. Only the settings of the editing pipeline live here; module
//! hyper-parameters are passed to the layer constructors directly.
//!
//! # Config File Locations
//!
//! 1. `./config.toml` (current directory)
//! 2. `./.hologram-qat.toml` (dotfile)
//! 3. `./hologram-qat.toml`
//! 4. `~/.config/hologram/qat.toml` (user config)
//!
//! # Example Config File
//!
//! ```toml
//! [qat-editing]
//! # identity, vacuous or force (default: vacuous)
//! removal_policy = "vacuous"
//!
//! # Fixpoint iteration limit per rewriter (default: 100)
//! max_iterations = 50
//!
//! # Validate the graph after every applied batch (default: true)
//! validate_after_apply = true
//!
//! # Log every application point (default: false)
//! verbose = false
//! ```

use crate::editing::epstunnels::RemovalPolicy;
use crate::error::EditingError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default fixpoint iteration limit
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Root configuration: either a `[qat-editing]` section or the settings at
/// the top level of the file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RootConfig {
    #[serde(rename = "qat-editing", skip_serializing_if = "Option::is_none")]
    pub qat_editing: Option<EditingConfig>,

    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub direct: Option<EditingConfig>,
}

/// Editing configuration loaded from TOML file
///
/// All fields are optional. Caller overrides take precedence.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EditingConfig {
    /// Epsilon-tunnel removal policy: identity, vacuous or force
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removal_policy: Option<String>,

    /// Fixpoint iteration limit per rewriter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,

    /// Validate the graph after every applied batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate_after_apply: Option<bool>,

    /// Log every application point at info level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
}

impl EditingConfig {
    /// Load config from TOML file
    ///
    /// Accepts both the sectioned (`[qat-editing]`) and the direct format,
    /// preferring the section when both are present.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::IoError(path.as_ref().to_path_buf(), e))?;

        let root: RootConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(path.as_ref().to_path_buf(), e))?;

        Ok(root.qat_editing.or(root.direct).unwrap_or_default())
    }

    /// Find and load config file from standard locations
    ///
    /// Returns `None` if no config file found.
    pub fn find_and_load() -> Result<Option<Self>, ConfigError> {
        let candidates = [
            PathBuf::from("./config.toml"),
            PathBuf::from("./.hologram-qat.toml"),
            PathBuf::from("./hologram-qat.toml"),
        ];
        for candidate in &candidates {
            if candidate.exists() {
                return Ok(Some(Self::load(candidate)?));
            }
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".config/hologram/qat.toml");
            if user_config.exists() {
                return Ok(Some(Self::load(&user_config)?));
            }
        }

        Ok(None)
    }

    /// Save config to TOML file, under the `[qat-editing]` section
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let root = RootConfig {
            qat_editing: Some(self.clone()),
            direct: None,
        };
        let contents = toml::to_string_pretty(&root).map_err(ConfigError::SerializeError)?;

        std::fs::write(path.as_ref(), contents).map_err(|e| ConfigError::IoError(path.as_ref().to_path_buf(), e))?;

        Ok(())
    }

    /// Merge with caller overrides (overrides take precedence)
    ///
    /// Fails if the resulting removal policy is not a known policy name or
    /// if the iteration limit is zero.
    pub fn merge_with_overrides(
        &self,
        removal_policy: Option<&str>,
        max_iterations: Option<usize>,
        validate_after_apply: Option<bool>,
        verbose: Option<bool>,
    ) -> Result<MergedConfig, EditingError> {
        let removal_policy = match removal_policy.or(self.removal_policy.as_deref()) {
            Some(name) => name.parse::<RemovalPolicy>()?,
            None => RemovalPolicy::default(),
        };

        let max_iterations = max_iterations.or(self.max_iterations).unwrap_or(DEFAULT_MAX_ITERATIONS);
        if max_iterations == 0 {
            return Err(EditingError::invalid_argument(
                "EditingConfig",
                "max_iterations",
                "0",
                &["a positive integer"],
            ));
        }

        Ok(MergedConfig {
            removal_policy,
            max_iterations,
            validate_after_apply: validate_after_apply.or(self.validate_after_apply).unwrap_or(true),
            verbose: verbose.or(self.verbose).unwrap_or(false),
        })
    }
}

/// Merged configuration after combining config file + overrides
#[derive(Debug, Clone, PartialEq)]
pub struct MergedConfig {
    pub removal_policy: RemovalPolicy,
    pub max_iterations: usize,
    pub validate_after_apply: bool,
    pub verbose: bool,
}

impl Default for MergedConfig {
    fn default() -> Self {
        Self {
            removal_policy: RemovalPolicy::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            validate_after_apply: true,
            verbose: false,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file {0}: {1}")]
    IoError(PathBuf, #[source] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, #[source] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[source] toml::ser::Error),
}
