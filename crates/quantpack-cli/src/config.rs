//! Config - Configuration File Handling
//!
//! Parses the optional `quantpack.toml`. Every field is optional; command
//! line flags take precedence over the file, which takes precedence over the
//! built-in defaults.
//!
//! ```toml
//! [policy]
//! mode = "int4"
//! large_threshold = 4096
//! block_size = 64
//! critical = ["embed", "lm_head"]
//!
//! [prune]
//! ratio = 0.2
//! skip = ["norm"]
//!
//! [runtime]
//! threads = 8
//! batch_size = 16
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::path::{Path, PathBuf};

use quantpack_quant::{GlobalMode, PruneConfig, SchemePolicy};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// File name looked up in the working directory when no config is given.
pub const DEFAULT_CONFIG_FILE: &str = "quantpack.toml";

// =============================================================================
// Configuration Sections
// =============================================================================

/// Project configuration (quantpack.toml)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuantpackConfig {
    /// Scheme selection
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Magnitude pruning
    #[serde(default)]
    pub prune: PruneSection,

    /// Worker pool and batching
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Scheme selection configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Global mode for large matrices (int8, int4, block, f16)
    pub mode: Option<String>,

    /// Element count above which the global mode applies
    pub large_threshold: Option<usize>,

    /// Block size for block-wise int8
    pub block_size: Option<usize>,

    /// Name fragments always kept at int8
    pub critical: Option<Vec<String>>,
}

/// Pruning configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PruneSection {
    /// Fraction of weights to zero; pruning is off when absent
    pub ratio: Option<f64>,

    /// Name fragments never pruned
    pub skip: Option<Vec<String>>,
}

/// Runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Worker threads (0 = all cores)
    pub threads: Option<usize>,

    /// Tensors encoded per batch
    pub batch_size: Option<usize>,
}

// =============================================================================
// Loading
// =============================================================================

impl QuantpackConfig {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> CliResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads `explicit` when given, else `./quantpack.toml` when it exists,
    /// else the defaults.
    pub fn resolve(explicit: Option<&Path>) -> CliResult<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local.is_file() {
                    tracing::debug!(path = %local.display(), "using local configuration");
                    Self::load(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Applies the `[policy]` section on top of `base`.
    pub fn apply_policy(&self, mut base: SchemePolicy) -> CliResult<SchemePolicy> {
        let section = &self.policy;
        if let Some(mode) = &section.mode {
            let mode: GlobalMode = mode
                .parse()
                .map_err(|_| CliError::Config(format!("unknown policy mode '{mode}'")))?;
            base = base.with_mode(mode);
        }
        if let Some(threshold) = section.large_threshold {
            base = base.with_large_threshold(threshold);
        }
        if let Some(block_size) = section.block_size {
            base = base
                .with_block_size(block_size)
                .map_err(|e| CliError::Config(e.to_string()))?;
        }
        if let Some(critical) = &section.critical {
            base = base.with_critical(critical.iter().cloned());
        }
        Ok(base)
    }

    /// Builds the pruning configuration, preferring `ratio_override`.
    pub fn prune_config(&self, ratio_override: Option<f64>) -> CliResult<Option<PruneConfig>> {
        let Some(ratio) = ratio_override.or(self.prune.ratio) else {
            return Ok(None);
        };
        let mut config = PruneConfig::new(ratio)
            .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
        if let Some(skip) = &self.prune.skip {
            config = config.with_skip_patterns(skip.iter().cloned());
        }
        Ok(Some(config))
    }
}

// =============================================================================
// Tests
// =============================================================================
