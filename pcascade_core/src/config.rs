//! Cascade configuration, loadable from JSON and overridable from the CLI.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cascade::CascadeSpec;
use crate::error::{CascadeError, Result};

/// Compression algorithm families a caller may name in a configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Single-shot general purpose compression; cannot build a cascade.
    Zstd,
    /// Layered float transform with integer fallback.
    #[default]
    PrecisionCascade,
}

impl Algorithm {
    pub fn supports_cascade(self) -> bool {
        matches!(self, Algorithm::PrecisionCascade)
    }
}

/// Default zstd level for float layers.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Default per-buffer target capacity, in bytes.
pub const DEFAULT_TARGET_CAPACITY: usize = 16 * 1024 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CascadeConfig {
    pub algorithm: Algorithm,
    /// Level codes, coarsest first.
    pub levels: Vec<i32>,
    /// Append a residual buffer so the full cascade is bit-exact.
    pub store_residual: bool,
    pub zstd_level: i32,
    /// Capacity applied to every buffer that has no explicit capacity.
    pub target_capacity: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::PrecisionCascade,
            levels: vec![65],
            store_residual: true,
            zstd_level: DEFAULT_ZSTD_LEVEL,
            target_capacity: DEFAULT_TARGET_CAPACITY,
        }
    }
}

impl CascadeConfig {
    /// A validated configuration. Algorithms that cannot produce a cascade
    /// are rejected.
    pub fn new(algorithm: Algorithm, levels: Vec<i32>, store_residual: bool) -> Result<Self> {
        let config = Self {
            algorithm,
            levels,
            store_residual,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.algorithm.supports_cascade() {
            return Err(CascadeError::UnsupportedAlgorithm(format!("{:?}", self.algorithm)));
        }
        if self.target_capacity == 0 {
            return Err(CascadeError::InvalidCapacity(0));
        }
        self.spec().map(|_| ())
    }

    pub fn spec(&self) -> Result<CascadeSpec> {
        CascadeSpec::new(&self.levels, self.store_residual)
    }

    /// One capacity per buffer the float cascade will produce.
    pub fn target_capacities(&self) -> Result<Vec<usize>> {
        Ok(vec![self.target_capacity; self.spec()?.buffer_count()])
    }
}
