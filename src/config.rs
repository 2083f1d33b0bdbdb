//! Run configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) runs the five
//! in-tree kernels at 512×512 against the `basic` baseline.
//!
//! ```toml
//! size = 1024
//! kernels = ["basic", "blocked", "simd", "mylib"]
//!
//! [[units]]
//! name = "mylib"
//! path = "./libmatrix_blocked.so"
//! symbol = "matrixmultiply_blocked_adaptive"
//! profile = "blocked"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kernels::BUILTIN_KERNELS;
use crate::registry::UnitSpec;

pub const DEFAULT_SIZE: usize = 512;
pub const DEFAULT_BASELINE: &str = "basic";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Matrix dimension used for every kernel in the run.
    pub size: usize,
    /// Kernels to measure, in order. Unknown names are reported as skipped.
    pub kernels: Vec<String>,
    /// Preferred baseline; the fastest result is used when it did not run.
    pub baseline: String,
    /// Compare every product with the reference product.
    pub verify: bool,
    pub include_native: bool,
    pub include_ndarray: bool,
    /// Shared-library kernels to load next to the in-tree ones.
    pub units: Vec<UnitSpec>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            kernels: BUILTIN_KERNELS.iter().map(|k| k.name.to_string()).collect(),
            baseline: DEFAULT_BASELINE.to_string(),
            verify: true,
            include_native: true,
            include_ndarray: true,
            units: Vec::new(),
        }
    }
}

impl RunConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Names to measure: the configured list, then any unit not already in it.
    pub fn kernel_order(&self) -> Vec<String> {
        let mut order = self.kernels.clone();
        for unit in &self.units {
            if !order.contains(&unit.name) {
                order.push(unit.name.clone());
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = RunConfig::from_toml("").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.kernels, ["basic", "multithread", "blocked", "simd", "optimized"]);
    }

    #[test]
    fn units_are_appended_to_kernel_order() {
        let config = RunConfig::from_toml(
            r#"
            size = 64
            kernels = ["basic", "extra"]

            [[units]]
            name = "extra"
            path = "libextra.so"
            symbol = "matrixmultiply_extra"

            [[units]]
            name = "other"
            path = "libother.so"
            symbol = "matrixmultiply_other"
            profile = "simd"
            "#,
        )
        .unwrap();

        assert_eq!(config.size, 64);
        assert_eq!(config.kernel_order(), ["basic", "extra", "other"]);
        assert_eq!(config.units[0].signature, "(int, int**, int**, int**) -> void");
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(RunConfig::from_toml("sizes = 3").is_err());
    }
}
