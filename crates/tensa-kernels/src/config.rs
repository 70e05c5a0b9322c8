//! Process-wide kernel tuning knobs.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Tuning parameters shared by every kernel.
///
/// Kernels always finish before returning to the caller; `par_threshold` only
/// decides whether the work inside a single call is split over rayon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Element (or multiply-add) count at which reductions and GEMM go parallel.
    pub par_threshold: usize,
    pub tile_m: usize,
    pub tile_n: usize,
    pub tile_k: usize,
}

static GLOBAL: OnceLock<KernelConfig> = OnceLock::new();

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            par_threshold: 1 << 15,
            // 64x64 f32 tiles fit comfortably in L1
            tile_m: 64,
            tile_n: 64,
            tile_k: 64,
        }
    }
}

impl KernelConfig {
    /// Never fan out; every kernel runs on the calling thread only.
    pub fn serial() -> Self {
        Self {
            par_threshold: usize::MAX,
            ..Self::default()
        }
    }

    /// Install this configuration for the whole process.
    ///
    /// Fails (returning the rejected config) if a configuration was already
    /// installed or a kernel already read the default one.
    pub fn install(self) -> Result<(), KernelConfig> {
        GLOBAL.set(self.sanitized())
    }

    /// The installed configuration, or the default one.
    pub fn global() -> &'static KernelConfig {
        GLOBAL.get_or_init(KernelConfig::default)
    }

    /// Whether `work` units are enough to split across threads.
    pub fn parallel(&self, work: usize) -> bool {
        work >= self.par_threshold
    }

    fn sanitized(mut self) -> Self {
        self.tile_m = self.tile_m.max(1);
        self.tile_n = self.tile_n.max(1);
        self.tile_k = self.tile_k.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_parallel_for_large_work() {
        let cfg = KernelConfig::default();
        assert!(cfg.parallel(1 << 20));
        assert!(!cfg.parallel(16));
    }

    #[test]
    fn test_serial_never_parallel() {
        assert!(!KernelConfig::serial().parallel(usize::MAX - 1));
    }

    #[test]
    fn test_from_json_partial() {
        let cfg: KernelConfig = serde_json::from_str(r#"{"par_threshold": 128}"#).unwrap();
        assert_eq!(cfg.par_threshold, 128);
        assert_eq!(cfg.tile_m, 64);
    }

    #[test]
    fn test_sanitized_tiles() {
        let cfg = KernelConfig { tile_m: 0, ..KernelConfig::default() }.sanitized();
        assert_eq!(cfg.tile_m, 1);
    }
}
