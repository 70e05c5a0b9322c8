//! Runtime SIMD capability detection and the vectorised `axpy` used by GEMM.

use std::sync::OnceLock;

/// SIMD capabilities detected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimdCapability {
    pub avx2: bool,
    pub avx512f: bool,
    pub neon: bool,
    pub fma: bool,
}

static DETECTED: OnceLock<SimdCapability> = OnceLock::new();

impl SimdCapability {
    /// Probe the CPU once; later calls return the cached result.
    pub fn detect() -> &'static SimdCapability {
        DETECTED.get_or_init(|| {
            #[cfg(target_arch = "x86_64")]
            let cap = SimdCapability {
                avx2: is_x86_feature_detected!("avx2"),
                avx512f: is_x86_feature_detected!("avx512f"),
                fma: is_x86_feature_detected!("fma"),
                neon: false,
            };
            // NEON is baseline on aarch64
            #[cfg(not(target_arch = "x86_64"))]
            let cap = SimdCapability {
                avx2: false,
                avx512f: false,
                fma: false,
                neon: cfg!(target_arch = "aarch64"),
            };
            cap
        })
    }

    /// Best available SIMD tier as a human-readable string.
    pub fn best_tier(&self) -> &'static str {
        if self.avx512f {
            "AVX-512"
        } else if self.avx2 {
            "AVX2"
        } else if self.neon {
            "NEON"
        } else {
            "scalar"
        }
    }

    pub fn has_simd(&self) -> bool {
        self.avx2 || self.avx512f || self.neon
    }
}

/// `y += alpha * x` for f32, using AVX2+FMA when the CPU has it.
pub fn axpy_f32(alpha: f32, x: &[f32], y: &mut [f32]) {
    debug_assert_eq!(x.len(), y.len());

    #[cfg(target_arch = "x86_64")]
    {
        let cap = SimdCapability::detect();
        if cap.avx2 && cap.fma {
            // SAFETY: AVX2 and FMA were detected at runtime.
            unsafe { axpy_f32_avx2(alpha, x, y) };
            return;
        }
    }

    axpy_f32_scalar(alpha, x, y);
}

fn axpy_f32_scalar(alpha: f32, x: &[f32], y: &mut [f32]) {
    for (yi, &xi) in y.iter_mut().zip(x.iter()) {
        *yi += alpha * xi;
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn axpy_f32_avx2(alpha: f32, x: &[f32], y: &mut [f32]) {
    use std::arch::x86_64::*;

    let n = x.len().min(y.len());
    let a = _mm256_set1_ps(alpha);
    let x_ptr = x.as_ptr();
    let y_ptr = y.as_mut_ptr();

    let mut i = 0;
    while i + 8 <= n {
        let xv = _mm256_loadu_ps(x_ptr.add(i));
        let yv = _mm256_loadu_ps(y_ptr.add(i));
        _mm256_storeu_ps(y_ptr.add(i), _mm256_fmadd_ps(a, xv, yv));
        i += 8;
    }

    // Scalar tail
    while i < n {
        *y_ptr.add(i) += alpha * *x_ptr.add(i);
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_is_cached() {
        assert!(std::ptr::eq(SimdCapability::detect(), SimdCapability::detect()));
    }

    #[test]
    fn test_best_tier() {
        let scalar = SimdCapability { avx2: false, avx512f: false, neon: false, fma: false };
        assert_eq!(scalar.best_tier(), "scalar");
        assert!(!scalar.has_simd());

        let avx2 = SimdCapability { avx2: true, avx512f: false, neon: false, fma: true };
        assert_eq!(avx2.best_tier(), "AVX2");
        assert!(avx2.has_simd());
    }

    #[test]
    fn test_axpy_matches_scalar() {
        // 19 elements: two full AVX2 lanes plus a tail
        let x: Vec<f32> = (0..19).map(|i| i as f32 * 0.5).collect();
        let mut fast = vec![1.0f32; 19];
        let mut slow = vec![1.0f32; 19];
        axpy_f32(2.0, &x, &mut fast);
        axpy_f32_scalar(2.0, &x, &mut slow);
        assert_eq!(fast, slow);
    }
}
