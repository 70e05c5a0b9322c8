//! Tiled CPU matrix multiplication.
//!
//! `gemm` computes `C = alpha * op(A) @ op(B) + beta * C` on packed row-major
//! slices, where `op(X)` is `X` or its transpose. Transposed operands are
//! packed once up front so the inner loop always streams contiguous rows of
//! `B` and `C` through [`Element::axpy`].

use std::borrow::Cow;

use rayon::prelude::*;

use crate::config::KernelConfig;
use crate::element::Element;

/// Write the transpose of a `rows x cols` matrix into `out` (`cols x rows`).
pub fn transpose<T: Element>(src: &[T], rows: usize, cols: usize, out: &mut [T]) {
    debug_assert_eq!(src.len(), rows * cols);
    debug_assert_eq!(out.len(), rows * cols);
    for i in 0..rows {
        for j in 0..cols {
            out[j * rows + i] = src[i * cols + j];
        }
    }
}

fn packed<T: Element>(x: &[T], trans: bool, rows: usize, cols: usize) -> Cow<'_, [T]> {
    if trans {
        // stored as cols x rows
        let mut out = vec![T::ZERO; rows * cols];
        transpose(x, cols, rows, &mut out);
        Cow::Owned(out)
    } else {
        Cow::Borrowed(x)
    }
}

/// General matrix multiply.
///
/// `op(A)` is `m x k` and `op(B)` is `k x n`; `c` holds `m x n` elements.
/// With `beta == 0` the previous contents of `c` are ignored entirely.
#[allow(clippy::too_many_arguments)]
pub fn gemm<T: Element>(
    trans_a: bool,
    trans_b: bool,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: &[T],
    b: &[T],
    beta: T,
    c: &mut [T],
) {
    assert_eq!(a.len(), m * k, "gemm: lhs holds {} elements, expected {}", a.len(), m * k);
    assert_eq!(b.len(), k * n, "gemm: rhs holds {} elements, expected {}", b.len(), k * n);
    assert_eq!(c.len(), m * n, "gemm: output holds {} elements, expected {}", c.len(), m * n);
    if m == 0 || n == 0 {
        return;
    }

    if beta == T::ZERO {
        c.fill(T::ZERO);
    } else if beta != T::ONE {
        c.iter_mut().for_each(|v| *v *= beta);
    }
    if k == 0 || alpha == T::ZERO {
        return;
    }

    let a = packed(a, trans_a, m, k);
    let b = packed(b, trans_b, k, n);
    let cfg = KernelConfig::global();
    let block = cfg.tile_m * n;

    let run = |(bi, c_block): (usize, &mut [T])| {
        tiled_block(&a, &b, c_block, bi * cfg.tile_m, n, k, alpha, cfg);
    };
    if cfg.parallel(m * n * k) {
        c.par_chunks_mut(block).enumerate().for_each(run);
    } else {
        c.chunks_mut(block).enumerate().for_each(run);
    }
}

/// Accumulate one horizontal band of `C` starting at row `i0`.
#[allow(clippy::too_many_arguments)]
fn tiled_block<T: Element>(
    a: &[T],
    b: &[T],
    c_block: &mut [T],
    i0: usize,
    n: usize,
    k: usize,
    alpha: T,
    cfg: &KernelConfig,
) {
    let rows = c_block.len() / n;
    for j0 in (0..n).step_by(cfg.tile_n) {
        let j_end = (j0 + cfg.tile_n).min(n);
        for p0 in (0..k).step_by(cfg.tile_k) {
            let p_end = (p0 + cfg.tile_k).min(k);
            for r in 0..rows {
                let i = i0 + r;
                let c_row = &mut c_block[r * n + j0..r * n + j_end];
                for p in p0..p_end {
                    let a_val = alpha * a[i * k + p];
                    T::axpy(a_val, &b[p * n + j0..p * n + j_end], c_row);
                }
            }
        }
    }
}

/// `out = a @ b` for packed `[m, k] @ [k, n]`.
pub fn matmul<T: Element>(a: &[T], b: &[T], m: usize, k: usize, n: usize, out: &mut [T]) {
    gemm(false, false, m, n, k, T::ONE, a, b, T::ZERO, out);
}
