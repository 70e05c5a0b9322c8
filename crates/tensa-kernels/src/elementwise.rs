//! Elementwise kernels over equal-length slices.
//!
//! Each unary/binary op knows its own derivative, so the gradient kernels are
//! fused `acc += grad * d(op)` loops instead of chains of temporaries.

use rayon::prelude::*;

use crate::config::KernelConfig;
use crate::element::Element;

/// Elementwise unary operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Unary<T> {
    Neg,
    Square,
    /// `c / x`
    RecipScaled(T),
    Exp,
    Ln,
    Tanh,
    Relu,
    Abs,
    Sqrt,
    AddScalar(T),
    MulScalar(T),
}

impl<T: Element> Unary<T> {
    pub fn name(&self) -> &'static str {
        match self {
            Unary::Neg => "neg",
            Unary::Square => "square",
            Unary::RecipScaled(_) => "rdiv_scalar",
            Unary::Exp => "exp",
            Unary::Ln => "log",
            Unary::Tanh => "tanh",
            Unary::Relu => "relu",
            Unary::Abs => "abs",
            Unary::Sqrt => "sqrt",
            Unary::AddScalar(_) => "add_scalar",
            Unary::MulScalar(_) => "mul_scalar",
        }
    }

    #[inline]
    pub fn apply(self, x: T) -> T {
        match self {
            Unary::Neg => -x,
            Unary::Square => x * x,
            Unary::RecipScaled(c) => c / x,
            Unary::Exp => x.exp(),
            Unary::Ln => x.ln(),
            Unary::Tanh => x.tanh(),
            Unary::Relu => {
                if x > T::ZERO {
                    x
                } else {
                    T::ZERO
                }
            }
            Unary::Abs => x.abs(),
            Unary::Sqrt => x.sqrt(),
            Unary::AddScalar(c) => x + c,
            Unary::MulScalar(c) => x * c,
        }
    }

    /// `dy/dx` given the input `x` and the forward output `y`.
    #[inline]
    pub fn derivative(self, x: T, y: T) -> T {
        match self {
            Unary::Neg => -T::ONE,
            Unary::Square => x + x,
            Unary::RecipScaled(_) => -(y / x),
            Unary::Exp => y,
            Unary::Ln => T::ONE / x,
            Unary::Tanh => T::ONE - y * y,
            Unary::Relu => {
                if x > T::ZERO {
                    T::ONE
                } else {
                    T::ZERO
                }
            }
            Unary::Abs => T::ONE.copysign(x),
            Unary::Sqrt => T::ONE / (y + y),
            Unary::AddScalar(_) => T::ONE,
            Unary::MulScalar(c) => c,
        }
    }
}

/// Elementwise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binary {
    Add,
    Sub,
    Mul,
    Div,
}

/// Which operand of a binary op a gradient is being computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Lhs,
    Rhs,
}

impl Binary {
    pub fn name(&self) -> &'static str {
        match self {
            Binary::Add => "add",
            Binary::Sub => "sub",
            Binary::Mul => "mul",
            Binary::Div => "div",
        }
    }

    #[inline]
    pub fn apply<T: Element>(self, a: T, b: T) -> T {
        match self {
            Binary::Add => a + b,
            Binary::Sub => a - b,
            Binary::Mul => a * b,
            Binary::Div => a / b,
        }
    }

    /// Partial derivative of `a op b` with respect to `side`.
    #[inline]
    pub fn partial<T: Element>(self, side: Operand, a: T, b: T) -> T {
        match (self, side) {
            (Binary::Add, _) => T::ONE,
            (Binary::Sub, Operand::Lhs) => T::ONE,
            (Binary::Sub, Operand::Rhs) => -T::ONE,
            (Binary::Mul, Operand::Lhs) => b,
            (Binary::Mul, Operand::Rhs) => a,
            (Binary::Div, Operand::Lhs) => T::ONE / b,
            (Binary::Div, Operand::Rhs) => -(a / (b * b)),
        }
    }
}

/// `out[i] = op(x[i])`
pub fn unary_map<T: Element>(op: Unary<T>, x: &[T], out: &mut [T]) {
    assert_eq!(x.len(), out.len(), "unary_map: length mismatch");
    for (o, &v) in out.iter_mut().zip(x.iter()) {
        *o = op.apply(v);
    }
}

/// `acc[i] += grad[i] * op'(x[i])`, where `y` holds the forward outputs.
pub fn unary_grad_acc<T: Element>(op: Unary<T>, x: &[T], y: &[T], grad: &[T], acc: &mut [T]) {
    assert!(
        x.len() == acc.len() && y.len() == acc.len() && grad.len() == acc.len(),
        "unary_grad_acc: length mismatch"
    );
    for i in 0..acc.len() {
        acc[i] += grad[i] * op.derivative(x[i], y[i]);
    }
}

/// `out[i] = a[i] op b[i]` for equal-length operands.
pub fn binary_map<T: Element>(op: Binary, a: &[T], b: &[T], out: &mut [T]) {
    assert!(
        a.len() == out.len() && b.len() == out.len(),
        "binary_map: counts must match exactly ({}, {}, {})",
        a.len(),
        b.len(),
        out.len()
    );
    for i in 0..out.len() {
        out[i] = op.apply(a[i], b[i]);
    }
}

/// `acc[i] += grad[i] * d(a op b)/d(side)` for equal-length operands.
pub fn binary_grad_acc<T: Element>(
    op: Binary,
    side: Operand,
    a: &[T],
    b: &[T],
    grad: &[T],
    acc: &mut [T],
) {
    assert!(
        a.len() == acc.len() && b.len() == acc.len() && grad.len() == acc.len(),
        "binary_grad_acc: length mismatch"
    );
    match (op, side) {
        // Unit partials: plain accumulate
        (Binary::Add, _) | (Binary::Sub, Operand::Lhs) => T::axpy(T::ONE, grad, acc),
        (Binary::Sub, Operand::Rhs) => T::axpy(-T::ONE, grad, acc),
        _ => {
            for i in 0..acc.len() {
                acc[i] += grad[i] * op.partial(side, a[i], b[i]);
            }
        }
    }
}

/// Fused multiply-add: `out[i] = a[i] * b[i] + c[i]`.
pub fn fma<T: Element>(a: &[T], b: &[T], c: &[T], out: &mut [T]) {
    assert!(
        a.len() == out.len() && b.len() == out.len() && c.len() == out.len(),
        "fma: length mismatch"
    );
    for i in 0..out.len() {
        out[i] = a[i] * b[i] + c[i];
    }
}

/// Fused scale-and-add: `out[i] = a[i] * scalar + b[i]`.
pub fn scale_add<T: Element>(a: &[T], scalar: T, b: &[T], out: &mut [T]) {
    assert!(a.len() == out.len() && b.len() == out.len(), "scale_add: length mismatch");
    for i in 0..out.len() {
        out[i] = a[i] * scalar + b[i];
    }
}

/// In-place `y += alpha * x`.
pub fn axpy<T: Element>(alpha: T, x: &[T], y: &mut [T]) {
    assert_eq!(x.len(), y.len(), "axpy: length mismatch");
    T::axpy(alpha, x, y);
}

/// In-place `dst += src`.
pub fn accumulate<T: Element>(dst: &mut [T], src: &[T]) {
    axpy(T::ONE, src, dst);
}

/// In-place `x *= scalar`.
pub fn scale<T: Element>(x: &mut [T], scalar: T) {
    for v in x.iter_mut() {
        *v *= scalar;
    }
}

pub fn dot<T: Element>(a: &[T], b: &[T]) -> T {
    assert_eq!(a.len(), b.len(), "dot: length mismatch");
    let mut acc = T::ZERO;
    for i in 0..a.len() {
        acc += a[i] * b[i];
    }
    acc
}

/// Sum of all elements, split over rayon for large inputs.
pub fn sum<T: Element>(a: &[T]) -> T {
    if KernelConfig::global().parallel(a.len()) {
        a.par_iter().copied().sum::<T>()
    } else {
        a.iter().copied().sum::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_unary_map() {
        let x = [-1.0f32, 0.0, 2.0];
        let mut out = [0.0f32; 3];
        unary_map(Unary::Relu, &x, &mut out);
        assert_eq!(out, [0.0, 0.0, 2.0]);

        unary_map(Unary::RecipScaled(4.0), &[1.0, 2.0, 4.0], &mut out);
        assert_eq!(out, [4.0, 2.0, 1.0]);
    }

    #[test]
    fn test_tanh_derivative_uses_output() {
        let x = 0.3f64;
        let y = x.tanh();
        let d = Unary::Tanh.derivative(x, y);
        assert_abs_diff_eq!(d, 1.0 - y * y, epsilon = 1e-12);
    }

    #[test]
    fn test_abs_derivative_is_sign_copy() {
        assert_eq!(Unary::<f32>::Abs.derivative(-3.0, 3.0), -1.0);
        assert_eq!(Unary::<f32>::Abs.derivative(2.0, 2.0), 1.0);
    }

    #[test]
    fn test_unary_grad_acc_accumulates() {
        let x = [1.0f64, 2.0];
        let mut y = [0.0f64; 2];
        unary_map(Unary::Square, &x, &mut y);
        let g = [1.0f64, 1.0];
        let mut acc = [10.0f64, 10.0];
        unary_grad_acc(Unary::Square, &x, &y, &g, &mut acc);
        assert_eq!(acc, [12.0, 14.0]);
    }

    #[test]
    fn test_binary_partials() {
        assert_eq!(Binary::Div.partial(Operand::Lhs, 6.0f64, 2.0), 0.5);
        assert_eq!(Binary::Div.partial(Operand::Rhs, 6.0f64, 2.0), -1.5);
        assert_eq!(Binary::Mul.partial(Operand::Rhs, 6.0f64, 2.0), 6.0);
        assert_eq!(Binary::Sub.partial(Operand::Rhs, 6.0f64, 2.0), -1.0);
    }

    #[test]
    fn test_binary_grad_acc_sub_rhs() {
        let a = [1.0f32, 2.0];
        let b = [3.0f32, 4.0];
        let g = [1.0f32, 2.0];
        let mut acc = [0.0f32; 2];
        binary_grad_acc(Binary::Sub, Operand::Rhs, &a, &b, &g, &mut acc);
        assert_eq!(acc, [-1.0, -2.0]);
    }

    #[test]
    #[should_panic(expected = "counts must match")]
    fn test_binary_map_len_mismatch() {
        let mut out = [0.0f32; 2];
        binary_map(Binary::Add, &[1.0, 2.0], &[1.0], &mut out);
    }

    #[test]
    fn test_fused_ops() {
        let mut out = [0.0f32; 2];
        fma(&[2.0, 3.0], &[4.0, 5.0], &[1.0, 1.0], &mut out);
        assert_eq!(out, [9.0, 16.0]);
        scale_add(&[2.0, 3.0], 10.0, &[1.0, 1.0], &mut out);
        assert_eq!(out, [21.0, 31.0]);
        assert_eq!(dot(&[1.0f32, 2.0, 3.0], &[4.0, 5.0, 6.0]), 32.0);
        assert_eq!(sum(&[1.0f32, 2.0, 3.0, 4.0]), 10.0);
    }
}
