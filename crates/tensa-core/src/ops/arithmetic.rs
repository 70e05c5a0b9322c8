//! Elementwise arithmetic, broadcasting and matrix multiplication.

use tensa_kernels::{Binary, Element, Unary};

use crate::backend::Backend;
use crate::context::Context;
use crate::error::TensaError;
use crate::tensor::Tensor;
use crate::Result;

impl<B: Backend> Tensor<B> {
    /// Elementwise `self + other`, broadcasting if shapes differ.
    pub fn add(&self, other: &Tensor<B>) -> Result<Tensor<B>> {
        self.binary_op(Binary::Add, other)
    }

    pub fn sub(&self, other: &Tensor<B>) -> Result<Tensor<B>> {
        self.binary_op(Binary::Sub, other)
    }

    pub fn mul(&self, other: &Tensor<B>) -> Result<Tensor<B>> {
        self.binary_op(Binary::Mul, other)
    }

    pub fn div(&self, other: &Tensor<B>) -> Result<Tensor<B>> {
        self.binary_op(Binary::Div, other)
    }

    fn binary_op(&self, op: Binary, other: &Tensor<B>) -> Result<Tensor<B>> {
        if self.shape() == other.shape() {
            let out = B::allocate(self.numel());
            B::binary(op, self.values(), other.values(), &out);
            return Ok(Tensor::derived(
                self.shape().clone(),
                out,
                Context::Binary {
                    op,
                    lhs: self.clone(),
                    rhs: other.clone(),
                },
            ));
        }

        let shape = self.shape().broadcast_with(other.shape()).ok_or_else(|| {
            TensaError::BroadcastError {
                a: self.dims().to_vec(),
                b: other.dims().to_vec(),
            }
        })?;
        let out = B::allocate(shape.numel());
        B::broadcast(op, self.values(), self.shape(), other.values(), other.shape(), &out, &shape);
        Ok(Tensor::derived(
            shape,
            out,
            Context::Broadcast {
                op,
                lhs: self.clone(),
                rhs: other.clone(),
            },
        ))
    }

    fn unary_op(&self, op: Unary<B::Elem>) -> Tensor<B> {
        let out = B::allocate(self.numel());
        B::unary(op, self.values(), &out);
        Tensor::derived(
            self.shape().clone(),
            out,
            Context::Unary {
                op,
                source: self.clone(),
            },
        )
    }

    pub fn neg(&self) -> Tensor<B> {
        self.unary_op(Unary::Neg)
    }

    pub fn square(&self) -> Tensor<B> {
        self.unary_op(Unary::Square)
    }

    pub fn exp(&self) -> Tensor<B> {
        self.unary_op(Unary::Exp)
    }

    /// Natural logarithm.
    pub fn log(&self) -> Tensor<B> {
        self.unary_op(Unary::Ln)
    }

    pub fn tanh(&self) -> Tensor<B> {
        self.unary_op(Unary::Tanh)
    }

    pub fn relu(&self) -> Tensor<B> {
        self.unary_op(Unary::Relu)
    }

    pub fn abs(&self) -> Tensor<B> {
        self.unary_op(Unary::Abs)
    }

    pub fn sqrt(&self) -> Tensor<B> {
        self.unary_op(Unary::Sqrt)
    }

    pub fn add_scalar(&self, scalar: B::Elem) -> Tensor<B> {
        self.unary_op(Unary::AddScalar(scalar))
    }

    pub fn mul_scalar(&self, scalar: B::Elem) -> Tensor<B> {
        self.unary_op(Unary::MulScalar(scalar))
    }

    /// `scalar / self`, elementwise.
    pub fn rdiv_scalar(&self, scalar: B::Elem) -> Tensor<B> {
        self.unary_op(Unary::RecipScaled(scalar))
    }

    pub fn reciprocal(&self) -> Tensor<B> {
        self.rdiv_scalar(B::Elem::ONE)
    }

    /// Matrix multiplication: `[m, k] @ [k, n] -> [m, n]`.
    pub fn matmul(&self, other: &Tensor<B>) -> Result<Tensor<B>> {
        if self.ndim() != 2 || other.ndim() != 2 {
            // ranks
            return Err(TensaError::ShapeMismatch {
                expected: vec![2, 2],
                got: vec![self.ndim(), other.ndim()],
            });
        }
        let (m, k) = (self.dims()[0], self.dims()[1]);
        let (k2, n) = (other.dims()[0], other.dims()[1]);
        if k != k2 {
            return Err(TensaError::MatmulDimMismatch { m, k1: k, k2, n });
        }

        let out = B::allocate(m * n);
        let one = B::Elem::ONE;
        B::gemm(false, false, m, n, k, one, self.values(), other.values(), B::Elem::ZERO, &out);
        Ok(Tensor::derived(
            [m, n].into(),
            out,
            Context::MatMul {
                lhs: self.clone(),
                rhs: other.clone(),
            },
        ))
    }

    /// Transpose of a 2-d tensor, as a packed copy.
    pub fn transpose(&self) -> Result<Tensor<B>> {
        let shape = self.shape().transposed().ok_or(TensaError::InvalidAxis {
            axis: 1,
            ndim: self.ndim(),
        })?;
        let (rows, cols) = (self.dims()[0], self.dims()[1]);
        let out = B::allocate(self.numel());
        B::transpose(self.values(), rows, cols, &out);
        Ok(Tensor::derived(shape, out, Context::Transpose { source: self.clone() }))
    }
}

// ============================================================================
// Operator overloads (panic on shape errors)
// ============================================================================

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $msg:literal) => {
        impl<B: Backend> std::ops::$trait<&Tensor<B>> for &Tensor<B> {
            type Output = Tensor<B>;

            fn $method(self, rhs: &Tensor<B>) -> Tensor<B> {
                Tensor::$method(self, rhs).expect($msg)
            }
        }

        impl<B: Backend> std::ops::$trait<Tensor<B>> for Tensor<B> {
            type Output = Tensor<B>;

            fn $method(self, rhs: Tensor<B>) -> Tensor<B> {
                Tensor::$method(&self, &rhs).expect($msg)
            }
        }

        impl<B: Backend> std::ops::$trait<&Tensor<B>> for Tensor<B> {
            type Output = Tensor<B>;

            fn $method(self, rhs: &Tensor<B>) -> Tensor<B> {
                Tensor::$method(&self, rhs).expect($msg)
            }
        }

        impl<B: Backend> std::ops::$trait<Tensor<B>> for &Tensor<B> {
            type Output = Tensor<B>;

            fn $method(self, rhs: Tensor<B>) -> Tensor<B> {
                Tensor::$method(self, &rhs).expect($msg)
            }
        }
    };
}

impl_binary_operator!(Add, add, "Add failed");
impl_binary_operator!(Sub, sub, "Sub failed");
impl_binary_operator!(Mul, mul, "Mul failed");
impl_binary_operator!(Div, div, "Div failed");

impl<B: Backend> std::ops::Neg for &Tensor<B> {
    type Output = Tensor<B>;

    fn neg(self) -> Tensor<B> {
        Tensor::neg(self)
    }
}

impl<B: Backend> std::ops::Neg for Tensor<B> {
    type Output = Tensor<B>;

    fn neg(self) -> Tensor<B> {
        Tensor::neg(&self)
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::{CpuF32, CpuF64};
    use crate::context::Context;
    use crate::{ErrorKind, Tensor};
    use approx::assert_relative_eq;

    type T = Tensor<CpuF32>;

    fn t(values: &[f32], shape: &[usize]) -> T {
        T::from_slice(values, shape).unwrap()
    }

    #[test]
    fn test_add_same_shape() {
        let c = &t(&[1.0, 2.0, 3.0], &[3]) + &t(&[10.0, 20.0, 30.0], &[3]);
        assert_eq!(c.to_vec(), vec![11.0, 22.0, 33.0]);
    }

    #[test]
    fn test_sub_mul_div() {
        let a = t(&[6.0, 8.0], &[2]);
        let b = t(&[2.0, 4.0], &[2]);
        assert_eq!((&a - &b).to_vec(), vec![4.0, 4.0]);
        assert_eq!((&a * &b).to_vec(), vec![12.0, 32.0]);
        assert_eq!((a / b).to_vec(), vec![3.0, 2.0]);
    }

    #[test]
    fn test_broadcast_row() {
        let a = t(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);
        let b = t(&[10.0, 20.0], &[2]);
        let c = &a + &b;
        assert_eq!(c.dims(), &[3, 2]);
        assert_eq!(c.to_vec(), vec![11.0, 22.0, 13.0, 24.0, 15.0, 26.0]);
    }

    #[test]
    fn test_broadcast_incompatible() {
        let a = t(&[0.0; 6], &[2, 3]);
        let b = t(&[0.0; 8], &[4, 2]);
        assert_eq!(a.add(&b).unwrap_err().kind(), ErrorKind::ShapeMismatch);
    }

    #[test]
    fn test_no_context_without_grad() {
        let c = &t(&[1.0], &[1]) * &t(&[2.0], &[1]);
        assert!(c.is_leaf());
        assert!(!c.requires_grad());
    }

    #[test]
    fn test_context_records_sources() {
        let a = t(&[1.0], &[1]).with_grad();
        let b = t(&[2.0], &[1]);
        let c = &a * &b;
        assert!(c.requires_grad());
        let ctx = c.context().unwrap();
        assert!(matches!(ctx, Context::Binary { .. }));
        assert!(ctx.sources()[0].ptr_eq(&a));
        assert!(ctx.sources()[1].ptr_eq(&b));
    }

    #[test]
    fn test_unary_values() {
        let x = Tensor::<CpuF64>::from_vec(vec![-1.0, 0.5, 4.0], &[3]).unwrap();
        assert_eq!(x.relu().to_vec(), vec![0.0, 0.5, 4.0]);
        assert_eq!(x.abs().to_vec(), vec![1.0, 0.5, 4.0]);
        assert_eq!(x.square().to_vec(), vec![1.0, 0.25, 16.0]);
        assert_eq!((-&x).to_vec(), vec![1.0, -0.5, -4.0]);
        assert_eq!(x.rdiv_scalar(2.0).to_vec(), vec![-2.0, 4.0, 0.5]);
        assert_relative_eq!(x.tanh().to_vec()[1], 0.5f64.tanh());
        assert_relative_eq!(x.exp().log().to_vec()[2], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_matmul() {
        let a = t(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let b = t(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0], &[3, 2]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.dims(), &[2, 2]);
        assert_eq!(c.to_vec(), vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_dim_mismatch() {
        let a = t(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = t(&[1.0, 2.0, 3.0], &[3, 1]);
        assert!(matches!(
            a.matmul(&b).unwrap_err(),
            crate::TensaError::MatmulDimMismatch { m: 2, k1: 2, k2: 3, n: 1 }
        ));
        assert!(a.matmul(&t(&[1.0, 2.0], &[2])).is_err());
    }

    #[test]
    fn test_transpose_copies() {
        let a = t(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let at = a.transpose().unwrap();
        assert_eq!(at.dims(), &[3, 2]);
        assert_eq!(at.to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert!(!at.shares_values_with(&a));
        assert!(t(&[1.0], &[1]).transpose().is_err());
    }
}
