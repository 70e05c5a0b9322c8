//! Reductions. Reduced axes are always dropped from the result shape.

use smallvec::SmallVec;
use tensa_kernels::Element;

use crate::backend::Backend;
use crate::context::Context;
use crate::error::TensaError;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::Result;

impl<B: Backend> Tensor<B> {
    /// Sum of all elements, as a scalar tensor.
    pub fn sum(&self) -> Tensor<B> {
        let total = B::sum(self.values());
        Tensor::derived(
            Shape::scalar(),
            B::from_host(vec![total]),
            Context::Sum { source: self.clone() },
        )
    }

    /// Mean of all elements, as a scalar tensor. NaN for an empty tensor.
    pub fn mean(&self) -> Tensor<B> {
        let total = B::sum(self.values());
        let mean = total / B::Elem::from_f64(self.numel() as f64);
        Tensor::derived(
            Shape::scalar(),
            B::from_host(vec![mean]),
            Context::Mean { source: self.clone() },
        )
    }

    /// Sum over one axis, dropping it.
    pub fn sum_axis(&self, axis: usize) -> Result<Tensor<B>> {
        self.sum_axes(&[axis])
    }

    /// Sum over several axes, dropping all of them. Repeated axes count once.
    pub fn sum_axes(&self, axes: &[usize]) -> Result<Tensor<B>> {
        let mut axes: SmallVec<[usize; 4]> = SmallVec::from_slice(axes);
        axes.sort_unstable();
        axes.dedup();
        for &axis in &axes {
            self.shape().check_axis(axis)?;
        }

        let shape = self.shape().without_axes(&axes);
        let out = B::allocate(shape.numel());
        B::reduce_sum(self.values(), self.shape(), &axes, &out);
        Ok(Tensor::derived(
            shape,
            out,
            Context::SumAxes {
                source: self.clone(),
                axes,
            },
        ))
    }

    /// Flat index and value of the first maximum. Not differentiable.
    pub fn argmax(&self) -> Result<(usize, B::Elem)> {
        B::argmax(self.values()).ok_or(TensaError::IndexOutOfBounds {
            axis: 0,
            index: 0,
            size: 0,
        })
    }
}
