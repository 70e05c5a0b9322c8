//! Host arrays of arbitrary nesting depth, for [`Tensor::from_nested`].
//!
//! [`Tensor::from_nested`]: crate::Tensor::from_nested

use crate::error::TensaError;
use crate::Result;

/// A scalar, or an array/`Vec` of `NestedArray`s of equal shape.
pub trait NestedArray<E> {
    /// Push this array's dimensions, reading the first element at each level.
    fn collect_dims(&self, dims: &mut Vec<usize>);

    /// Append elements in row-major order, checking every level against `dims`.
    fn flatten_into(&self, dims: &[usize], out: &mut Vec<E>) -> Result<()>;
}

macro_rules! impl_nested_scalar {
    ($($t:ty),*) => {
        $(
            impl NestedArray<$t> for $t {
                fn collect_dims(&self, _dims: &mut Vec<usize>) {}

                fn flatten_into(&self, dims: &[usize], out: &mut Vec<$t>) -> Result<()> {
                    if !dims.is_empty() {
                        return Err(TensaError::ShapeMismatch {
                            expected: dims.to_vec(),
                            got: Vec::new(),
                        });
                    }
                    out.push(*self);
                    Ok(())
                }
            }
        )*
    };
}

impl_nested_scalar!(f32, f64);

fn flatten_level<E, A: NestedArray<E>>(items: &[A], dims: &[usize], out: &mut Vec<E>) -> Result<()> {
    match dims.split_first() {
        Some((&len, rest)) if len == items.len() => {
            for item in items {
                item.flatten_into(rest, out)?;
            }
            Ok(())
        }
        _ => Err(TensaError::ShapeMismatch {
            expected: dims.to_vec(),
            got: vec![items.len()],
        }),
    }
}

fn collect_level<E, A: NestedArray<E>>(items: &[A], dims: &mut Vec<usize>) {
    dims.push(items.len());
    if let Some(first) = items.first() {
        first.collect_dims(dims);
    }
}

impl<E, A: NestedArray<E>, const N: usize> NestedArray<E> for [A; N] {
    fn collect_dims(&self, dims: &mut Vec<usize>) {
        collect_level::<E, A>(self.as_slice(), dims);
    }

    fn flatten_into(&self, dims: &[usize], out: &mut Vec<E>) -> Result<()> {
        flatten_level(self.as_slice(), dims, out)
    }
}

impl<E, A: NestedArray<E>> NestedArray<E> for Vec<A> {
    fn collect_dims(&self, dims: &mut Vec<usize>) {
        collect_level::<E, A>(self.as_slice(), dims);
    }

    fn flatten_into(&self, dims: &[usize], out: &mut Vec<E>) -> Result<()> {
        flatten_level(self.as_slice(), dims, out)
    }
}
