use thiserror::Error;

/// Coarse classification of [`TensaError`] variants.
///
/// Every error is a contract violation in how the caller built the graph;
/// none of them is transient or worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ShapeMismatch,
    IndexOutOfBounds,
    AmbiguousShape,
    NotImplemented,
    GradientNotTracked,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensaError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("shapes {a:?} and {b:?} are not broadcast-compatible")]
    BroadcastError { a: Vec<usize>, b: Vec<usize> },

    #[error("matmul dimension mismatch: [{m}, {k1}] @ [{k2}, {n}]")]
    MatmulDimMismatch { m: usize, k1: usize, k2: usize, n: usize },

    #[error("cannot view {numel} elements as {shape:?}")]
    InvalidReshape { numel: usize, shape: Vec<isize> },

    #[error("axis {axis} is out of range for a {ndim}-d tensor")]
    InvalidAxis { axis: usize, ndim: usize },

    #[error("index {index} is out of bounds for axis {axis} of size {size}")]
    IndexOutOfBounds { axis: usize, index: isize, size: usize },

    #[error("more than one inferred (-1) dimension in {shape:?}")]
    AmbiguousShape { shape: Vec<isize> },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("backward() called on a tensor that does not track gradients")]
    GradientNotTracked,
}

impl TensaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TensaError::ShapeMismatch { .. }
            | TensaError::BroadcastError { .. }
            | TensaError::MatmulDimMismatch { .. }
            | TensaError::InvalidReshape { .. } => ErrorKind::ShapeMismatch,
            TensaError::InvalidAxis { .. } | TensaError::IndexOutOfBounds { .. } => {
                ErrorKind::IndexOutOfBounds
            }
            TensaError::AmbiguousShape { .. } => ErrorKind::AmbiguousShape,
            TensaError::NotImplemented(_) => ErrorKind::NotImplemented,
            TensaError::GradientNotTracked => ErrorKind::GradientNotTracked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_error_is_shape_mismatch() {
        let err = TensaError::BroadcastError { a: vec![2, 3], b: vec![4, 3] };
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
        assert_eq!(err.to_string(), "shapes [2, 3] and [4, 3] are not broadcast-compatible");
    }

    #[test]
    fn test_axis_errors_are_out_of_bounds() {
        assert_eq!(TensaError::InvalidAxis { axis: 3, ndim: 2 }.kind(), ErrorKind::IndexOutOfBounds);
    }
}
