//! # tensa-core
//!
//! Tensors with reverse-mode automatic differentiation.
//!
//! Provides:
//! - [`Buffer`]: reference-counted element storage with owned/view handles
//! - [`Backend`]: memory manager and kernel dispatch per (element, device),
//!   with [`Cpu`] as the host implementation
//! - [`Tensor`]: a shaped value, its optional gradient and the record of the
//!   operation that produced it
//! - [`autograd`]: the backward pass and [`NoGradGuard`]
//!
//! ```
//! use tensa_core::{CpuF64, Tensor};
//!
//! let a = Tensor::<CpuF64>::from_nested([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]).unwrap().with_grad();
//! let b = Tensor::<CpuF64>::from_nested([10.0, 20.0]).unwrap().with_grad();
//! let c = (&a + &b).sum();
//! c.backward().unwrap();
//! assert_eq!(a.grad_vec().unwrap(), vec![1.0; 6]);
//! assert_eq!(b.grad_vec().unwrap(), vec![3.0, 3.0]);
//! ```

pub mod autograd;
pub mod backend;
pub mod context;
pub mod device;
pub mod error;
pub mod nested;
pub mod ops;
pub mod prelude;
pub mod shape;
pub mod slice;
pub mod storage;
pub mod tensor;

pub use autograd::{is_grad_enabled, NoGradGuard};
pub use backend::{Backend, Cpu, CpuF32, CpuF64, Slice};
pub use context::Context;
pub use device::Device;
pub use error::{ErrorKind, TensaError};
pub use nested::NestedArray;
pub use shape::Shape;
pub use slice::{SliceArg, SliceItem};
pub use storage::{Buffer, BufferId, BufferKind};
pub use tensor::{Tensor, TensorId};

pub use tensa_kernels::{Binary, DType, Element, KernelConfig, Operand, SimdCapability, Unary};

pub type Result<T> = std::result::Result<T, TensaError>;
