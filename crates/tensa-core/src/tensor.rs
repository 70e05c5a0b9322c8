use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use smallvec::SmallVec;
use tensa_kernels::{DType, Element};

use crate::autograd;
use crate::backend::{Backend, CpuF32};
use crate::context::Context;
use crate::device::Device;
use crate::error::TensaError;
use crate::nested::NestedArray;
use crate::shape::Shape;
use crate::storage::Buffer;
use crate::Result;

static NEXT_TENSOR_ID: AtomicUsize = AtomicUsize::new(0);

/// Process-unique tensor identity, used as the visited marker of the
/// backward traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(usize);

impl TensorId {
    fn next() -> Self {
        TensorId(NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct TensorInner<B: Backend> {
    id: TensorId,
    shape: Shape,
    values: Buffer<B::Elem>,
    gradient: Option<Buffer<B::Elem>>,
    parent: Option<Weak<TensorInner<B>>>,
    context: Option<Context<B>>,
    /// Storage versions of the sources' values and of `values`, taken when
    /// `context` was recorded.
    saved_versions: SmallVec<[u64; 3]>,
    tag: RwLock<Option<String>>,
}

impl<B: Backend> Drop for TensorInner<B> {
    // Unlink the graph iteratively; a long chain of records would otherwise
    // drop recursively, one frame per node.
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        let mut pending = context.into_sources();
        while let Some(tensor) = pending.pop() {
            if let Ok(mut inner) = Arc::try_unwrap(tensor.inner) {
                if let Some(context) = inner.context.take() {
                    pending.extend(context.into_sources());
                }
            }
        }
    }
}

fn recorded_versions<B: Backend>(context: &Context<B>, values: &Buffer<B::Elem>) -> SmallVec<[u64; 3]> {
    context
        .sources()
        .iter()
        .map(|s| s.values().version())
        .chain(std::iter::once(values.version()))
        .collect()
}

/// A shaped array of `B::Elem` living on backend `B`, plus its place in the
/// autograd graph.
///
/// `Tensor` is a cheap handle: cloning shares the node. Values are always
/// packed row-major; views share a window of their source's buffer.
///
/// A tensor requires gradients iff it has a gradient buffer. Derived tensors
/// get one (and keep their [`Context`]) iff gradient recording is enabled
/// and any source requires gradients.
///
/// # Examples
///
/// ```
/// use tensa_core::Tensor;
///
/// let a: Tensor = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap().with_grad();
/// let y = (&a * &a).sum();
/// y.backward().unwrap();
/// assert_eq!(a.grad_vec().unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
/// ```
pub struct Tensor<B: Backend = CpuF32> {
    inner: Arc<TensorInner<B>>,
}

impl<B: Backend> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> Tensor<B> {
    // =========================================================================
    // Constructors
    // =========================================================================

    fn build(
        shape: Shape,
        values: Buffer<B::Elem>,
        gradient: Option<Buffer<B::Elem>>,
        parent: Option<Weak<TensorInner<B>>>,
        context: Option<Context<B>>,
    ) -> Self {
        debug_assert_eq!(values.len(), shape.numel());
        let saved_versions = context
            .as_ref()
            .map(|ctx| recorded_versions(ctx, &values))
            .unwrap_or_default();
        Self {
            inner: Arc::new(TensorInner {
                id: TensorId::next(),
                shape,
                values,
                gradient,
                parent,
                context,
                saved_versions,
                tag: RwLock::new(None),
            }),
        }
    }

    fn leaf(shape: Shape, values: Buffer<B::Elem>, requires_grad: bool) -> Self {
        let gradient = requires_grad.then(|| B::allocate(shape.numel()));
        Self::build(shape, values, gradient, None, None)
    }

    /// Leaf tensor from packed row-major values.
    pub fn from_vec(values: Vec<B::Elem>, shape: &[usize]) -> Result<Self> {
        let shape = Shape::new(shape);
        if values.len() != shape.numel() {
            return Err(TensaError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![values.len()],
            });
        }
        Ok(Self::leaf(shape, B::from_host(values), false))
    }

    /// Like [`Tensor::from_vec`], copying from a borrowed slice.
    pub fn from_slice(values: &[B::Elem], shape: &[usize]) -> Result<Self> {
        Self::from_vec(values.to_vec(), shape)
    }

    /// Leaf tensor from a (possibly nested) host array such as `[[1.0, 2.0], [3.0, 4.0]]`.
    ///
    /// Ragged input fails with `ShapeMismatch`.
    pub fn from_nested<A: NestedArray<B::Elem>>(array: A) -> Result<Self> {
        let mut dims = Vec::new();
        array.collect_dims(&mut dims);
        let mut values = Vec::with_capacity(dims.iter().product());
        array.flatten_into(&dims, &mut values)?;
        Self::from_vec(values, &dims)
    }

    /// Leaf tensor with every element set to `value`.
    pub fn full(shape: &[usize], value: B::Elem) -> Self {
        let shape = Shape::new(shape);
        let values = B::from_host(vec![value; shape.numel()]);
        Self::leaf(shape, values, false)
    }

    /// Leaf tensor of zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        let shape = Shape::new(shape);
        let values = B::allocate(shape.numel());
        Self::leaf(shape, values, false)
    }

    /// Leaf tensor of ones.
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, B::Elem::ONE)
    }

    /// Zero-dimensional leaf holding `value`.
    pub fn scalar(value: B::Elem) -> Self {
        Self::full(&[], value)
    }

    /// This tensor as a leaf that requires gradients.
    pub fn with_grad(mut self) -> Self {
        self.set_requires_grad(true);
        self
    }

    /// Turn this handle into a leaf with (or without) a fresh zeroed gradient.
    ///
    /// Values are shared with the previous node. A leaf that already has the
    /// requested state is left untouched.
    pub fn set_requires_grad(&mut self, requires_grad: bool) {
        if self.is_leaf() && self.requires_grad() == requires_grad {
            return;
        }
        *self = Self::leaf(self.shape().clone(), self.values().clone(), requires_grad);
    }

    /// Result of an operation: tracks gradients iff recording is enabled and
    /// any source tracks them.
    pub(crate) fn derived(shape: Shape, values: Buffer<B::Elem>, context: Context<B>) -> Self {
        let tracks = Self::should_track(&context);
        let gradient = tracks.then(|| B::allocate(shape.numel()));
        Self::build(shape, values, gradient, None, tracks.then_some(context))
    }

    /// Like [`Tensor::derived`] for a result that may alias `source`.
    ///
    /// When `values` is a view of `source`'s values, `gradient_view` should be
    /// the matching view of `source`'s gradient so both accumulate in place.
    pub(crate) fn derived_view(
        source: &Tensor<B>,
        shape: Shape,
        values: Buffer<B::Elem>,
        gradient_view: Option<Buffer<B::Elem>>,
        context: Context<B>,
    ) -> Self {
        let tracks = Self::should_track(&context);
        let gradient = if tracks {
            Some(gradient_view.unwrap_or_else(|| B::allocate(shape.numel())))
        } else {
            None
        };
        let parent = values.same_storage(source.values()).then(|| Arc::downgrade(&source.inner));
        Self::build(shape, values, gradient, parent, tracks.then_some(context))
    }

    fn should_track(context: &Context<B>) -> bool {
        autograd::is_grad_enabled() && context.sources().iter().any(|s| s.requires_grad())
    }

    /// Fails with `NotImplemented` if storage read by this tensor's gradient
    /// rule was written after the rule was recorded, through any handle.
    pub(crate) fn check_saved_versions(&self) -> Result<()> {
        let Some(ctx) = self.context() else {
            return Ok(());
        };
        if recorded_versions(ctx, self.values()) != self.inner.saved_versions {
            return Err(TensaError::NotImplemented(format!(
                "backward through `{}` after its inputs were modified in place",
                ctx
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Identity of this graph node, shared by all its handles.
    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    /// Logical shape.
    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    /// Dimension sizes, outermost first.
    pub fn dims(&self) -> &[usize] {
        self.inner.shape.dims()
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.inner.shape.ndim()
    }

    /// Total element count; 1 for a scalar.
    pub fn numel(&self) -> usize {
        self.inner.shape.numel()
    }

    /// Element type descriptor of the backend.
    pub fn dtype(&self) -> DType {
        B::Elem::DTYPE
    }

    /// Device the values live on.
    pub fn device(&self) -> Device {
        B::DEVICE
    }

    /// Packed row-major values. For a view this is a window onto the
    /// source's storage.
    pub fn values(&self) -> &Buffer<B::Elem> {
        &self.inner.values
    }

    /// Accumulated gradient buffer, present iff this tensor requires gradients.
    pub fn gradient(&self) -> Option<&Buffer<B::Elem>> {
        self.inner.gradient.as_ref()
    }

    /// Whether backward passes accumulate into this tensor.
    pub fn requires_grad(&self) -> bool {
        self.inner.gradient.is_some()
    }

    /// Record of the operation that produced this tensor, if it was tracked.
    pub fn context(&self) -> Option<&Context<B>> {
        self.inner.context.as_ref()
    }

    /// No operation record: an input, a parameter or a detached tensor.
    pub fn is_leaf(&self) -> bool {
        self.inner.context.is_none()
    }

    /// The tensor this one is a view of, while it is still alive.
    pub fn parent(&self) -> Option<Tensor<B>> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Tensor { inner })
    }

    /// Whether the values of both tensors live in the same allocation.
    pub fn shares_values_with(&self, other: &Tensor<B>) -> bool {
        self.values().same_storage(other.values())
    }

    /// Whether both handles are the same node.
    pub fn ptr_eq(&self, other: &Tensor<B>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Debug label, if one was set.
    pub fn tag(&self) -> Option<String> {
        self.inner.tag.read().clone()
    }

    /// Attach a debug label shown by `Debug`. Visible through every handle.
    pub fn set_tag(&self, tag: impl Into<String>) {
        *self.inner.tag.write() = Some(tag.into());
    }

    /// Builder form of [`Tensor::set_tag`].
    pub fn with_tag(self, tag: impl Into<String>) -> Self {
        self.set_tag(tag);
        self
    }

    // =========================================================================
    // Data access
    // =========================================================================

    /// Host copy of the values, row-major.
    pub fn to_vec(&self) -> Vec<B::Elem> {
        self.values().to_vec()
    }

    /// The value of a single-element tensor.
    pub fn item(&self) -> Result<B::Elem> {
        self.values().item()
    }

    /// Element at a full coordinate.
    pub fn at(&self, index: &[usize]) -> Result<B::Elem> {
        if index.len() != self.ndim() {
            return Err(TensaError::ShapeMismatch {
                expected: self.dims().to_vec(),
                got: index.to_vec(),
            });
        }
        let mut flat = 0;
        for (axis, ((&i, &size), stride)) in index
            .iter()
            .zip(self.dims())
            .zip(self.shape().contiguous_strides())
            .enumerate()
        {
            if i >= size {
                return Err(TensaError::IndexOutOfBounds {
                    axis,
                    index: i as isize,
                    size,
                });
            }
            flat += i * stride;
        }
        self.values().get(flat)
    }

    // =========================================================================
    // Gradients
    // =========================================================================

    /// Detached copy of the accumulated gradient.
    pub fn grad(&self) -> Option<Tensor<B>> {
        self.gradient()
            .map(|g| Self::leaf(self.shape().clone(), B::from_host(g.to_vec()), false))
    }

    /// Host copy of the accumulated gradient.
    pub fn grad_vec(&self) -> Option<Vec<B::Elem>> {
        self.gradient().map(Buffer::to_vec)
    }

    /// Reset the accumulated gradient to zero.
    pub fn zero_grad(&self) {
        if let Some(g) = self.gradient() {
            B::fill(g, B::Elem::ZERO);
        }
    }

    /// Seed this tensor's gradient with ones and propagate to every tensor it
    /// was derived from.
    ///
    /// The seed is added when the gradient belongs to a leaf or aliases
    /// another tensor's (a view), so leaf gradients keep accumulating across
    /// calls. Fails with `NotImplemented` if any recorded input was written
    /// in place since it was recorded.
    pub fn backward(&self) -> Result<()> {
        autograd::backward(self, None)
    }

    /// Like [`Tensor::backward`] with a caller-supplied seed of the same shape.
    pub fn backward_with(&self, upstream: &Tensor<B>) -> Result<()> {
        autograd::backward(self, Some(upstream))
    }

    /// Leaves requiring gradients that this tensor was derived from.
    pub fn parameters(&self) -> Vec<Tensor<B>> {
        autograd::parameters(self)
    }

    /// A leaf sharing this tensor's values, outside the graph.
    pub fn detach(&self) -> Tensor<B> {
        Self::build(
            self.shape().clone(),
            self.values().view(),
            None,
            Some(Arc::downgrade(&self.inner)),
            None,
        )
    }
}

impl<B: Backend> fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, device={}, requires_grad={}",
            self.shape(),
            self.dtype(),
            self.device(),
            self.requires_grad()
        )?;
        if let Some(ctx) = self.context() {
            write!(f, ", op={ctx}")?;
        }
        if let Some(tag) = self.tag() {
            write!(f, ", tag={tag:?}")?;
        }
        write!(f, ")")
    }
}
