//! Reference-counted element buffers.
//!
//! A [`Buffer`] is a handle onto shared storage plus an `(offset, len)`
//! window. The handle that allocated the storage is tagged
//! [`BufferKind::Owned`]; every handle derived from it through
//! [`Buffer::view`] or [`Buffer::advanced`] is a [`BufferKind::View`] over the
//! same [`BufferId`]. Storage is released when the last handle drops.
//!
//! Buffers never know their shape. Callers pass it alongside on every call.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tensa_kernels::{DType, Element};

use crate::error::TensaError;
use crate::Result;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of one allocation, shared by all handles onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// Ownership tag of a [`Buffer`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// The handle that allocated the storage.
    Owned,
    /// A window derived from another handle.
    View,
}

struct RawStorage<E> {
    id: BufferId,
    /// Bumped on every write access.
    version: AtomicU64,
    data: RwLock<Vec<E>>,
}

/// Handle onto a window of shared element storage.
pub struct Buffer<E: Element> {
    storage: Arc<RawStorage<E>>,
    offset: usize,
    len: usize,
    kind: BufferKind,
}

impl<E: Element> Clone for Buffer<E> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            offset: self.offset,
            len: self.len,
            kind: self.kind,
        }
    }
}

/// Read access that never holds a lock on a destination's storage.
///
/// See [`Buffer::read_for`].
pub enum ReadView<'a, E> {
    Locked(MappedRwLockReadGuard<'a, [E]>),
    Snapshot(Vec<E>),
}

impl<E> Deref for ReadView<'_, E> {
    type Target = [E];

    fn deref(&self) -> &[E] {
        match self {
            ReadView::Locked(guard) => &**guard,
            ReadView::Snapshot(data) => data.as_slice(),
        }
    }
}

impl<E: Element> Buffer<E> {
    /// Allocate `len` zeroed elements.
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![E::ZERO; len])
    }

    /// Allocate `len` copies of `value`.
    pub fn full(len: usize, value: E) -> Self {
        Self::from_vec(vec![value; len])
    }

    /// Take ownership of `data` as a new allocation.
    pub fn from_vec(data: Vec<E>) -> Self {
        let len = data.len();
        Self {
            storage: Arc::new(RawStorage {
                id: BufferId::next(),
                version: AtomicU64::new(0),
                data: RwLock::new(data),
            }),
            offset: 0,
            len,
            kind: BufferKind::Owned,
        }
    }

    /// Identity of the underlying allocation.
    pub fn id(&self) -> BufferId {
        self.storage.id
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn is_view(&self) -> bool {
        self.kind == BufferKind::View
    }

    /// Element offset of this window into the underlying storage.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of elements in this window.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dtype(&self) -> DType {
        E::DTYPE
    }

    /// Write counter of the underlying allocation, shared by every handle
    /// onto it. Operation records compare it to detect in-place edits.
    pub fn version(&self) -> u64 {
        self.storage.version.load(Ordering::Acquire)
    }

    /// Whether both handles address the same allocation.
    pub fn same_storage(&self, other: &Buffer<E>) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Number of live handles onto this allocation.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.storage)
    }

    /// A non-owning handle onto the same window.
    pub fn view(&self) -> Self {
        Self {
            kind: BufferKind::View,
            ..self.clone()
        }
    }

    /// A non-owning handle onto `len` elements starting `offset` into this window.
    pub fn advanced(&self, offset: usize, len: usize) -> Result<Self> {
        let end = offset.checked_add(len).filter(|&end| end <= self.len);
        if end.is_none() {
            return Err(TensaError::IndexOutOfBounds {
                axis: 0,
                index: offset.saturating_add(len) as isize,
                size: self.len,
            });
        }
        Ok(Self {
            storage: Arc::clone(&self.storage),
            offset: self.offset + offset,
            len,
            kind: BufferKind::View,
        })
    }

    /// Shared read access to this window.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [E]> {
        let (start, end) = (self.offset, self.offset + self.len);
        RwLockReadGuard::map(self.storage.data.read_recursive(), |v| &v[start..end])
    }

    /// Exclusive write access to this window.
    ///
    /// Locks the whole allocation: no other guard onto the same storage may
    /// be alive on this thread.
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [E]> {
        let (start, end) = (self.offset, self.offset + self.len);
        self.storage.version.fetch_add(1, Ordering::AcqRel);
        RwLockWriteGuard::map(self.storage.data.write(), |v| &mut v[start..end])
    }

    /// Read this buffer in preparation for writing `dst`.
    ///
    /// Takes a snapshot instead of a lock when both share storage, so that
    /// `dst.write()` can be taken while the returned view is alive.
    pub fn read_for(&self, dst: &Buffer<E>) -> ReadView<'_, E> {
        if self.same_storage(dst) {
            ReadView::Snapshot(self.to_vec())
        } else {
            ReadView::Locked(self.read())
        }
    }

    /// Element `index` of this window.
    pub fn get(&self, index: usize) -> Result<E> {
        self.check_index(index)?;
        Ok(self.read()[index])
    }

    /// Overwrite element `index` of this window.
    pub fn set(&self, index: usize, value: E) -> Result<()> {
        self.check_index(index)?;
        self.write()[index] = value;
        Ok(())
    }

    /// The value of a single-element buffer.
    pub fn item(&self) -> Result<E> {
        if self.len != 1 {
            return Err(TensaError::ShapeMismatch {
                expected: vec![1],
                got: vec![self.len],
            });
        }
        Ok(self.read()[0])
    }

    /// Set every element of this window.
    pub fn fill(&self, value: E) {
        self.write().fill(value);
    }

    /// Copy the first `n` elements of `src` into the start of this window.
    pub fn copy_from(&self, src: &Buffer<E>, n: usize) -> Result<()> {
        if n > self.len || n > src.len {
            return Err(TensaError::IndexOutOfBounds {
                axis: 0,
                index: n as isize,
                size: self.len.min(src.len),
            });
        }
        let src = src.read_for(self);
        self.write()[..n].copy_from_slice(&src[..n]);
        Ok(())
    }

    /// Host copy of this window.
    pub fn to_vec(&self) -> Vec<E> {
        self.read().to_vec()
    }

    /// Native-endian bytes of this window, for external serializers.
    pub fn to_bytes(&self) -> Vec<u8> {
        let data = self.read();
        bytemuck::cast_slice::<E, u8>(&data).to_vec()
    }

    /// Release this handle. The storage goes away with its last handle.
    pub fn free(self) {
        drop(self);
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.len {
            Ok(())
        } else {
            Err(TensaError::IndexOutOfBounds {
                axis: 0,
                index: index as isize,
                size: self.len,
            })
        }
    }
}

impl<E: Element> fmt::Debug for Buffer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.storage.id)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("kind", &self.kind)
            .finish()
    }
}
