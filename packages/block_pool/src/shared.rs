use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{BlockLayout, RawBlockPool, Result, SizeClass, shared_pool};

/// A thread-safe handle to a block pool.
///
/// The handle acts like an `Arc` - any clones of it refer to the same pool. The pool is
/// dropped (releasing all of its memory) when the last handle to it is dropped.
///
/// Handles are obtained in one of two ways:
///
/// * [`BlockPool::shared_for()`] and [`BlockPool::shared_for_layout()`] return the process-wide
///   pool of a size class, creating it if no handle to it currently exists. Every caller asking
///   for the same size class while the pool is alive gets a handle to the same pool, so blocks
///   can be allocated through one handle and released through another.
/// * [`BlockPoolBuilder::build_shared()`][crate::BlockPoolBuilder::build_shared] creates a
///   private pool that is not visible to anyone else.
///
/// # Example
///
/// ```rust
/// use block_pool::{BlockPool, DEFAULT_BLOCKS_PER_SLAB};
/// use std::num::NonZero;
///
/// let per_slab = NonZero::new(DEFAULT_BLOCKS_PER_SLAB).unwrap();
///
/// let a = BlockPool::shared_for::<u64>(per_slab).unwrap();
/// let b = BlockPool::shared_for::<i64>(per_slab).unwrap();
///
/// // u64 and i64 have the same layout, so they are served by the same pool.
/// assert!(a.ptr_eq(&b));
///
/// let block = a.allocate(1).unwrap();
///
/// // SAFETY: The block came from the same pool with the same count.
/// unsafe { b.deallocate(block, 1) };
/// ```
#[derive(Clone, Debug)]
pub struct BlockPool {
    inner: Arc<PoolCore>,
}

/// The shared part of a [`BlockPool`]. The configuration is kept outside the lock, as it never
/// changes after creation.
#[derive(Debug)]
pub(crate) struct PoolCore {
    block_layout: BlockLayout,
    blocks_per_slab: NonZero<usize>,
    pool: Mutex<RawBlockPool>,
}

impl PoolCore {
    pub(crate) fn new(pool: RawBlockPool) -> Self {
        Self {
            block_layout: pool.block_layout(),
            blocks_per_slab: pool.blocks_per_slab(),
            pool: Mutex::new(pool),
        }
    }
}

impl BlockPool {
    pub(crate) fn from_core(inner: Arc<PoolCore>) -> Self {
        Self { inner }
    }

    /// Returns the process-wide pool for elements of type `T`, with slabs of
    /// `blocks_per_slab` blocks.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::LayoutOverflow`][crate::AllocError::LayoutOverflow] if a slab of
    /// the requested size would not fit into virtual memory.
    pub fn shared_for<T>(blocks_per_slab: NonZero<usize>) -> Result<Self> {
        Self::shared_for_layout(Layout::new::<T>(), blocks_per_slab)
    }

    /// Returns the process-wide pool for elements with the given layout, with slabs of
    /// `blocks_per_slab` blocks.
    ///
    /// Element layouts that normalize to the same [`BlockLayout`] share a pool.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::LayoutOverflow`][crate::AllocError::LayoutOverflow] if a block
    /// for this element layout or a slab of the requested size would not fit into virtual
    /// memory.
    pub fn shared_for_layout(layout: Layout, blocks_per_slab: NonZero<usize>) -> Result<Self> {
        let block_layout = BlockLayout::try_for_layout(layout)?;

        shared_pool(SizeClass::new(block_layout, blocks_per_slab)).map(Self::from_core)
    }

    /// The layout of every block in the pool.
    #[must_use]
    pub fn block_layout(&self) -> BlockLayout {
        self.inner.block_layout
    }

    /// The number of blocks acquired with every slab.
    #[must_use]
    pub fn blocks_per_slab(&self) -> NonZero<usize> {
        self.inner.blocks_per_slab
    }

    /// The number of single blocks currently allocated from the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.pool.lock().len()
    }

    /// Whether no single blocks are currently allocated from the pool.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.pool.lock().is_empty()
    }

    /// The number of blocks the pool holds in its slabs, whether allocated or free.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.pool.lock().capacity()
    }

    /// The number of slabs the pool has acquired from the system allocator.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.inner.pool.lock().slab_count()
    }

    /// Allocates storage for `count` blocks. See [`RawBlockPool::allocate()`].
    ///
    /// # Errors
    ///
    /// Returns an error if the system allocator cannot supply the memory.
    pub fn allocate(&self, count: usize) -> Result<NonNull<u8>> {
        self.inner.pool.lock().allocate(count)
    }

    /// Releases storage previously obtained from [`allocate()`][Self::allocate] on this pool,
    /// through this or any other handle to the same pool.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was returned by `allocate()` on the same pool with
    /// the same `count` and has not been released since. The storage must not be accessed after
    /// this call.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, count: usize) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe { self.inner.pool.lock().deallocate(ptr, count) }
    }

    /// Whether both handles refer to the same pool.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        self.inner.pool.lock().integrity_check();
    }
}

impl From<RawBlockPool> for BlockPool {
    fn from(pool: RawBlockPool) -> Self {
        Self::from_core(Arc::new(PoolCore::new(pool)))
    }
}
