use std::alloc::Layout;
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;
use std::ptr::NonNull;

use allocator_api2::alloc::{AllocError as ContainerAllocError, Allocator, Global};

use crate::{BlockLayout, BlockPool, DEFAULT_BLOCKS_PER_SLAB, Result};

/// An allocator for elements of type `T` that routes single-element allocations through the
/// process-wide [`BlockPool`] of `T`'s size class.
///
/// This is the type to hand to node-based containers (linked lists, trees and the like) that
/// perform many same-size allocations. The slab size is part of the type, so every
/// `PoolAllocator<T, N>` with the same `N` and a compatible `T` shares a pool.
///
/// # Capabilities
///
/// * [`allocate()`][Self::allocate] / [`deallocate()`][Self::deallocate] for `n` elements - a
///   single element comes from the pool, any other count from the system allocator.
/// * [`rebind()`][Self::rebind] for an allocator of another element type with the same slab
///   size. Containers use this to allocate their internal node type instead of the element type.
/// * Equality: two allocators are equal if they route to the same pool. Storage allocated
///   through one allocator may be released through any allocator that is equal to it.
/// * [`Allocator`] from `allocator_api2`, so containers generic over that trait can use the pool
///   for whatever internal types they allocate. Requests that fit into one block are served by
///   the pool, all others by the global allocator.
///
/// The allocator only supplies storage - constructing and destroying elements in that storage is
/// up to the caller, e.g. via [`construct()`][Self::construct] and [`destroy()`][Self::destroy].
///
/// # Example
///
/// ```rust
/// use block_pool::PoolAllocator;
///
/// struct Node {
///     value: u32,
///     next: Option<std::ptr::NonNull<Node>>,
/// }
///
/// let values = PoolAllocator::<u32>::new();
///
/// // A container would rebind the allocator to its node type.
/// let nodes = values.rebind::<Node>();
///
/// let node = nodes.allocate(1).unwrap();
///
/// // SAFETY: The storage is valid for a Node and not yet initialized.
/// unsafe { <PoolAllocator<Node>>::construct(node, Node { value: 42, next: None }) };
///
/// // SAFETY: We just initialized the node.
/// assert_eq!(unsafe { node.as_ref() }.value, 42);
///
/// // SAFETY: The node is initialized and is destroyed and released exactly once.
/// unsafe {
///     <PoolAllocator<Node>>::destroy(node);
///     nodes.deallocate(node, 1);
/// }
/// ```
pub struct PoolAllocator<T, const BLOCKS_PER_SLAB: usize = DEFAULT_BLOCKS_PER_SLAB> {
    pool: BlockPool,

    // The allocator only hands out storage for T, it never owns a T.
    _element: PhantomData<fn() -> T>,
}

impl<T, const BLOCKS_PER_SLAB: usize> PoolAllocator<T, BLOCKS_PER_SLAB> {
    const BLOCKS_PER_SLAB_NZ: NonZero<usize> = NonZero::new(BLOCKS_PER_SLAB)
        .expect("PoolAllocator must have a non-zero number of blocks per slab");

    /// Creates an allocator bound to the shared pool of `T`'s size class.
    ///
    /// # Panics
    ///
    /// Panics if a slab of `BLOCKS_PER_SLAB` blocks for `T` would exceed virtual memory. Use
    /// [`try_new()`][Self::try_new] to handle this as an error instead.
    #[must_use]
    pub fn new() -> Self {
        Self::try_new().expect("slab of BLOCKS_PER_SLAB blocks must fit into virtual memory")
    }

    /// Creates an allocator bound to the shared pool of `T`'s size class.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::LayoutOverflow`][crate::AllocError::LayoutOverflow] if a slab of
    /// `BLOCKS_PER_SLAB` blocks for `T` would exceed virtual memory.
    pub fn try_new() -> Result<Self> {
        BlockPool::shared_for::<T>(Self::BLOCKS_PER_SLAB_NZ).map(Self::with_pool)
    }

    fn with_pool(pool: BlockPool) -> Self {
        Self {
            pool,
            _element: PhantomData,
        }
    }

    /// The pool that single-element allocations are served from.
    #[must_use]
    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }

    /// Allocates uninitialized storage for `n` elements.
    ///
    /// For `n == 1` the storage is a block from the pool, otherwise it is a separate allocation
    /// from the system allocator. For `n == 0` the result is dangling but well aligned.
    ///
    /// # Errors
    ///
    /// Returns an error if the system allocator cannot supply the memory.
    pub fn allocate(&self, n: usize) -> Result<NonNull<T>> {
        self.pool.allocate(n).map(NonNull::cast)
    }

    /// Releases storage for `n` elements.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was returned by `allocate(n)` with the same `n` on
    /// an allocator equal to this one, and has not been released since. Any element in the
    /// storage must already have been destroyed or moved out.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>, n: usize) {
        // SAFETY: Forwarding guarantees from the caller. Equal allocators share the pool.
        unsafe { self.pool.deallocate(ptr.cast(), n) }
    }

    /// Moves `value` into uninitialized storage.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` is valid for writes of `T` and properly aligned.
    /// Any previous value in the storage is overwritten without being dropped.
    pub unsafe fn construct(ptr: NonNull<T>, value: T) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe { ptr.write(value) }
    }

    /// Drops the element in the storage, leaving the storage uninitialized.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` points to an initialized `T` that is not used again
    /// until a new value is constructed in its place.
    pub unsafe fn destroy(ptr: NonNull<T>) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe { ptr.drop_in_place() }
    }

    /// Returns an allocator for elements of type `U` with the same slab size.
    ///
    /// The new allocator routes to the shared pool of `U`'s size class. If `U` is in the same
    /// size class as `T`, this is the same pool and the allocators compare equal. Either way, the
    /// result is equal to any other `PoolAllocator<U, BLOCKS_PER_SLAB>`.
    ///
    /// # Panics
    ///
    /// Panics if a slab of `BLOCKS_PER_SLAB` blocks for `U` would exceed virtual memory.
    #[must_use]
    pub fn rebind<U>(&self) -> PoolAllocator<U, BLOCKS_PER_SLAB> {
        if BlockLayout::of::<U>() == self.pool.block_layout() {
            PoolAllocator::with_pool(self.pool.clone())
        } else {
            PoolAllocator::new()
        }
    }
}

impl<T, const BLOCKS_PER_SLAB: usize> Default for PoolAllocator<T, BLOCKS_PER_SLAB> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const BLOCKS_PER_SLAB: usize> Clone for PoolAllocator<T, BLOCKS_PER_SLAB> {
    fn clone(&self) -> Self {
        Self::with_pool(self.pool.clone())
    }
}

impl<T, const BLOCKS_PER_SLAB: usize> fmt::Debug for PoolAllocator<T, BLOCKS_PER_SLAB> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("block_layout", &self.pool.block_layout())
            .field("blocks_per_slab", &BLOCKS_PER_SLAB)
            .finish_non_exhaustive()
    }
}

impl<T, U, const BLOCKS_PER_SLAB: usize> PartialEq<PoolAllocator<U, BLOCKS_PER_SLAB>>
    for PoolAllocator<T, BLOCKS_PER_SLAB>
{
    fn eq(&self, other: &PoolAllocator<U, BLOCKS_PER_SLAB>) -> bool {
        self.pool.ptr_eq(&other.pool)
    }
}

impl<T, const BLOCKS_PER_SLAB: usize> Eq for PoolAllocator<T, BLOCKS_PER_SLAB> {}

// SAFETY: Blocks stay valid until released or until the pool is dropped, and every clone of the
// allocator keeps the pool alive. Clones share the pool, so storage from one clone can be
// released through another. Dispatch between pool and global allocator only depends on the
// layout, which the caller must repeat exactly on release, so release reaches the same backend.
unsafe impl<T, const BLOCKS_PER_SLAB: usize> Allocator for PoolAllocator<T, BLOCKS_PER_SLAB> {
    #[inline]
    fn allocate(&self, layout: Layout) -> std::result::Result<NonNull<[u8]>, ContainerAllocError> {
        let block_layout = self.pool.block_layout();

        if !block_layout.fits(layout) {
            return Global.allocate(layout);
        }

        match self.pool.allocate(1) {
            Ok(block) => Ok(NonNull::slice_from_raw_parts(block, block_layout.size())),
            Err(_) => Err(ContainerAllocError),
        }
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if self.pool.block_layout().fits(layout) {
            // SAFETY: The layout fits a block, so this storage came from the pool (which is shared
            // by every allocator the storage may have come from). The caller guarantees it is
            // currently allocated.
            unsafe { self.pool.deallocate(ptr, 1) }
        } else {
            // SAFETY: The layout does not fit a block, so the storage came from the global
            // allocator with this same layout.
            unsafe { Global.deallocate(ptr, layout) }
        }
    }
}
