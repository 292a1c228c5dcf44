use std::alloc::{Layout, alloc, dealloc};
use std::num::NonZero;
use std::ptr::{self, NonNull};
use std::thread;

use tracing::{debug, trace, warn};

use crate::{AllocError, BlockLayout, BlockPoolBuilder, DropPolicy, FreeList, Result, Slab};

/// A pool of fixed-size memory blocks of unbounded capacity.
///
/// The pool acquires memory from the system allocator in slabs of [`blocks_per_slab()`][1]
/// blocks and hands out single blocks from them. Released blocks go onto a free list that is
/// threaded through the released blocks themselves, so both allocation and release of a single
/// block are O(1). Acquiring a new slab is O(1) amortized over the blocks in the slab.
///
/// Every block is in exactly one of three states:
///
/// * free, on the free list (previously allocated and then released);
/// * free, in the never-touched remainder of the most recently acquired slab;
/// * allocated, owned by the caller until released.
///
/// Allocation prefers the free list (most recently released block first), then the untouched
/// remainder of the newest slab, and only acquires a new slab when both are exhausted.
///
/// # Resource usage
///
/// The pool only ever grows. Slabs are never returned to the system allocator before the pool
/// itself is dropped, at which point all of them are released at once. Dropping the pool never
/// runs any destructors - the pool only deals in raw storage.
///
/// # Contract
///
/// Releasing a block that was not allocated from this pool, releasing it twice or releasing it
/// with a different count than it was allocated with is undefined behavior. The pool does not
/// validate released addresses in release builds, which is why [`deallocate()`][2] is `unsafe`.
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) but not thread-safe. Use [`BlockPool`][3] to share a
/// pool between threads.
///
/// # Example
///
/// ```rust
/// use block_pool::RawBlockPool;
///
/// let mut pool = RawBlockPool::builder().layout_of::<u64>().build().unwrap();
///
/// let block = pool.allocate(1).unwrap();
///
/// // SAFETY: The block is valid for writes of a u64 until released.
/// unsafe { block.cast::<u64>().write(42) };
///
/// // SAFETY: The block was allocated from this pool with the same count.
/// unsafe { pool.deallocate(block, 1) };
///
/// // The most recently released block is reused first.
/// assert_eq!(pool.allocate(1).unwrap(), block);
/// ```
///
/// [1]: Self::blocks_per_slab
/// [2]: Self::deallocate
/// [3]: crate::BlockPool
#[derive(Debug)]
pub struct RawBlockPool {
    block_layout: BlockLayout,

    blocks_per_slab: NonZero<usize>,

    /// Every slab ever acquired, in order of acquisition. The last one is the one that the
    /// virgin cursor points into.
    slabs: Vec<Slab>,

    free_list: FreeList,

    /// The next never-touched block in the most recently acquired slab. Only meaningful while
    /// `virgin_remaining` is non-zero - it may point one past the end of the slab otherwise.
    virgin_cursor: NonNull<u8>,

    /// How many never-touched blocks remain after (and including) `virgin_cursor`.
    virgin_remaining: usize,

    /// The number of blocks currently owned by callers.
    outstanding: usize,

    drop_policy: DropPolicy,
}

impl RawBlockPool {
    pub(crate) fn new_inner(
        block_layout: BlockLayout,
        blocks_per_slab: NonZero<usize>,
        drop_policy: DropPolicy,
    ) -> Self {
        Self {
            block_layout,
            blocks_per_slab,
            slabs: Vec::new(),
            free_list: FreeList::new(),
            virgin_cursor: NonNull::dangling(),
            virgin_remaining: 0,
            outstanding: 0,
            drop_policy,
        }
    }

    /// Starts building a new [`RawBlockPool`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::RawBlockPool;
    ///
    /// let pool = RawBlockPool::builder().layout_of::<String>().build().unwrap();
    ///
    /// assert!(pool.is_empty());
    /// assert_eq!(pool.capacity(), 0);
    /// ```
    pub fn builder() -> BlockPoolBuilder {
        BlockPoolBuilder::new()
    }

    /// Creates a pool for elements with the given layout, with default settings.
    ///
    /// # Panics
    ///
    /// Panics if a slab of [`DEFAULT_BLOCKS_PER_SLAB`][crate::DEFAULT_BLOCKS_PER_SLAB] blocks of
    /// this layout would not fit into virtual memory.
    #[must_use]
    pub fn with_layout(layout: Layout) -> Self {
        Self::builder()
            .layout(layout)
            .build()
            .expect("default slab of this layout must fit into virtual memory")
    }

    /// Creates a pool for elements of type `T`, with default settings.
    ///
    /// # Panics
    ///
    /// Panics if a slab of [`DEFAULT_BLOCKS_PER_SLAB`][crate::DEFAULT_BLOCKS_PER_SLAB] blocks of
    /// `T` would not fit into virtual memory.
    #[must_use]
    pub fn with_layout_of<T>() -> Self {
        Self::with_layout(Layout::new::<T>())
    }

    /// The layout of every block in the pool.
    #[must_use]
    pub fn block_layout(&self) -> BlockLayout {
        self.block_layout
    }

    /// The number of blocks acquired with every slab.
    #[must_use]
    pub fn blocks_per_slab(&self) -> NonZero<usize> {
        self.blocks_per_slab
    }

    /// The number of single blocks currently allocated from the pool.
    ///
    /// Multi-block allocations are served directly by the system allocator and not counted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outstanding
    }

    /// Whether no single blocks are currently allocated from the pool.
    ///
    /// An empty pool may still be holding slabs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outstanding == 0
    }

    /// The number of blocks the pool holds in its slabs, whether allocated or free.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slabs.len()
            .checked_mul(self.blocks_per_slab.get())
            .expect("overflow here would mean the pool holds more blocks than virtual memory can fit, which makes no sense - it would never grow that big")
    }

    /// The number of slabs the pool has acquired from the system allocator.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    /// Allocates storage for `count` blocks.
    ///
    /// A single block (`count == 1`) is served by the pool. Any other count is forwarded to the
    /// system allocator as one contiguous array of blocks, as the pool cannot serve variable-length
    /// requests. A `count` of zero returns a dangling, block-aligned pointer without allocating.
    ///
    /// The returned storage is uninitialized and is valid for reads and writes of
    /// `count` × [`block_layout().size()`][BlockLayout::size] bytes until released via
    /// [`deallocate()`][Self::deallocate] with the same `count`.
    ///
    /// # Errors
    ///
    /// Returns an error if the system allocator cannot supply the memory. No state is changed in
    /// that case, so the call may be retried later.
    pub fn allocate(&mut self, count: usize) -> Result<NonNull<u8>> {
        if count == 1 {
            self.allocate_block()
        } else {
            self.allocate_bulk(count)
        }
    }

    /// Allocates a single block.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::SlabAcquisition`] if the pool needed to grow and the system
    /// allocator could not supply a new slab.
    #[inline]
    pub fn allocate_block(&mut self) -> Result<NonNull<u8>> {
        let block = match self.free_list.pop() {
            Some(block) => block,
            None => {
                if self.virgin_remaining == 0 {
                    self.grow()?;
                }

                self.carve_virgin_block()
            }
        };

        self.outstanding = self
            .outstanding
            .checked_add(1)
            .expect("more blocks than virtual memory can fit is impossible");

        Ok(block)
    }

    /// Releases storage previously obtained from [`allocate()`][Self::allocate].
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was returned by `allocate()` on this pool with the
    /// same `count` and has not been released since. The storage must not be accessed after
    /// this call.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, count: usize) {
        if count == 1 {
            // SAFETY: Forwarding guarantees from the caller.
            unsafe { self.deallocate_block(ptr) }
        } else {
            // SAFETY: Forwarding guarantees from the caller.
            unsafe { self.deallocate_bulk(ptr, count) }
        }
    }

    /// Releases a single block, making it the next block to be allocated.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was returned by a single-block allocation from this
    /// pool and has not been released since. The storage must not be accessed after this call.
    #[inline]
    pub unsafe fn deallocate_block(&mut self, ptr: NonNull<u8>) {
        debug_assert!(
            self.slabs.iter().any(|slab| slab.contains(ptr)),
            "released address {ptr:p} is not a block of this pool"
        );

        self.outstanding = self
            .outstanding
            .checked_sub(1)
            .expect("released more blocks than were allocated - double release or foreign block");

        // SAFETY: The caller guarantees the block came from one of our slabs (which stay alive as
        // long as we do) and is no longer in use, so its storage is ours to reuse for the link.
        unsafe {
            self.free_list.push(ptr);
        }
    }

    fn grow(&mut self) -> Result<()> {
        // Make room for the bookkeeping first, so a failure cannot leave an acquired slab behind
        // that we have nowhere to record.
        if self.slabs.try_reserve(1).is_err() {
            warn!(
                slab_count = self.slabs.len(),
                "could not grow the slab collection"
            );

            return Err(AllocError::SlabAcquisition {
                bytes: self.block_layout.size().saturating_mul(self.blocks_per_slab.get()),
            });
        }

        let slab = Slab::new(self.block_layout, self.blocks_per_slab)?;

        self.virgin_cursor = slab.first_block_ptr();
        self.virgin_remaining = slab.capacity().get();

        debug!(
            slab_count = self.slabs.len().wrapping_add(1),
            bytes = slab.size_bytes(),
            block_size = self.block_layout.size(),
            "acquired slab"
        );

        self.slabs.push(slab);

        Ok(())
    }

    fn carve_virgin_block(&mut self) -> NonNull<u8> {
        self.virgin_remaining = self
            .virgin_remaining
            .checked_sub(1)
            .expect("only called when the newest slab has untouched blocks left");

        let block = self.virgin_cursor;

        // SAFETY: The block we carve is inside the newest slab, so the next one is at most one
        // past the end of the slab, which is a valid pointer to compute.
        self.virgin_cursor = unsafe { block.add(self.block_layout.size()) };

        block
    }

    fn allocate_bulk(&mut self, count: usize) -> Result<NonNull<u8>> {
        if count == 0 {
            return Ok(self.dangling());
        }

        let layout = self.block_layout.array(count)?;

        // SAFETY: The layout is not zero-sized because count and block size are non-zero.
        let ptr = unsafe { alloc(layout) };

        NonNull::new(ptr).ok_or_else(|| {
            warn!(
                bytes = layout.size(),
                count, "system allocator could not supply a bulk allocation"
            );

            AllocError::BulkAcquisition {
                bytes: layout.size(),
            }
        })
    }

    unsafe fn deallocate_bulk(&mut self, ptr: NonNull<u8>, count: usize) {
        if count == 0 {
            return;
        }

        let layout = self
            .block_layout
            .array(count)
            .expect("caller guarantees the count matches an earlier successful allocation");

        // SAFETY: The caller guarantees the pointer came from `allocate_bulk()` with the same
        // count, so the layout matches the one it was allocated with.
        unsafe {
            dealloc(ptr.as_ptr(), layout);
        }
    }

    fn dangling(&self) -> NonNull<u8> {
        NonNull::new(ptr::without_provenance_mut(self.block_layout.align()))
            .expect("alignment is never zero")
    }

    /// Verifies the block accounting of the pool: every free list entry is a block of one of our
    /// slabs and every block is in exactly one state.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        for block in self.free_list.iter() {
            assert!(
                self.slabs.iter().any(|slab| slab.contains(block)),
                "free list entry {block:p} is not a block of this pool"
            );
        }

        if self.virgin_remaining != 0 {
            let newest = self
                .slabs
                .last()
                .expect("untouched blocks can only exist in an acquired slab");

            assert!(
                newest.contains(self.virgin_cursor),
                "virgin cursor {:p} is outside the newest slab",
                self.virgin_cursor
            );
        }

        let accounted = self
            .free_list
            .len()
            .checked_add(self.virgin_remaining)
            .and_then(|free| free.checked_add(self.outstanding))
            .expect("block counts cannot exceed virtual memory");

        assert_eq!(
            accounted,
            self.capacity(),
            "free list ({}) + untouched ({}) + allocated ({}) blocks do not add up to capacity",
            self.free_list.len(),
            self.virgin_remaining,
            self.outstanding
        );
    }
}

impl Drop for RawBlockPool {
    fn drop(&mut self) {
        let slab_count = self.slabs.len();

        // Releases the storage of every block, including any that are still allocated.
        self.slabs.clear();

        trace!(slab_count, outstanding = self.outstanding, "released block pool");

        // We do this check at the end so we clean up the memory first.
        //
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if self.drop_policy == DropPolicy::MustNotReleaseOutstanding && !thread::panicking() {
            assert!(
                self.outstanding == 0,
                "dropped a block pool with {} allocated blocks with a policy that says it must be empty when dropped",
                self.outstanding
            );
        }
    }
}

// SAFETY: Yes, there are raw pointers involved here but they all point into memory owned by the
// pool itself and nothing about untyped storage is tied to a specific thread.
unsafe impl Send for RawBlockPool {}
