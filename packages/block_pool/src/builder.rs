use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use new_zealand::nz;

use crate::{AllocError, BlockLayout, BlockPool, DropPolicy, RawBlockPool, Result};

/// Number of blocks acquired per slab unless configured otherwise.
pub const DEFAULT_BLOCKS_PER_SLAB: usize = 1024;

/// Builder for creating an instance of [`RawBlockPool`] or a private [`BlockPool`].
///
/// The pool requires the element memory layout to be specified at construction time.
/// Use either `.layout()` to provide a specific layout or `.layout_of::<T>()` to generate
/// a layout based on the provided type.
///
/// The layout is mandatory, whereas other settings are optional.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use block_pool::RawBlockPool;
///
/// let pool = RawBlockPool::builder()
///     .layout_of::<u64>()
///     .blocks_per_slab(NonZero::new(64).unwrap())
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.blocks_per_slab().get(), 64);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing pool configuration to happen on different threads than where the pool is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct BlockPoolBuilder {
    element_layout: Option<Layout>,
    blocks_per_slab: NonZero<usize>,
    drop_policy: DropPolicy,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl BlockPoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            element_layout: None,
            blocks_per_slab: nz!(DEFAULT_BLOCKS_PER_SLAB),
            drop_policy: DropPolicy::default(),
            _not_sync: PhantomData,
        }
    }

    /// Sets the memory layout of the elements the pool will hold.
    ///
    /// The blocks of the pool may be larger and more aligned than this, as each block must also
    /// be able to hold a free list link while not allocated. See [`BlockLayout`].
    pub fn layout(mut self, layout: Layout) -> Self {
        self.element_layout = Some(layout);
        self
    }

    /// Sets the memory layout of the elements the pool will hold to the layout of `T`.
    pub fn layout_of<T>(self) -> Self {
        self.layout(Layout::new::<T>())
    }

    /// Sets the number of blocks acquired from the system allocator whenever the pool grows.
    ///
    /// Defaults to [`DEFAULT_BLOCKS_PER_SLAB`].
    pub fn blocks_per_slab(mut self, blocks_per_slab: NonZero<usize>) -> Self {
        self.blocks_per_slab = blocks_per_slab;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how to treat blocks that
    /// are still allocated when the pool is dropped.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds a single-threaded pool with the specified configuration.
    ///
    /// No memory is acquired until the first block is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::MissingLayout`] if no layout was specified and
    /// [`AllocError::LayoutOverflow`] if a block or a slab with the requested number of blocks
    /// would not fit into virtual memory.
    pub fn build(self) -> Result<RawBlockPool> {
        let element_layout = self.element_layout.ok_or(AllocError::MissingLayout)?;

        let block_layout = BlockLayout::try_for_layout(element_layout)?;

        // Surface impossible slab sizes now instead of on the first allocation.
        block_layout.array(self.blocks_per_slab.get())?;

        Ok(RawBlockPool::new_inner(
            block_layout,
            self.blocks_per_slab,
            self.drop_policy,
        ))
    }

    /// Builds a thread-safe pool with the specified configuration.
    ///
    /// The pool is private to the returned handle and its clones - it is not registered for
    /// sharing with other users of the same size class.
    ///
    /// # Errors
    ///
    /// Same as [`build()`][Self::build].
    pub fn build_shared(self) -> Result<BlockPool> {
        self.build().map(BlockPool::from)
    }
}
