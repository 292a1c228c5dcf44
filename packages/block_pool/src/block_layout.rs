use std::alloc::Layout;

use crate::{AllocError, FreeBlock, Result};

/// The memory layout of one block of a pool, derived from the layout of the element type that
/// the block is meant to hold.
///
/// A block must be able to hold either an element (while allocated) or a free list link (while
/// free), so its size and alignment are the larger of the two. The size is padded to the
/// alignment, which makes it the stride between consecutive blocks of a slab.
///
/// Element layouts that normalize to the same block layout belong to the same size class and
/// may share a pool.
///
/// # Examples
///
/// ```
/// use std::alloc::Layout;
///
/// use block_pool::BlockLayout;
///
/// let block = BlockLayout::of::<u8>();
///
/// // Even a single byte element gets a block large enough to hold a free list link.
/// assert!(block.size() >= size_of::<usize>());
/// assert!(block.fits(Layout::new::<u8>()));
///
/// // Types that normalize to the same block layout are in the same size class.
/// assert_eq!(BlockLayout::of::<u32>(), BlockLayout::of::<u16>());
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BlockLayout {
    layout: Layout,
}

impl BlockLayout {
    /// Calculates the block layout for elements with the given memory layout.
    ///
    /// Zero-sized element layouts are accepted and produce a block that only holds a link.
    ///
    /// # Panics
    ///
    /// Panics if the padded block would exceed the size of virtual memory. Use
    /// [`try_for_layout()`][Self::try_for_layout] for element layouts that come from outside the
    /// type system.
    #[must_use]
    pub fn for_layout(element: Layout) -> Self {
        Self::try_for_layout(element)
            .expect("element layout must leave room for padding to link alignment within virtual memory")
    }

    /// Calculates the block layout for elements with the given memory layout, or returns
    /// [`AllocError::LayoutOverflow`] if widening the element to hold a free list link pushes
    /// the padded block past the size of virtual memory.
    ///
    /// # Errors
    ///
    /// Only element layouts within a few bytes of `isize::MAX` can fail.
    pub fn try_for_layout(element: Layout) -> Result<Self> {
        let link = Layout::new::<FreeBlock>();

        let size = element.size().max(link.size());
        let align = element.align().max(link.align());

        let layout = Layout::from_size_align(size, align)
            .ok()
            .ok_or(AllocError::LayoutOverflow { count: 1 })?
            .pad_to_align();

        Ok(Self { layout })
    }

    /// Calculates the block layout for elements of type `T`.
    #[must_use]
    pub fn of<T>() -> Self {
        Self::for_layout(Layout::new::<T>())
    }

    /// Size of one block in bytes. This is also the distance between neighboring blocks.
    #[must_use]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Alignment of every block.
    #[must_use]
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// The block layout as a [`Layout`].
    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Whether a single allocation with the given layout can be served by one block.
    ///
    /// Zero-sized layouts never fit, as they do not need any storage.
    #[must_use]
    pub fn fits(&self, layout: Layout) -> bool {
        layout.size() != 0 && layout.size() <= self.size() && layout.align() <= self.align()
    }

    /// Layout of a contiguous array of `count` blocks.
    pub(crate) fn array(&self, count: usize) -> Result<Layout> {
        let bytes = self
            .size()
            .checked_mul(count)
            .ok_or(AllocError::LayoutOverflow { count })?;

        Layout::from_size_align(bytes, self.align())
            .ok()
            .ok_or(AllocError::LayoutOverflow { count })
    }
}
