use std::alloc::{Layout, alloc, dealloc};
use std::num::NonZero;
use std::ptr::NonNull;

use tracing::warn;

use crate::{AllocError, BlockLayout, Result};

/// One contiguous region of uniformly sized blocks, acquired from the system allocator in a
/// single request.
///
/// The slab itself does not track which blocks are in use - it is just the backing storage that
/// the owning pool carves blocks out of. The storage never moves and is only released when the
/// slab is dropped, so addresses of blocks remain valid for the lifetime of the slab.
///
/// # Thread safety
///
/// The slab holds untyped memory only and has no thread affinity. It is not marked `Send`
/// itself because the owner decides how access to the blocks is synchronized.
#[derive(Debug)]
pub(crate) struct Slab {
    first_block_ptr: NonNull<u8>,

    /// Layout of the whole block array, used to release it in `drop()`.
    array_layout: Layout,

    block_layout: BlockLayout,

    capacity: NonZero<usize>,
}

impl Slab {
    /// Acquires a new slab with room for `capacity` blocks.
    ///
    /// The contents of the slab are uninitialized.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::LayoutOverflow`] if the slab would not fit into virtual memory and
    /// [`AllocError::SlabAcquisition`] if the system allocator cannot supply the memory.
    pub(crate) fn new(block_layout: BlockLayout, capacity: NonZero<usize>) -> Result<Self> {
        let array_layout = block_layout.array(capacity.get())?;

        // SAFETY: The layout is not zero-sized because both the block size and capacity are
        // non-zero (a block always holds at least one free list link).
        let ptr = unsafe { alloc(array_layout) };

        let Some(first_block_ptr) = NonNull::new(ptr) else {
            warn!(
                bytes = array_layout.size(),
                blocks = capacity.get(),
                "system allocator could not supply a slab"
            );

            return Err(AllocError::SlabAcquisition {
                bytes: array_layout.size(),
            });
        };

        Ok(Self {
            first_block_ptr,
            array_layout,
            block_layout,
            capacity,
        })
    }

    /// The number of blocks in the slab.
    #[must_use]
    pub(crate) fn capacity(&self) -> NonZero<usize> {
        self.capacity
    }

    /// Size of the slab's storage in bytes.
    #[must_use]
    pub(crate) fn size_bytes(&self) -> usize {
        self.array_layout.size()
    }

    #[must_use]
    pub(crate) fn first_block_ptr(&self) -> NonNull<u8> {
        self.first_block_ptr
    }

    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    #[must_use]
    #[cfg(test)]
    pub(crate) fn block_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < self.capacity.get(),
            "block {index} index out of bounds in slab of {} blocks",
            self.capacity
        );

        // Cannot overflow because the slab layout was successfully calculated for this size.
        let offset = index.wrapping_mul(self.block_layout.size());

        // SAFETY: Guarded by bounds check above, so the pointer stays inside the allocation.
        unsafe { self.first_block_ptr.add(offset) }
    }

    /// Whether `ptr` is the address of one of the blocks in this slab.
    #[must_use]
    pub(crate) fn contains(&self, ptr: NonNull<u8>) -> bool {
        let offset = ptr
            .addr()
            .get()
            .wrapping_sub(self.first_block_ptr.addr().get());

        offset < self.array_layout.size()
            && offset.checked_rem(self.block_layout.size()) == Some(0)
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        // SAFETY: The layout must match between alloc and dealloc. It does.
        unsafe {
            dealloc(self.first_block_ptr.as_ptr(), self.array_layout);
        }
    }
}
