use std::ptr::NonNull;

/// The reinterpretation of a free block's storage as a link to the next free block.
///
/// This only ever exists inside blocks that are free. An allocated block belongs to the caller
/// and its bytes are never read or written by the pool.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub(crate) struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

/// A stack of free blocks, threaded through the storage of the blocks themselves.
///
/// Also known as intrusive freelist. The most recently pushed block is the first one popped,
/// which keeps recently touched memory hot in the cache.
///
/// The list does not own the memory of its blocks. The owner of the list must guarantee that
/// every block on the list stays valid for as long as it is on the list.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    head: Option<NonNull<FreeBlock>>,

    /// Not needed for push/pop but lets the pool report its block accounting.
    len: usize,
}

impl FreeList {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Pushes a block onto the head of the list.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `block` is valid for writes of a [`FreeBlock`], is aligned
    /// for it, is not on the list already, is not used by anyone else while it is on the list
    /// and remains valid until it is popped or the list is abandoned.
    pub(crate) unsafe fn push(&mut self, block: NonNull<u8>) {
        #[allow(
            clippy::cast_ptr_alignment,
            reason = "block layout guarantees alignment for FreeBlock"
        )]
        let node = block.cast::<FreeBlock>();

        // SAFETY: Forwarding guarantees from the caller - the storage is ours to write into.
        unsafe {
            node.as_ptr().write(FreeBlock { next: self.head });
        }

        self.head = Some(node);

        self.len = self
            .len
            .checked_add(1)
            .expect("free list longer than virtual memory can fit is impossible");
    }

    /// Pops the most recently pushed block from the list, if any.
    #[must_use]
    pub(crate) fn pop(&mut self) -> Option<NonNull<u8>> {
        let node = self.head?;

        // SAFETY: Every node on the list was initialized by `push()` and the `push()` contract
        // guarantees it remains valid while on the list.
        self.head = unsafe { node.as_ptr().read() }.next;

        self.len = self
            .len
            .checked_sub(1)
            .expect("list had a head so its length must be non-zero");

        Some(node.cast())
    }

    /// Iterates over the blocks on the list, from head to tail.
    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = NonNull<u8>> + '_ {
        use std::iter;

        iter::successors(self.head, |node| {
            // SAFETY: Every node on the list was initialized by `push()` and the `push()` contract
            // guarantees it remains valid while on the list. We hold a shared reference to the
            // list, so it cannot change while we walk it.
            unsafe { node.as_ptr().read() }.next
        })
        .map(NonNull::cast)
    }
}
