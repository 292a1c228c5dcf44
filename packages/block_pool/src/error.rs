use thiserror::Error;

/// Errors that can occur when acquiring memory from a block pool.
///
/// None of these are retried by the pool. The pool performs no automatic reclamation, so the
/// caller may release memory elsewhere and try again.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AllocError {
    /// The system allocator could not supply the memory for a new slab.
    #[error("system allocator could not supply a slab of {bytes} bytes")]
    SlabAcquisition {
        /// Size of the slab that was requested.
        bytes: usize,
    },

    /// The system allocator could not supply the memory for a multi-block request.
    #[error("system allocator could not supply a bulk allocation of {bytes} bytes")]
    BulkAcquisition {
        /// Size of the bulk allocation that was requested.
        bytes: usize,
    },

    /// An array of `count` blocks would not fit into the address space.
    #[error("an array of {count} blocks exceeds the maximum supported allocation size")]
    LayoutOverflow {
        /// Number of blocks that was requested.
        count: usize,
    },

    /// The pool builder was asked to build a pool without being told the block layout.
    #[error("a block layout must be specified before building the pool")]
    MissingLayout,
}

/// A specialized `Result` type for block pool operations, returning the crate's
/// [`AllocError`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, AllocError>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AllocError: Send, Sync, Debug);

    #[test]
    fn slab_acquisition_message_names_size() {
        let error = AllocError::SlabAcquisition { bytes: 4096 };

        assert_eq!(
            error.to_string(),
            "system allocator could not supply a slab of 4096 bytes"
        );
    }

    #[test]
    fn overflow_is_error() {
        let result: Result<()> = Err(AllocError::LayoutOverflow { count: usize::MAX });

        assert!(matches!(
            result,
            Err(AllocError::LayoutOverflow { count: usize::MAX })
        ));
    }
}
