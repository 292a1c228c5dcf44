/// Determines how a pool treats blocks that are still allocated when the pool is dropped.
///
/// Dropping a pool always releases all of its memory, including the storage of any blocks that
/// are still allocated. The pool never runs destructors of elements stored in blocks - it does
/// not even know what the blocks contain. The policy only decides whether this is considered a
/// bug in the owner of the pool.
///
/// # Examples
///
/// ```
/// use block_pool::{DropPolicy, RawBlockPool};
///
/// let pool = RawBlockPool::builder()
///     .layout_of::<u64>()
///     .drop_policy(DropPolicy::MustNotReleaseOutstanding)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool may be dropped while blocks are still allocated. This is the default.
    #[default]
    MayReleaseOutstanding,

    /// The pool will panic if any blocks are still allocated when it is dropped.
    ///
    /// This may be valuable to detect leaks of pooled blocks in tests, or where it is known that
    /// something still refers to the blocks through raw pointers that would dangle after the drop.
    MustNotReleaseOutstanding,
}
