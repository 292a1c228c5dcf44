#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-block memory pool for workloads that make many allocations of the same size.
//!
//! Memory is acquired from the system allocator in large slabs and split into equally sized
//! blocks. Released blocks are kept on a free list threaded through the blocks themselves and
//! are handed out again (most recently released first) before any new memory is acquired, which
//! makes both allocation and release of a single block O(1) and keeps hot memory in the cache.
//!
//! The pool only deals in raw storage. It never constructs, moves or drops values - that is the
//! job of whoever uses the storage.
//!
//! # Layers
//!
//! * [`RawBlockPool`] - a single-threaded pool owned by the caller. Created via
//!   [`RawBlockPool::builder()`].
//! * [`BlockPool`] - a thread-safe, reference-counted handle to a pool. Pools for the same
//!   [size class][BlockLayout] are shared process-wide via [`BlockPool::shared_for()`].
//! * [`PoolAllocator<T>`] - an allocator facade for node-based containers, routing single-element
//!   allocations of `T` through the shared pool of `T`'s size class and larger requests to the
//!   system allocator. Implements the [`Allocator`][allocator_api2::alloc::Allocator] trait from
//!   `allocator_api2`, so it can be plugged into containers that support custom allocators.
//!
//! # Memory usage
//!
//! A pool never shrinks. Slabs are only returned to the system allocator when the pool itself is
//! dropped, which for the shared pools happens when the last handle to the pool is dropped.
//!
//! # Example
//!
//! ```rust
//! use allocator_api2::boxed::Box;
//! use block_pool::PoolAllocator;
//!
//! struct Node {
//!     value: u64,
//!     next: Option<Box<Node, PoolAllocator<Node>>>,
//! }
//!
//! let alloc = PoolAllocator::<Node>::new();
//!
//! let tail = Box::new_in(Node { value: 2, next: None }, alloc.clone());
//! let head = Box::new_in(Node { value: 1, next: Some(tail) }, alloc.clone());
//!
//! assert_eq!(head.value + head.next.as_ref().unwrap().value, 3);
//! assert_eq!(alloc.pool().len(), 2);
//!
//! drop(head);
//!
//! assert!(alloc.pool().is_empty());
//! ```

mod allocator;
mod block_layout;
mod builder;
mod drop_policy;
mod error;
mod free_list;
mod pool;
mod registry;
mod shared;
mod slab;

pub use allocator::PoolAllocator;
pub use block_layout::BlockLayout;
pub use builder::*;
pub use drop_policy::DropPolicy;
pub use error::AllocError;
pub(crate) use error::Result;
pub(crate) use free_list::*;
pub use pool::RawBlockPool;
pub(crate) use registry::*;
pub use shared::BlockPool;
pub(crate) use shared::PoolCore;
pub(crate) use slab::*;
