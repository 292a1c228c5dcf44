//! Example that demonstrates basic usage of the raw pool and the allocator facade.
//!
//! Builds a small linked list on top of the pool allocator and shows blocks being reused.

use allocator_api2::boxed::Box;
use block_pool::{PoolAllocator, RawBlockPool};

struct Node {
    value: u64,
    next: Option<Box<Node, PoolAllocator<Node>>>,
}

fn main() {
    println!("=== Block Pool Example ===");

    // A raw pool, owned by us and configured explicitly.
    let mut pool = RawBlockPool::builder().layout_of::<u64>().build().unwrap();

    let first = pool.allocate(1).unwrap();

    // SAFETY: The block came from this pool with the same count and is released once.
    unsafe { pool.deallocate(first, 1) };

    let second = pool.allocate(1).unwrap();
    println!("Released block reused: {}", first == second);

    // The allocator facade, plugged into a container that supports custom allocators.
    let alloc = PoolAllocator::<Node>::new();

    let mut head = None;

    for value in 1..=5 {
        head = Some(Box::new_in(Node { value, next: head }, alloc.clone()));
    }

    println!("Nodes allocated from the pool: {}", alloc.pool().len());

    let mut sum = 0;
    let mut cursor = head.as_deref();

    while let Some(node) = cursor {
        sum += node.value;
        cursor = node.next.as_deref();
    }

    println!("Sum of node values: {sum}");

    drop(head);
    println!("Nodes still allocated: {}", alloc.pool().len());

    println!("Example completed successfully!");
}
