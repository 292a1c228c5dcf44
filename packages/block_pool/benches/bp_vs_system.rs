//! Benchmark comparing the pool allocator against the system allocator on the allocation
//! patterns of node-based containers.
//!
//! Every scenario drives a container through a seeded sequence of random target sizes
//! (0..=1024 elements), growing or shrinking it to each target in turn. Each container allocates
//! exactly one node per element through the allocator under test:
//! 1. `PushFront` - a doubly linked list growing and shrinking at the front.
//! 2. `PushBack` - the same list growing and shrinking at the back.
//! 3. `Map` - a binary search tree of key-value nodes, keys erased in reverse insertion order.
//! 4. `Set` - the same tree with key-only nodes.
//!
//! The tree is not self-balancing, so keys are taken from a fixed shuffled order to keep its
//! depth logarithmic.
#![allow(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    missing_docs,
    reason = "duty of care is slightly lowered for benchmark code"
)]

use std::alloc::Layout;
use std::hint::black_box;
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use alloc_tracker::Allocator as TrackingAllocator;
use allocator_api2::alloc::{Allocator, Global};
use block_pool::PoolAllocator;
use criterion::{Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: TrackingAllocator<std::alloc::System> = TrackingAllocator::system();

/// Upper bound (inclusive) of the random container sizes.
const MAX_SIZE: usize = 1024;

/// Number of target sizes a container is driven through in one benchmark iteration.
const TARGETS_PER_ITERATION: usize = 64;

const SEED: u64 = 0;

#[derive(Clone, Copy, Debug)]
enum Scenario {
    PushFront,
    PushBack,
    Map,
    Set,
}

impl Scenario {
    const ALL: [Self; 4] = [Self::PushFront, Self::PushBack, Self::Map, Self::Set];

    fn name(self) -> &'static str {
        match self {
            Self::PushFront => "push_front",
            Self::PushBack => "push_back",
            Self::Map => "map",
            Self::Set => "set",
        }
    }

    fn run_system(self, targets: &[usize], keys: &[usize]) {
        match self {
            Self::PushFront => push_front(List::new_in(Global), targets),
            Self::PushBack => push_back(List::new_in(Global), targets),
            Self::Map => map(Tree::new_in(Global), targets, keys),
            Self::Set => set(Tree::new_in(Global), targets, keys),
        }
    }

    fn run_pool(self, pools: &Pools, targets: &[usize], keys: &[usize]) {
        match self {
            Self::PushFront => push_front(List::new_in(pools.list.clone()), targets),
            Self::PushBack => push_back(List::new_in(pools.list.clone()), targets),
            Self::Map => map(Tree::new_in(pools.map.clone()), targets, keys),
            Self::Set => set(Tree::new_in(pools.set.clone()), targets, keys),
        }
    }
}

/// One allocator per node type, held for the whole benchmark so the shared pools (and their
/// slabs) survive between iterations like they would in a long-running program.
struct Pools {
    list: PoolAllocator<ListNode>,
    map: PoolAllocator<TreeNode<usize>>,
    set: PoolAllocator<TreeNode<()>>,
}

impl Pools {
    fn new() -> Self {
        Self {
            list: PoolAllocator::new(),
            map: PoolAllocator::new(),
            set: PoolAllocator::new(),
        }
    }
}

fn allocate_node<N, A: Allocator>(alloc: &A, node: N) -> NonNull<N> {
    let ptr = alloc
        .allocate(Layout::new::<N>())
        .expect("benchmark never runs out of memory")
        .cast::<N>();

    // SAFETY: Fresh storage, sized and aligned for N.
    unsafe { ptr.write(node) };

    ptr
}

/// # Safety
///
/// `ptr` must come from `allocate_node()` with an allocator equal to `alloc` and must not be
/// used again afterwards.
unsafe fn release_node<N, A: Allocator>(alloc: &A, ptr: NonNull<N>) -> N {
    // SAFETY: The caller guarantees the node is live, so it holds an initialized N.
    let node = unsafe { ptr.read() };

    // SAFETY: The caller guarantees the storage came from this allocator with N's layout.
    unsafe { alloc.deallocate(ptr.cast(), Layout::new::<N>()) };

    node
}

struct ListNode {
    value: usize,
    prev: Option<NonNull<ListNode>>,
    next: Option<NonNull<ListNode>>,
}

struct List<A: Allocator> {
    head: Option<NonNull<ListNode>>,
    tail: Option<NonNull<ListNode>>,
    len: usize,
    alloc: A,
}

impl<A: Allocator> List<A> {
    fn new_in(alloc: A) -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            alloc,
        }
    }

    fn push_front(&mut self, value: usize) {
        let node = allocate_node(
            &self.alloc,
            ListNode {
                value,
                prev: None,
                next: self.head,
            },
        );

        match self.head {
            // SAFETY: Nodes on the list are live until popped.
            Some(head) => unsafe { (*head.as_ptr()).prev = Some(node) },
            None => self.tail = Some(node),
        }

        self.head = Some(node);
        self.len += 1;
    }

    fn push_back(&mut self, value: usize) {
        let node = allocate_node(
            &self.alloc,
            ListNode {
                value,
                prev: self.tail,
                next: None,
            },
        );

        match self.tail {
            // SAFETY: Nodes on the list are live until popped.
            Some(tail) => unsafe { (*tail.as_ptr()).next = Some(node) },
            None => self.head = Some(node),
        }

        self.tail = Some(node);
        self.len += 1;
    }

    fn pop_front(&mut self) -> Option<usize> {
        let head = self.head?;

        // SAFETY: The head is live and we unlink it before anything else can reach it.
        let node = unsafe { release_node(&self.alloc, head) };

        self.head = node.next;

        match self.head {
            // SAFETY: Nodes on the list are live until popped.
            Some(next) => unsafe { (*next.as_ptr()).prev = None },
            None => self.tail = None,
        }

        self.len -= 1;
        Some(node.value)
    }

    fn pop_back(&mut self) -> Option<usize> {
        let tail = self.tail?;

        // SAFETY: The tail is live and we unlink it before anything else can reach it.
        let node = unsafe { release_node(&self.alloc, tail) };

        self.tail = node.prev;

        match self.tail {
            // SAFETY: Nodes on the list are live until popped.
            Some(prev) => unsafe { (*prev.as_ptr()).next = None },
            None => self.head = None,
        }

        self.len -= 1;
        Some(node.value)
    }
}

impl<A: Allocator> Drop for List<A> {
    fn drop(&mut self) {
        while self.pop_front().is_some() {}
    }
}

struct TreeNode<V> {
    key: usize,
    value: V,
    left: Option<NonNull<TreeNode<V>>>,
    right: Option<NonNull<TreeNode<V>>>,
}

/// Unbalanced binary search tree with unique keys.
struct Tree<V, A: Allocator> {
    root: Option<NonNull<TreeNode<V>>>,
    alloc: A,
}

impl<V, A: Allocator> Tree<V, A> {
    fn new_in(alloc: A) -> Self {
        Self { root: None, alloc }
    }

    /// Inserts a key that is not yet in the tree.
    fn insert(&mut self, key: usize, value: V) {
        let mut link = &mut self.root;

        while let Some(node) = *link {
            // SAFETY: Nodes in the tree are live until removed and we hold the only reference.
            let node = unsafe { &mut *node.as_ptr() };

            link = if key < node.key {
                &mut node.left
            } else {
                &mut node.right
            };
        }

        *link = Some(allocate_node(
            &self.alloc,
            TreeNode {
                key,
                value,
                left: None,
                right: None,
            },
        ));
    }

    fn remove(&mut self, key: usize) -> Option<V> {
        let mut link = &mut self.root;

        let target = loop {
            let node = (*link)?;

            // SAFETY: Nodes in the tree are live until removed and we hold the only reference.
            let node_ref = unsafe { &mut *node.as_ptr() };

            if key == node_ref.key {
                break node_ref;
            }

            link = if key < node_ref.key {
                &mut node_ref.left
            } else {
                &mut node_ref.right
            };
        };

        let removed = link.take().expect("loop only breaks on an occupied link");

        *link = match (target.left, target.right) {
            (None, child) | (child, None) => child,
            (Some(left), Some(_)) => {
                // The in-order successor (leftmost node of the right subtree) takes its place.
                let mut successor_link = &mut target.right;

                loop {
                    let candidate = successor_link.expect("right subtree is not empty");

                    // SAFETY: Nodes in the tree are live until removed.
                    let candidate_ref = unsafe { &mut *candidate.as_ptr() };

                    if candidate_ref.left.is_none() {
                        break;
                    }

                    successor_link = &mut candidate_ref.left;
                }

                let successor = successor_link.expect("loop stops on an occupied link");

                // SAFETY: Nodes in the tree are live until removed.
                let successor_ref = unsafe { &mut *successor.as_ptr() };

                *successor_link = successor_ref.right;

                // If the successor was the right child itself, unlinking it above already moved
                // its own right subtree into `target.right`.
                successor_ref.left = Some(left);
                successor_ref.right = target.right;

                Some(successor)
            }
        };

        // SAFETY: The node is unlinked from the tree, so nothing else can reach it.
        Some(unsafe { release_node(&self.alloc, removed) }.value)
    }
}

impl<V, A: Allocator> Drop for Tree<V, A> {
    fn drop(&mut self) {
        let mut pending = self.root.take().into_iter().collect::<Vec<_>>();

        while let Some(node) = pending.pop() {
            // SAFETY: Every node is reachable from exactly one parent, so it is released once.
            let node = unsafe { release_node(&self.alloc, node) };

            pending.extend(node.left);
            pending.extend(node.right);
        }
    }
}

fn push_front<A: Allocator>(mut list: List<A>, targets: &[usize]) {
    for &target in targets {
        while list.len < target {
            list.push_front(list.len);
        }

        while list.len > target {
            _ = black_box(list.pop_front());
        }
    }
}

fn push_back<A: Allocator>(mut list: List<A>, targets: &[usize]) {
    for &target in targets {
        while list.len < target {
            list.push_back(list.len);
        }

        while list.len > target {
            _ = black_box(list.pop_back());
        }
    }
}

fn map<A: Allocator>(mut tree: Tree<usize, A>, targets: &[usize], keys: &[usize]) {
    let mut len = 0;

    for &target in targets {
        while len < target {
            tree.insert(keys[len], len);
            len += 1;
        }

        while len > target {
            len -= 1;
            _ = black_box(tree.remove(keys[len]));
        }
    }
}

fn set<A: Allocator>(mut tree: Tree<(), A>, targets: &[usize], keys: &[usize]) {
    let mut len = 0;

    for &target in targets {
        while len < target {
            tree.insert(keys[len], ());
            len += 1;
        }

        while len > target {
            len -= 1;
            _ = black_box(tree.remove(keys[len]));
        }
    }
}

fn random_targets(iters: u64) -> Vec<Vec<usize>> {
    let mut rng = SmallRng::seed_from_u64(SEED);

    (0..iters)
        .map(|_| {
            (0..TARGETS_PER_ITERATION)
                .map(|_| rng.random_range(0..=MAX_SIZE))
                .collect()
        })
        .collect()
}

fn shuffled_keys() -> Vec<usize> {
    let mut rng = SmallRng::seed_from_u64(SEED);

    let mut keys = (0..MAX_SIZE).collect::<Vec<_>>();
    keys.shuffle(&mut rng);
    keys
}

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("bp_vs_system");

    group.measurement_time(Duration::from_secs(10));

    let pools = Pools::new();
    let keys = shuffled_keys();

    for scenario in Scenario::ALL {
        let name = format!("{} system", scenario.name());
        let mut allocs_op = allocs.operation(&name);
        group.bench_function(&name, |b| {
            b.iter_custom(|iters| {
                let all_targets = random_targets(iters);

                let _span = allocs_op.measure_thread().iterations(iters);
                let start = Instant::now();

                for targets in &all_targets {
                    scenario.run_system(targets, &keys);
                }

                start.elapsed()
            });
        });

        let name = format!("{} pool", scenario.name());
        let mut allocs_op = allocs.operation(&name);
        group.bench_function(&name, |b| {
            b.iter_custom(|iters| {
                let all_targets = random_targets(iters);

                let _span = allocs_op.measure_thread().iterations(iters);
                let start = Instant::now();

                for targets in &all_targets {
                    scenario.run_pool(&pools, targets, &keys);
                }

                start.elapsed()
            });
        });
    }

    group.finish();

    allocs.print_to_stdout();
}
