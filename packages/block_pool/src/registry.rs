//! Process-wide registry of shared block pools.
//!
//! Pools are keyed by size class, so every user of the same block layout and slab size routes
//! through the same pool for as long as anyone holds a handle to it. The registry itself only
//! holds weak references: a pool is dropped once its last handle is gone and a fresh one is
//! created the next time the size class is requested.

use std::num::NonZero;
use std::sync::{Arc, LazyLock, Weak};

use foldhash::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::{BlockLayout, PoolCore, RawBlockPool, Result};

/// Grouping of allocation requests that may share one pool.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct SizeClass {
    block_layout: BlockLayout,
    blocks_per_slab: NonZero<usize>,
}

impl SizeClass {
    pub(crate) fn new(block_layout: BlockLayout, blocks_per_slab: NonZero<usize>) -> Self {
        Self {
            block_layout,
            blocks_per_slab,
        }
    }
}

type PoolMap = HashMap<SizeClass, Weak<PoolCore>>;

static POOLS: LazyLock<Mutex<PoolMap>> = LazyLock::new(|| Mutex::new(PoolMap::default()));

/// Returns the live pool for the size class, creating it if it does not exist.
pub(crate) fn shared_pool(class: SizeClass) -> Result<Arc<PoolCore>> {
    let mut pools = POOLS.lock();

    if let Some(existing) = pools.get(&class).and_then(Weak::upgrade) {
        return Ok(existing);
    }

    let pool = RawBlockPool::builder()
        .layout(class.block_layout.layout())
        .blocks_per_slab(class.blocks_per_slab)
        .build()?;

    let core = Arc::new(PoolCore::new(pool));

    // Size classes of dropped pools would otherwise accumulate forever.
    pools.retain(|_, pool| pool.strong_count() > 0);
    pools.insert(class, Arc::downgrade(&core));

    debug!(
        block_size = class.block_layout.size(),
        block_align = class.block_layout.align(),
        blocks_per_slab = class.blocks_per_slab.get(),
        "created shared block pool"
    );

    Ok(core)
}
