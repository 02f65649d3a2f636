//! Basic usage example for `GuardedPool`.
//!
//! Allocates a handful of blocks, writes through the returned pointers, frees everything and
//! prints the statistics along the way.

use guarded_pool::{GuardedPool, PoolError};

fn main() -> Result<(), PoolError> {
    let mut pool = GuardedPool::builder()
        .object_size(16)
        .objects_per_page(4)
        .max_pages(0)
        .build()?;

    println!(
        "Created pool: {} bytes per object, {} bytes per page",
        pool.stats().object_size,
        pool.stats().page_size
    );

    // Take three blocks and stamp each with a value.
    let blocks: Vec<_> = (0..3)
        .map(|_| pool.allocate())
        .collect::<Result<_, _>>()?;

    for (index, block) in blocks.iter().enumerate() {
        // SAFETY: each block is 16 writable bytes handed out by the pool above.
        unsafe {
            block.as_ptr().cast::<u64>().write_unaligned(0xBEEF + index as u64);
        }
    }

    for (index, block) in blocks.iter().enumerate() {
        // SAFETY: we wrote these values through the same pointers just above.
        let value = unsafe { block.as_ptr().cast::<u64>().read_unaligned() };
        println!("Block {index} holds {value:#x}");
    }

    println!(
        "In use: {}, free: {}, pages: {}",
        pool.stats().objects_in_use,
        pool.stats().free_objects,
        pool.stats().pages_in_use
    );

    for block in blocks {
        // SAFETY: each block came from this pool and is freed exactly once.
        unsafe { pool.free(block.as_ptr())? };
    }

    let reclaimed = pool.free_empty_pages();
    println!(
        "Freed everything; reclaimed {reclaimed} page(s), {} allocation(s) total",
        pool.stats().allocations
    );

    Ok(())
}
