//! Debug-mode misuse detection example for `GuardedPool`.
//!
//! Demonstrates the three client mistakes the pool catches while debug mode is on: writing past
//! the payload into the guard pads, freeing the same block twice, and freeing a pointer that is
//! not on a block boundary.

use guarded_pool::{GuardedPool, HeaderMode, PoolError};

fn main() -> Result<(), PoolError> {
    let mut pool = GuardedPool::builder()
        .object_size(16)
        .objects_per_page(4)
        .debug(true)
        .pad_bytes(4)
        .header(HeaderMode::Basic)
        .build()?;

    // Overflow: write one byte past the payload, into the right pad.
    let block = pool.allocate()?;
    // SAFETY: the write lands in the pool's own pad region; that is exactly the mistake the
    // guard bytes exist to catch.
    unsafe { block.as_ptr().add(16).write(0x42) };

    // SAFETY: `block` came from this pool.
    match unsafe { pool.free(block.as_ptr()) } {
        Err(PoolError::CorruptedBlock { address }) => {
            println!("Caught pad corruption at {address:#x}");
        }
        other => println!("Unexpected outcome: {other:?}"),
    }

    // The sweep finds the same block.
    let corrupted = pool.validate_pages(|payload, size| {
        println!("validate_pages flagged {payload:p} ({size} bytes)");
    });
    println!("{corrupted} corrupted block(s) in total");

    // Double free: the second call is rejected and changes nothing.
    let block = pool.allocate()?;
    // SAFETY: `block` came from this pool; the second free is the demonstrated mistake and is
    // caught by the debug checks before anything is touched.
    unsafe {
        pool.free(block.as_ptr())?;
        match pool.free(block.as_ptr()) {
            Err(PoolError::DoubleFree { address }) => {
                println!("Caught double free at {address:#x}");
            }
            other => println!("Unexpected outcome: {other:?}"),
        }
    }

    // Bad boundary: an interior pointer is not a block.
    let block = pool.allocate()?;
    // SAFETY: the offset pointer stays inside pool memory; the debug checks reject it before
    // any bytes are touched.
    match unsafe { pool.free(block.as_ptr().add(3)) } {
        Err(PoolError::BadBoundary { address }) => {
            println!("Caught bad boundary at {address:#x}");
        }
        other => println!("Unexpected outcome: {other:?}"),
    }

    // SAFETY: `block` is still live and freed exactly once here.
    unsafe { pool.free(block.as_ptr())? };

    println!(
        "Done: {} allocations, {} deallocations",
        pool.stats().allocations,
        pool.stats().deallocations
    );

    Ok(())
}
