use thiserror::Error;

/// Errors raised by pool operations.
///
/// The boundary, double-free and corruption variants are only produced while debug mode is
/// active; with debug off, [`free`](crate::GuardedPool::free) trusts its argument.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The raw allocator could not provide the requested memory.
    #[error("raw allocation of {size} bytes failed")]
    OutOfMemory {
        /// Number of bytes that were requested.
        size: usize,
    },

    /// The configured page cap has been reached and no free blocks remain.
    #[error("page limit of {max_pages} pages reached")]
    PagesExhausted {
        /// The configured maximum number of pages.
        max_pages: u32,
    },

    /// The pointer handed to `free` is not a block payload of any owned page.
    #[error("pointer {address:#x} is not on a block boundary of any owned page")]
    BadBoundary {
        /// The offending address.
        address: usize,
    },

    /// The block handed to `free` is already on the free list.
    #[error("block at {address:#x} has already been freed")]
    DoubleFree {
        /// The payload address of the block.
        address: usize,
    },

    /// The pad bytes flanking the block no longer carry the guard pattern.
    #[error("pad bytes of the block at {address:#x} have been overwritten")]
    CorruptedBlock {
        /// The payload address of the block.
        address: usize,
    },
}

/// Shorthand for results produced by pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
