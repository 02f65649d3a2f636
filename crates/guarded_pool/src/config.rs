use std::mem::size_of;
use std::num::NonZero;

/// Blocks carved into each page when the builder does not specify a count.
pub const DEFAULT_OBJECTS_PER_PAGE: u32 = 4;

/// Page cap when the builder does not specify one. Zero means unbounded.
pub const DEFAULT_MAX_PAGES: u32 = 3;

/// Bytes occupied by the allocation id in Basic and Extended headers.
pub(crate) const ALLOC_ID_BYTES: usize = size_of::<u32>();

/// Bytes occupied by the wrapping use counter in Extended headers.
pub(crate) const USE_COUNTER_BYTES: usize = size_of::<u16>();

/// Bytes occupied by the flags byte in Basic and Extended headers.
pub(crate) const FLAG_BYTES: usize = 1;

/// Per-block bookkeeping carried immediately in front of each payload.
///
/// The byte layout of every mode is part of the pool's observable contract: clients holding the
/// payload pointer can step backwards over the left pad to read the header.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderMode {
    /// No header bytes. Double-free detection falls back to walking the free list.
    #[default]
    None,

    /// Allocation id (`u32`) followed by a flags byte whose bit 0 is the in-use witness.
    Basic,

    /// `additional` caller-owned bytes, a wrapping use counter (`u16`), the allocation id
    /// (`u32`) and the flags byte, in that order.
    Extended {
        /// Caller-defined bytes placed at the front of the header, zeroed on each allocation.
        additional: u32,
    },

    /// A pointer-sized slot holding an owning pointer to a heap [`BlockNote`] while the block is
    /// in client hands, and null while it is free.
    ///
    /// [`BlockNote`]: crate::BlockNote
    External,
}

impl HeaderMode {
    /// Number of header bytes this mode places in front of each payload.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Basic => ALLOC_ID_BYTES + FLAG_BYTES,
            Self::Extended { additional } => {
                additional as usize + USE_COUNTER_BYTES + ALLOC_ID_BYTES + FLAG_BYTES
            }
            Self::External => size_of::<*mut u8>(),
        }
    }

    /// Whether the header carries an in-use witness, making free-list membership queries O(1).
    #[must_use]
    pub fn has_use_witness(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Pool configuration, immutable after construction except for the `debug` flag.
///
/// Constructed by [`GuardedPoolBuilder`](crate::GuardedPoolBuilder) and exposed through
/// [`GuardedPool::config`](crate::GuardedPool::config).
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    /// Bytes in each client object.
    pub object_size: usize,

    /// Blocks carved into each page.
    pub objects_per_page: NonZero<u32>,

    /// Maximum number of pages the pool may own; zero means unbounded.
    pub max_pages: u32,

    /// Whether signature painting and free-time validation are active.
    pub debug: bool,

    /// Guard bytes on each side of every payload.
    pub pad_bytes: u32,

    /// Per-block header bookkeeping mode.
    pub header: HeaderMode,

    /// Required payload address alignment, a power of two; zero means natural placement.
    pub alignment: u32,

    /// Bypass the pool entirely and forward each request to the raw allocator.
    pub passthrough: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_sizes_match_their_layouts() {
        assert_eq!(HeaderMode::None.size(), 0);
        assert_eq!(HeaderMode::Basic.size(), 5);
        assert_eq!(HeaderMode::Extended { additional: 0 }.size(), 7);
        assert_eq!(HeaderMode::Extended { additional: 9 }.size(), 16);
        assert_eq!(HeaderMode::External.size(), size_of::<*mut u8>());
    }

    #[test]
    fn only_the_bare_mode_lacks_a_use_witness() {
        assert!(!HeaderMode::None.has_use_witness());
        assert!(HeaderMode::Basic.has_use_witness());
        assert!(HeaderMode::Extended { additional: 4 }.has_use_witness());
        assert!(HeaderMode::External.has_use_witness());
    }
}
