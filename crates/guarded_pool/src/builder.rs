use std::mem::size_of;
use std::num::NonZero;

use crate::GuardedPool;
use crate::config::{DEFAULT_MAX_PAGES, DEFAULT_OBJECTS_PER_PAGE, HeaderMode, PoolConfig};
use crate::error::Result;

/// Builder for [`GuardedPool`].
///
/// `object_size` must be set before calling [`build`](Self::build); every other option has a
/// default.
///
/// # Examples
///
/// ```
/// use guarded_pool::{GuardedPool, HeaderMode};
///
/// let pool = GuardedPool::builder()
///     .object_size(32)
///     .objects_per_page(16)
///     .max_pages(0)
///     .debug(true)
///     .pad_bytes(4)
///     .header(HeaderMode::Basic)
///     .build()?;
///
/// assert_eq!(pool.stats().free_objects, 16);
/// # Ok::<(), guarded_pool::PoolError>(())
/// ```
#[derive(Debug)]
#[must_use]
pub struct GuardedPoolBuilder {
    object_size: Option<usize>,
    objects_per_page: NonZero<u32>,
    max_pages: u32,
    debug: bool,
    pad_bytes: u32,
    header: HeaderMode,
    alignment: u32,
    passthrough: bool,
}

impl GuardedPoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            object_size: None,
            objects_per_page: NonZero::new(DEFAULT_OBJECTS_PER_PAGE)
                .expect("default objects-per-page is a non-zero constant"),
            max_pages: DEFAULT_MAX_PAGES,
            debug: false,
            pad_bytes: 0,
            header: HeaderMode::None,
            alignment: 0,
            passthrough: false,
        }
    }

    /// Sets the byte size of each client object. Required.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn object_size(mut self, size: usize) -> Self {
        assert!(size > 0, "objects must have non-zero size");
        self.object_size = Some(size);
        self
    }

    /// Sets the object size from a type.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    pub fn object_size_of<T>(self) -> Self {
        self.object_size(size_of::<T>())
    }

    /// Sets how many blocks are carved into each page.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn objects_per_page(mut self, count: u32) -> Self {
        self.objects_per_page =
            NonZero::new(count).expect("pages must hold at least one object");
        self
    }

    /// Caps the number of pages the pool may own. Zero means unbounded.
    pub fn max_pages(mut self, count: u32) -> Self {
        self.max_pages = count;
        self
    }

    /// Enables or disables debug mode: signature painting plus boundary, double-free and pad
    /// validation in [`free`](GuardedPool::free).
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Sets the number of guard bytes painted on each side of every payload.
    pub fn pad_bytes(mut self, count: u32) -> Self {
        self.pad_bytes = count;
        self
    }

    /// Selects the per-block header bookkeeping mode.
    pub fn header(mut self, mode: HeaderMode) -> Self {
        self.header = mode;
        self
    }

    /// Requires every payload address to be a multiple of `alignment`, which must be a power
    /// of two ([`build`](Self::build) rejects anything else). Zero means natural placement.
    pub fn alignment(mut self, alignment: u32) -> Self {
        self.alignment = alignment;
        self
    }

    /// Bypasses the pool entirely: every request is forwarded to the raw allocator, with no
    /// pages, free list, headers or debug painting.
    pub fn passthrough(mut self, enabled: bool) -> Self {
        self.passthrough = enabled;
        self
    }

    /// Builds the pool. In pooled mode the first page is provisioned eagerly.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::OutOfMemory`](crate::PoolError::OutOfMemory) if the raw allocator
    /// cannot provide the first page.
    ///
    /// # Panics
    ///
    /// Panics if no object size was set, if a pooled object is smaller than a pointer (the
    /// free-list link is embedded in the payload and must fit inside it), or if `alignment` is
    /// neither zero nor a power of two (no allocator can promise an absolute address
    /// congruence for other values).
    pub fn build(self) -> Result<GuardedPool> {
        let object_size = self
            .object_size
            .expect("object size must be set with .object_size() or .object_size_of::<T>() before calling .build()");

        assert!(
            self.alignment == 0 || self.alignment.is_power_of_two(),
            "alignment must be zero or a power of two"
        );

        if !self.passthrough {
            assert!(
                object_size >= size_of::<*mut u8>(),
                "pooled objects must be at least pointer-width so the free-list link fits in the payload"
            );
        }

        GuardedPool::new_inner(PoolConfig {
            object_size,
            objects_per_page: self.objects_per_page,
            max_pages: self.max_pages,
            debug: self.debug,
            pad_bytes: self.pad_bytes,
            header: self.header,
            alignment: self.alignment,
            passthrough: self.passthrough,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let pool = GuardedPoolBuilder::new().object_size(16).build().unwrap();

        let config = pool.config();
        assert_eq!(config.objects_per_page.get(), DEFAULT_OBJECTS_PER_PAGE);
        assert_eq!(config.max_pages, DEFAULT_MAX_PAGES);
        assert!(!config.debug);
        assert_eq!(config.pad_bytes, 0);
        assert_eq!(config.header, HeaderMode::None);
        assert_eq!(config.alignment, 0);
        assert!(!config.passthrough);
    }

    #[test]
    fn object_size_of_uses_the_type_size() {
        let pool = GuardedPoolBuilder::new()
            .object_size_of::<u64>()
            .build()
            .unwrap();

        assert_eq!(pool.config().object_size, size_of::<u64>());
    }

    #[test]
    #[should_panic(expected = "non-zero size")]
    fn zero_object_size_panics() {
        drop(GuardedPoolBuilder::new().object_size(0));
    }

    #[test]
    #[should_panic(expected = "object size must be set")]
    fn missing_object_size_panics() {
        drop(GuardedPoolBuilder::new().build());
    }

    #[test]
    #[should_panic(expected = "at least pointer-width")]
    fn undersized_pooled_object_panics() {
        drop(
            GuardedPoolBuilder::new()
                .object_size(size_of::<*mut u8>() / 2)
                .build(),
        );
    }

    #[test]
    fn passthrough_accepts_tiny_objects() {
        let pool = GuardedPoolBuilder::new()
            .object_size(1)
            .passthrough(true)
            .build()
            .unwrap();

        assert!(pool.config().passthrough);
    }

    #[test]
    #[should_panic(expected = "at least one object")]
    fn zero_objects_per_page_panics() {
        drop(GuardedPoolBuilder::new().object_size(16).objects_per_page(0));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_alignment_panics() {
        drop(
            GuardedPoolBuilder::new()
                .object_size(16)
                .alignment(12)
                .build(),
        );
    }
}
