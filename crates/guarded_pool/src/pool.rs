use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use crate::builder::GuardedPoolBuilder;
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::free_list::FreeList;
use crate::header;
use crate::layout::BlockLayout;
use crate::page::{Page, PageList};
use crate::signature::{self, ALLOCATED_PATTERN, FREED_PATTERN, PAD_PATTERN};
use crate::stats::PoolStats;

/// A fixed-size object pool allocator.
///
/// The pool hands out uniformly sized memory blocks carved from slab pages and reclaims them to
/// an intrusive free list. In debug mode it paints byte signatures over every region and
/// validates `free` arguments, catching double frees, bad boundaries and pad-byte corruption
/// committed by its clients.
///
/// The pool is single-threaded: it holds raw pointers and is neither `Send` nor `Sync`;
/// callers needing cross-thread access must wrap it in their own synchronization.
///
/// # Example
///
/// ```
/// use guarded_pool::GuardedPool;
///
/// let mut pool = GuardedPool::builder()
///     .object_size(16)
///     .objects_per_page(8)
///     .debug(true)
///     .build()?;
///
/// let block = pool.allocate()?;
///
/// // SAFETY: the pool handed out 16 writable bytes at this address.
/// unsafe { block.as_ptr().cast::<u64>().write_unaligned(42) };
///
/// // SAFETY: `block` came from this pool and has not been freed.
/// unsafe { pool.free(block.as_ptr())? };
///
/// assert_eq!(pool.stats().allocations, 1);
/// assert_eq!(pool.stats().deallocations, 1);
/// # Ok::<(), guarded_pool::PoolError>(())
/// ```
#[derive(Debug)]
pub struct GuardedPool {
    config: PoolConfig,
    layout: BlockLayout,
    pages: PageList,
    free_list: FreeList,
    stats: PoolStats,
}

impl GuardedPool {
    /// Creates a builder for configuring and constructing a [`GuardedPool`].
    pub fn builder() -> GuardedPoolBuilder {
        GuardedPoolBuilder::new()
    }

    /// Creates a pool from a finished configuration. In pooled mode the first page is
    /// provisioned eagerly, so allocation failure surfaces here rather than on first use.
    pub(crate) fn new_inner(config: PoolConfig) -> Result<Self> {
        let layout = BlockLayout::compute(&config);

        let mut pool = Self {
            config,
            layout,
            pages: PageList::new(),
            free_list: FreeList::new(),
            stats: PoolStats {
                object_size: config.object_size,
                page_size: layout.page_size,
                ..PoolStats::default()
            },
        };

        if !pool.config.passthrough {
            pool.create_page()?;
        }

        Ok(pool)
    }

    /// Hands out one block.
    ///
    /// The returned pointer addresses `object_size` writable bytes. When the free list is
    /// empty a new page is provisioned first.
    ///
    /// # Errors
    ///
    /// [`PoolError::PagesExhausted`] when a new page is needed but the page cap is reached;
    /// [`PoolError::OutOfMemory`] when the raw allocator fails. Statistics are untouched on
    /// error.
    pub fn allocate(&mut self) -> Result<NonNull<u8>> {
        self.allocate_inner(None)
    }

    /// Hands out one block tagged with `label`.
    ///
    /// The label is copied into the block's [`BlockNote`](crate::BlockNote) under
    /// [`HeaderMode::External`](crate::HeaderMode::External) and ignored by every other header
    /// mode.
    ///
    /// # Errors
    ///
    /// As [`allocate`](Self::allocate).
    pub fn allocate_labeled(&mut self, label: &str) -> Result<NonNull<u8>> {
        self.allocate_inner(Some(label))
    }

    fn allocate_inner(&mut self, label: Option<&str>) -> Result<NonNull<u8>> {
        #[cfg(debug_assertions)]
        self.integrity_check();

        if self.config.passthrough {
            return self.allocate_raw();
        }

        if self.free_list.is_empty() {
            self.create_page()?;
        }

        // SAFETY: every free-list node lies inside a page this pool owns.
        let payload = unsafe { self.free_list.pop() }
            .expect("a page was just provisioned, so the free list cannot be empty");

        self.stats.free_objects -= 1;
        self.stats.on_allocate();

        // SAFETY: the header sits `payload_to_header` bytes before the payload, inside the
        // owning page; the block was free, so an External slot is null.
        unsafe {
            header::mark_allocated(
                payload.as_ptr().sub(self.layout.payload_to_header()),
                self.config.header,
                self.stats.allocations,
                label,
            );
        }

        if self.config.debug {
            // SAFETY: the pads and payload of this block lie inside the owning page.
            unsafe {
                signature::paint(
                    payload.as_ptr().sub(self.layout.pad_bytes),
                    self.layout.pad_bytes,
                    PAD_PATTERN,
                );
                signature::paint(payload.as_ptr(), self.layout.object_size, ALLOCATED_PATTERN);
                signature::paint(
                    payload.as_ptr().add(self.layout.object_size),
                    self.layout.pad_bytes,
                    PAD_PATTERN,
                );
            }
        }

        Ok(payload)
    }

    /// Passthrough-mode allocation: one raw allocation per request.
    fn allocate_raw(&mut self) -> Result<NonNull<u8>> {
        let layout = Self::raw_layout(self.config.object_size)?;

        // SAFETY: `layout` has non-zero size (the builder rejects zero object sizes).
        let block = NonNull::new(unsafe { alloc(layout) }).ok_or(PoolError::OutOfMemory {
            size: layout.size(),
        })?;

        self.stats.on_allocate();
        Ok(block)
    }

    /// Returns a block to the pool. Passing a null pointer is a silent no-op.
    ///
    /// With debug mode on, the argument is validated before anything changes: it must lie on a
    /// block boundary of an owned page, must not already be free, and its pad bytes must be
    /// intact. With debug mode off the pool trusts its argument.
    ///
    /// # Errors
    ///
    /// [`PoolError::BadBoundary`], [`PoolError::DoubleFree`] or [`PoolError::CorruptedBlock`]
    /// (debug mode only). The pool state, including statistics, is unchanged on error.
    ///
    /// # Safety
    ///
    /// `payload` must be null or a pointer obtained from this pool's
    /// [`allocate`](Self::allocate)/[`allocate_labeled`](Self::allocate_labeled) that has not
    /// been freed since. Debug mode turns violations of this contract into errors; without it
    /// they are undefined behavior, as with any allocator.
    pub unsafe fn free(&mut self, payload: *mut u8) -> Result<()> {
        let Some(payload) = NonNull::new(payload) else {
            return Ok(());
        };

        if self.config.passthrough {
            // SAFETY: per the contract the pointer came from `allocate` in passthrough mode.
            unsafe { self.free_raw(payload) };
            return Ok(());
        }

        #[cfg(debug_assertions)]
        self.integrity_check();

        if self.config.debug {
            self.locate_block(payload.as_ptr())?;

            // SAFETY: the boundary check above proved this is a block payload of an owned page.
            unsafe {
                if self.is_block_free(payload.as_ptr()) {
                    return Err(PoolError::DoubleFree {
                        address: payload.as_ptr() as usize,
                    });
                }
                if !self.block_pads_intact(payload.as_ptr()) {
                    return Err(PoolError::CorruptedBlock {
                        address: payload.as_ptr() as usize,
                    });
                }
            }
        }

        self.stats.on_free();
        self.stats.free_objects += 1;

        // SAFETY: per the contract (or the debug checks above) `payload` is a live block of an
        // owned page; its header sits `payload_to_header` bytes before it.
        unsafe {
            header::mark_freed(
                payload.as_ptr().sub(self.layout.payload_to_header()),
                self.config.header,
            );
        }

        if self.config.debug {
            // SAFETY: the payload lies inside the owning page.
            unsafe {
                signature::paint(payload.as_ptr(), self.layout.object_size, FREED_PATTERN);
            }
        }

        // SAFETY: the block is a payload of an owned page and is no longer in client hands.
        unsafe { self.free_list.push(payload.as_ptr()) };

        Ok(())
    }

    /// Passthrough-mode free.
    ///
    /// # Safety
    ///
    /// `payload` must have been returned by a passthrough-mode `allocate` of this pool and not
    /// freed since.
    unsafe fn free_raw(&mut self, payload: NonNull<u8>) {
        let layout = Self::raw_layout(self.config.object_size)
            .expect("the same layout was computed when the block was handed out");

        // SAFETY: per the contract the allocation was made with this exact layout.
        unsafe { dealloc(payload.as_ptr(), layout) };

        self.stats.on_free();
    }

    fn raw_layout(object_size: usize) -> Result<Layout> {
        Layout::array::<u8>(object_size).map_err(|_| PoolError::OutOfMemory { size: object_size })
    }

    /// Provisions, formats and links one new page.
    fn create_page(&mut self) -> Result<()> {
        if self.config.max_pages > 0 && self.stats.pages_in_use >= self.config.max_pages {
            return Err(PoolError::PagesExhausted {
                max_pages: self.config.max_pages,
            });
        }

        let page = Page::allocate(&self.layout)?;

        // SAFETY: the page is freshly allocated, unshared and not yet on any list.
        unsafe {
            self.pages.push(page);
            page.format(&self.layout, self.config.debug, &mut self.free_list);
        }

        self.stats.pages_in_use += 1;
        self.stats.free_objects += self.config.objects_per_page.get();

        Ok(())
    }

    /// Invokes `callback(payload, object_size)` for every block currently in client hands and
    /// returns how many there were.
    ///
    /// The callback must not reenter the pool.
    pub fn dump_memory_in_use(&self, mut callback: impl FnMut(*const u8, usize)) -> u32 {
        let mut in_use = 0;

        for page in self.pages.iter() {
            for payload in page.payloads(&self.layout) {
                // SAFETY: `payload` is a block payload of an owned page.
                if !unsafe { self.is_block_free(payload) } {
                    in_use += 1;
                    callback(payload.cast_const(), self.layout.object_size);
                }
            }
        }

        in_use
    }

    /// Invokes `callback(payload, object_size)` for every block, free or allocated, whose pad
    /// bytes no longer carry the guard pattern, and returns how many there were.
    ///
    /// Returns 0 without invoking the callback when debug mode is off or no pad bytes are
    /// configured. The callback must not reenter the pool.
    pub fn validate_pages(&self, mut callback: impl FnMut(*const u8, usize)) -> u32 {
        if !self.config.debug || self.config.pad_bytes == 0 {
            return 0;
        }

        let mut corrupted = 0;

        for page in self.pages.iter() {
            for payload in page.payloads(&self.layout) {
                // SAFETY: `payload` and its pads lie inside an owned page.
                if !unsafe { self.block_pads_intact(payload) } {
                    corrupted += 1;
                    callback(payload.cast_const(), self.layout.object_size);
                }
            }
        }

        corrupted
    }

    /// Releases every page whose blocks are all free and returns how many pages were released.
    pub fn free_empty_pages(&mut self) -> u32 {
        let mut freed = 0;
        let mut prev: Option<Page> = None;
        let mut cursor = self.pages.head_page();

        while let Some(page) = cursor {
            // SAFETY: `page` is a live member of the page list.
            let next = unsafe { page.next() };

            if self.is_page_empty(page) {
                // SAFETY: free-list nodes all lie in owned pages; the culled range is exactly
                // this page.
                let culled = unsafe {
                    self.free_list
                        .cull_page(page.base().as_ptr(), self.layout.page_size)
                };
                self.stats.free_objects -= culled;

                // SAFETY: `prev` is `page`'s predecessor on the list (or `page` is the head).
                unsafe { self.pages.unlink(page, prev) };

                // SAFETY: the page is unlinked and its blocks are all free, so releasing it
                // invalidates no client pointers.
                unsafe { page.release(&self.layout, self.config.header) };

                self.stats.pages_in_use -= 1;
                freed += 1;
            } else {
                prev = Some(page);
            }

            cursor = next;
        }

        freed
    }

    /// Turns debug mode on or off at runtime.
    ///
    /// Signatures are painted when pages are formatted and blocks change hands, so pad
    /// validation is reliable only for blocks allocated while debug mode was on.
    pub fn set_debug_enabled(&mut self, enabled: bool) {
        self.config.debug = enabled;
    }

    /// Whether debug mode is currently active.
    #[must_use]
    pub fn debug_enabled(&self) -> bool {
        self.config.debug
    }

    /// The pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The computed byte-placement numbers.
    #[must_use]
    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// The running statistics.
    #[must_use]
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Payload address of the most recently freed block; null when the free list is empty.
    #[must_use]
    pub fn free_list_head(&self) -> *const u8 {
        self.free_list.head()
    }

    /// Base address of the most recently provisioned page; null when no pages are owned.
    #[must_use]
    pub fn page_list_head(&self) -> *const u8 {
        self.pages.head()
    }

    /// Checks that `payload` lies on a block boundary of an owned page.
    fn locate_block(&self, payload: *const u8) -> Result<()> {
        let address = payload as usize;

        for page in self.pages.iter() {
            if !page.contains(address, &self.layout) {
                continue;
            }

            let first = page.first_payload(&self.layout) as usize;
            if address >= first && (address - first) % self.layout.block_stride == 0 {
                return Ok(());
            }
            return Err(PoolError::BadBoundary { address });
        }

        Err(PoolError::BadBoundary { address })
    }

    /// Whether the block at `payload` is currently free.
    ///
    /// O(1) via the header witness when the mode carries one, otherwise a free-list walk.
    ///
    /// # Safety
    ///
    /// `payload` must be a block payload of an owned page.
    unsafe fn is_block_free(&self, payload: *const u8) -> bool {
        // SAFETY: the header sits `payload_to_header` bytes before the payload, in-page.
        let witness = unsafe {
            header::is_marked_in_use(
                payload.sub(self.layout.payload_to_header()),
                self.config.header,
            )
        };

        match witness {
            Some(in_use) => !in_use,
            // SAFETY: free-list nodes all lie in owned pages.
            None => unsafe { self.free_list.contains(payload) },
        }
    }

    /// Whether both pad regions of the block at `payload` still carry the guard pattern.
    ///
    /// # Safety
    ///
    /// `payload` must be a block payload of an owned page.
    unsafe fn block_pads_intact(&self, payload: *const u8) -> bool {
        let pad = self.layout.pad_bytes;

        // SAFETY: the pads flank the payload inside the owning page.
        unsafe {
            signature::is_painted(payload.sub(pad), pad, PAD_PATTERN)
                && signature::is_painted(payload.add(self.layout.object_size), pad, PAD_PATTERN)
        }
    }

    /// Whether every block of `page` is on the free list.
    fn is_page_empty(&self, page: Page) -> bool {
        page.payloads(&self.layout).all(|payload| {
            // SAFETY: `payload` is a block payload of an owned page.
            unsafe { self.is_block_free(payload) }
        })
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    fn integrity_check(&self) {
        if self.config.passthrough {
            return;
        }

        let pages = u32::try_from(self.pages.iter().count()).expect("page count fits in u32");
        assert_eq!(
            pages, self.stats.pages_in_use,
            "page inventory does not match pages_in_use"
        );
        assert_eq!(
            self.stats.objects_in_use + self.stats.free_objects,
            self.stats.pages_in_use * self.config.objects_per_page.get(),
            "block inventory does not match the page inventory"
        );
        assert_eq!(
            self.stats.allocations - self.stats.deallocations,
            self.stats.objects_in_use,
            "lifetime counters do not match objects_in_use"
        );

        // Every free-list node must be a block payload of an owned page, seen exactly once.
        let mut seen = 0_u32;
        let mut cursor = self.free_list.head();
        while !cursor.is_null() {
            assert!(
                self.locate_block(cursor).is_ok(),
                "free-list node {cursor:p} is not a block payload of any owned page"
            );
            seen += 1;
            assert!(
                seen <= self.stats.free_objects,
                "free list is longer than free_objects (cycle or stray node)"
            );
            // SAFETY: the node was just validated as a payload inside an owned page.
            cursor = unsafe { cursor.cast::<*const u8>().read_unaligned() };
        }
        assert_eq!(
            seen, self.stats.free_objects,
            "free list length does not match free_objects"
        );
    }
}

impl Drop for GuardedPool {
    fn drop(&mut self) {
        let mut cursor = self.pages.head_page();

        while let Some(page) = cursor {
            // SAFETY: `page` is a live member of the page list.
            cursor = unsafe { page.next() };

            // SAFETY: the pool is being destroyed, so no client pointer outlives this; External
            // records of blocks the client never freed are dropped inside `release`.
            unsafe { page.release(&self.layout, self.config.header) };
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::mem::size_of;

    use super::*;
    use crate::config::HeaderMode;
    use crate::header::BlockNote;
    use crate::signature::UNALLOCATED_PATTERN;

    /// Object size used throughout: the platform pointer width, the smallest size a pooled
    /// block can have.
    const OBJ: usize = size_of::<*mut u8>();

    fn header_of(pool: &GuardedPool, payload: NonNull<u8>) -> *mut u8 {
        unsafe { payload.as_ptr().sub(pool.layout().payload_to_header()) }
    }

    #[test]
    fn basic_cycle_reuses_blocks_in_lifo_order() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(2)
            .max_pages(1)
            .debug(true)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        assert!(matches!(
            pool.allocate(),
            Err(PoolError::PagesExhausted { max_pages: 1 })
        ));

        let stats = pool.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.objects_in_use, 2);
        assert_eq!(stats.free_objects, 0);

        unsafe {
            pool.free(a.as_ptr()).unwrap();
            pool.free(b.as_ptr()).unwrap();
        }

        let d = pool.allocate().unwrap();
        let e = pool.allocate().unwrap();
        assert_eq!(d, b);
        assert_eq!(e, a);
    }

    #[test]
    fn failed_allocation_leaves_statistics_untouched() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(1)
            .max_pages(1)
            .build()
            .unwrap();

        let _block = pool.allocate().unwrap();
        let before = *pool.stats();

        assert!(pool.allocate().is_err());
        assert_eq!(*pool.stats(), before);
    }

    #[test]
    fn double_free_is_detected() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(2)
            .max_pages(1)
            .debug(true)
            .header(HeaderMode::Basic)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();

        unsafe {
            pool.free(a.as_ptr()).unwrap();

            let before = *pool.stats();
            assert!(matches!(
                pool.free(a.as_ptr()),
                Err(PoolError::DoubleFree { .. })
            ));
            assert_eq!(*pool.stats(), before);
        }
    }

    #[test]
    fn double_free_is_detected_without_any_header() {
        // With no header the witness is gone; detection falls back to walking the free list.
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(4)
            .debug(true)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();

        unsafe {
            pool.free(a.as_ptr()).unwrap();
            assert!(matches!(
                pool.free(a.as_ptr()),
                Err(PoolError::DoubleFree { .. })
            ));
        }
    }

    #[test]
    fn trampled_pad_bytes_are_detected() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(2)
            .debug(true)
            .pad_bytes(2)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();

        unsafe {
            // One byte past the payload: right into the right pad.
            a.as_ptr().add(OBJ).write(0x42);

            let before = *pool.stats();
            assert!(matches!(
                pool.free(a.as_ptr()),
                Err(PoolError::CorruptedBlock { .. })
            ));
            assert_eq!(*pool.stats(), before);
        }

        let mut reported = Vec::new();
        let corrupted = pool.validate_pages(|payload, size| {
            reported.push((payload, size));
        });

        assert_eq!(corrupted, 1);
        assert_eq!(reported, vec![(a.as_ptr().cast_const(), OBJ)]);
    }

    #[test]
    fn misaligned_pointers_are_rejected_at_the_boundary_check() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(2)
            .debug(true)
            .pad_bytes(2)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();

        unsafe {
            assert!(matches!(
                pool.free(a.as_ptr().add(1)),
                Err(PoolError::BadBoundary { .. })
            ));

            // A pointer outside every page is also a boundary violation.
            let mut foreign = 0_u64;
            assert!(matches!(
                pool.free((&raw mut foreign).cast::<u8>()),
                Err(PoolError::BadBoundary { .. })
            ));

            pool.free(a.as_ptr()).unwrap();
        }
    }

    #[test]
    fn empty_pages_are_reclaimed() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(2)
            .max_pages(0)
            .header(HeaderMode::Basic)
            .build()
            .unwrap();

        // Three live blocks force a second page.
        let blocks: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.stats().pages_in_use, 2);

        for block in &blocks {
            unsafe { pool.free(block.as_ptr()).unwrap() };
        }

        assert_eq!(pool.free_empty_pages(), 2);
        assert_eq!(pool.stats().pages_in_use, 0);
        assert_eq!(pool.stats().free_objects, 0);
        assert!(pool.page_list_head().is_null());
        assert!(pool.free_list_head().is_null());

        // A second sweep finds nothing; a new allocation provisions a fresh page.
        assert_eq!(pool.free_empty_pages(), 0);
        let _block = pool.allocate().unwrap();
        assert_eq!(pool.stats().pages_in_use, 1);
    }

    #[test]
    fn partially_used_pages_survive_reclamation() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(2)
            .max_pages(0)
            .header(HeaderMode::Basic)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        assert_eq!(pool.stats().pages_in_use, 2);

        // Only the second page (holding `c`) drains completely.
        unsafe {
            pool.free(c.as_ptr()).unwrap();
            pool.free(b.as_ptr()).unwrap();
        }

        assert_eq!(pool.free_empty_pages(), 1);
        assert_eq!(pool.stats().pages_in_use, 1);
        assert_eq!(pool.stats().free_objects, 1);

        // The surviving page still serves its free block and the live one stays valid.
        let d = pool.allocate().unwrap();
        assert_eq!(d, b);
        unsafe {
            pool.free(d.as_ptr()).unwrap();
            pool.free(a.as_ptr()).unwrap();
        }
    }

    #[test]
    fn external_records_are_reclaimed_at_drop() {
        let dropped_before = crate::header::notes_dropped();

        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(2)
            .header(HeaderMode::External)
            .build()
            .unwrap();

        let a = pool.allocate_labeled("alpha").unwrap();
        let b = pool.allocate_labeled("beta").unwrap();

        let note = unsafe {
            &*header_of(&pool, a)
                .cast_const()
                .cast::<*const BlockNote>()
                .read_unaligned()
        };
        assert!(note.in_use);
        assert_eq!(note.label.as_deref(), Some("alpha"));
        assert_eq!(note.allocation, 1);

        // One record dies with its block, the other is still owned when the pool goes away.
        unsafe { pool.free(b.as_ptr()).unwrap() };
        assert_eq!(crate::header::notes_dropped(), dropped_before + 1);

        // The teardown page walk must reclaim the record `a` still owns.
        drop(pool);
        assert_eq!(crate::header::notes_dropped(), dropped_before + 2);
    }

    #[test]
    fn external_records_die_with_their_block() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(2)
            .header(HeaderMode::External)
            .build()
            .unwrap();

        let a = pool.allocate_labeled("beta").unwrap();
        let header = header_of(&pool, a);

        unsafe {
            assert!(!header.cast_const().cast::<*const BlockNote>().read_unaligned().is_null());

            let dropped_before = crate::header::notes_dropped();
            pool.free(a.as_ptr()).unwrap();

            assert_eq!(crate::header::notes_dropped(), dropped_before + 1);
            assert!(header.cast_const().cast::<*const BlockNote>().read_unaligned().is_null());
        }
    }

    #[test]
    fn immediate_reuse_returns_the_block_just_freed() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(4)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();
        unsafe { pool.free(a.as_ptr()).unwrap() };

        let b = pool.allocate().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn payloads_honor_the_configured_alignment() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .objects_per_page(3)
            .max_pages(0)
            .header(HeaderMode::Basic)
            .pad_bytes(3)
            .alignment(16)
            .build()
            .unwrap();

        // Enough allocations to span multiple pages.
        for _ in 0..10 {
            let block = pool.allocate().unwrap();
            assert_eq!(block.as_ptr() as usize % 16, 0);
        }
        assert!(pool.stats().pages_in_use > 1);
    }

    #[test]
    fn debug_painting_tracks_the_block_state() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .objects_per_page(2)
            .debug(true)
            .pad_bytes(2)
            .build()
            .unwrap();

        let link = size_of::<*mut u8>();

        // A block that has never been handed out carries the unallocated pattern beyond its
        // embedded free-list link.
        let fresh = pool.free_list_head();
        unsafe {
            assert!(signature::is_painted(
                fresh.add(link),
                16 - link,
                UNALLOCATED_PATTERN
            ));
        }

        let a = pool.allocate().unwrap();
        unsafe {
            assert!(signature::is_painted(
                a.as_ptr().cast_const(),
                16,
                ALLOCATED_PATTERN
            ));
            assert!(signature::is_painted(
                a.as_ptr().cast_const().sub(2),
                2,
                PAD_PATTERN
            ));
            assert!(signature::is_painted(
                a.as_ptr().cast_const().add(16),
                2,
                PAD_PATTERN
            ));

            pool.free(a.as_ptr()).unwrap();

            // After the free the pads are intact and the payload carries the freed pattern
            // beyond the re-embedded link.
            assert!(signature::is_painted(
                a.as_ptr().cast_const().add(link),
                16 - link,
                FREED_PATTERN
            ));
            assert!(signature::is_painted(
                a.as_ptr().cast_const().sub(2),
                2,
                PAD_PATTERN
            ));
        }
    }

    #[test]
    fn freeing_null_is_a_no_op() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .debug(true)
            .build()
            .unwrap();

        let before = *pool.stats();
        unsafe { pool.free(std::ptr::null_mut()).unwrap() };
        assert_eq!(*pool.stats(), before);
    }

    #[test]
    fn block_inventory_invariants_hold_through_a_workload() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(4)
            .max_pages(0)
            .header(HeaderMode::Basic)
            .build()
            .unwrap();

        let mut live = Vec::new();

        for round in 0..8 {
            for _ in 0..round {
                live.push(pool.allocate().unwrap());
            }
            while live.len() > round / 2 {
                let block = live.pop().unwrap();
                unsafe { pool.free(block.as_ptr()).unwrap() };
            }

            let stats = pool.stats();
            assert_eq!(
                stats.objects_in_use + stats.free_objects,
                stats.pages_in_use * 4
            );
            assert_eq!(stats.allocations - stats.deallocations, stats.objects_in_use);
            assert!(stats.most_objects >= stats.objects_in_use);
        }
    }

    #[test]
    fn passthrough_skips_the_pool_machinery() {
        let mut pool = GuardedPool::builder()
            .object_size(24)
            .passthrough(true)
            .debug(true)
            .build()
            .unwrap();

        assert!(pool.page_list_head().is_null());
        assert!(pool.free_list_head().is_null());

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.objects_in_use, 2);
        assert_eq!(stats.most_objects, 2);
        assert_eq!(stats.free_objects, 0);
        assert_eq!(stats.pages_in_use, 0);

        // No pages means nothing to dump, validate or reclaim.
        assert_eq!(pool.dump_memory_in_use(|_, _| panic!("no pooled blocks")), 0);
        assert_eq!(pool.validate_pages(|_, _| panic!("no pooled blocks")), 0);
        assert_eq!(pool.free_empty_pages(), 0);

        unsafe {
            pool.free(a.as_ptr()).unwrap();
            pool.free(b.as_ptr()).unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.deallocations, 2);
        assert_eq!(stats.objects_in_use, 0);
        assert_eq!(stats.free_objects, 0);
    }

    #[test]
    fn dump_reports_exactly_the_live_blocks() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(4)
            .header(HeaderMode::Basic)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        unsafe { pool.free(b.as_ptr()).unwrap() };

        let mut reported = Vec::new();
        let count = pool.dump_memory_in_use(|payload, size| {
            assert_eq!(size, OBJ);
            reported.push(payload);
        });

        assert_eq!(count, 2);
        assert!(reported.contains(&a.as_ptr().cast_const()));
        assert!(reported.contains(&c.as_ptr().cast_const()));
        assert!(!reported.contains(&b.as_ptr().cast_const()));
    }

    #[test]
    fn header_witness_agrees_with_the_free_list() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(2)
            .header(HeaderMode::Basic)
            .debug(true)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        unsafe { pool.free(a.as_ptr()).unwrap() };

        // `a` is free: witness clear and present on the list. `b` is live: the opposite.
        unsafe {
            let a_flags = header_of(&pool, a).add(4).read();
            let b_flags = header_of(&pool, b).add(4).read();
            assert_eq!(a_flags & 0x1, 0);
            assert_eq!(b_flags & 0x1, 0x1);
        }

        assert_eq!(pool.free_list_head(), a.as_ptr().cast_const());
    }

    #[test]
    fn basic_header_carries_the_allocation_ordinal() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(2)
            .header(HeaderMode::Basic)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        unsafe {
            assert_eq!(header_of(&pool, a).cast::<u32>().read_unaligned(), 1);
            assert_eq!(header_of(&pool, b).cast::<u32>().read_unaligned(), 2);

            pool.free(a.as_ptr()).unwrap();
            assert_eq!(header_of(&pool, a).cast::<u32>().read_unaligned(), 0);

            // Reuse keeps counting: the third allocation is ordinal 3.
            let c = pool.allocate().unwrap();
            assert_eq!(c, a);
            assert_eq!(header_of(&pool, c).cast::<u32>().read_unaligned(), 3);
        }
    }

    #[test]
    fn extended_header_counts_block_reuse() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(2)
            .header(HeaderMode::Extended { additional: 4 })
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();
        let counter_at = unsafe { header_of(&pool, a).add(4).cast::<u16>() };

        unsafe {
            assert_eq!(counter_at.read_unaligned(), 1);

            pool.free(a.as_ptr()).unwrap();
            assert_eq!(counter_at.read_unaligned(), 1);

            let b = pool.allocate().unwrap();
            assert_eq!(b, a);
            assert_eq!(counter_at.read_unaligned(), 2);

            pool.free(b.as_ptr()).unwrap();
        }
    }

    #[test]
    fn validation_is_inert_without_debug_mode() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(2)
            .pad_bytes(2)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();
        unsafe {
            // Trample the pad; with debug off nobody looks at it.
            a.as_ptr().add(OBJ).write(0x42);
        }

        assert_eq!(pool.validate_pages(|_, _| panic!("debug is off")), 0);

        // Toggling debug mid-flight turns validation back on.
        pool.set_debug_enabled(true);
        assert!(pool.debug_enabled());
        assert_eq!(pool.validate_pages(|_, _| {}), 2);

        pool.set_debug_enabled(false);
        assert_eq!(pool.validate_pages(|_, _| panic!("debug is off")), 0);
    }

    #[test]
    fn page_list_head_tracks_the_newest_page() {
        let mut pool = GuardedPool::builder()
            .object_size(OBJ)
            .objects_per_page(1)
            .max_pages(0)
            .build()
            .unwrap();

        let first_page = pool.page_list_head();
        assert!(!first_page.is_null());

        let _a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();

        // The second allocation forced a new page to the head of the list.
        assert_ne!(pool.page_list_head(), first_page);
        assert_eq!(pool.stats().pages_in_use, 2);
    }
}
