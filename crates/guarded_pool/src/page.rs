//! Page provisioning and teardown.
//!
//! Pages are raw allocations linked into a singly-linked list through their first
//! pointer-width bytes. Everything after the link (alignment filler, headers, pads and
//! payloads) is carved up according to the [`BlockLayout`].

use std::alloc::{alloc_zeroed, dealloc};
use std::ptr::{self, NonNull};

use crate::config::HeaderMode;
use crate::error::{PoolError, Result};
use crate::free_list::FreeList;
use crate::header;
use crate::layout::{BlockLayout, LINK_BYTES};
use crate::signature::{self, ALIGN_PATTERN, PAD_PATTERN, UNALLOCATED_PATTERN};

/// One slab page owned by the pool.
///
/// This is a borrowed view over the raw allocation; ownership and teardown responsibility stay
/// with the pool, which releases every page through [`Page::release`].
#[derive(Clone, Copy, Debug)]
pub(crate) struct Page {
    base: NonNull<u8>,
}

impl Page {
    /// Requests a zero-filled page from the raw allocator.
    ///
    /// The zero fill doubles as the fresh header state: External slots start null and
    /// Basic/Extended ids, counters and flag bytes start cleared.
    pub(crate) fn allocate(layout: &BlockLayout) -> Result<Self> {
        let page_layout = layout.page_layout();

        // SAFETY: `page_layout` has non-zero size; it contains at least the page link.
        let base = unsafe { alloc_zeroed(page_layout) };

        NonNull::new(base)
            .map(|base| Self { base })
            .ok_or(PoolError::OutOfMemory {
                size: page_layout.size(),
            })
    }

    pub(crate) fn base(self) -> NonNull<u8> {
        self.base
    }

    pub(crate) fn addr(self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Whether `address` falls inside this page.
    pub(crate) fn contains(self, address: usize, layout: &BlockLayout) -> bool {
        address >= self.addr() && address < self.addr() + layout.page_size
    }

    /// Reads the next-page link stored at the page base.
    ///
    /// # Safety
    ///
    /// The page must be live (allocated and not yet released).
    pub(crate) unsafe fn next(self) -> Option<Page> {
        // SAFETY: the first pointer-width bytes of a live page hold the next-page link, and the
        // raw allocation is at least pointer-aligned.
        let next = unsafe { self.base.as_ptr().cast::<*mut u8>().read() };
        NonNull::new(next).map(|base| Page { base })
    }

    /// Writes the next-page link at the page base.
    ///
    /// # Safety
    ///
    /// The page must be live (allocated and not yet released).
    pub(crate) unsafe fn set_next(self, next: *mut u8) {
        // SAFETY: as in `next`.
        unsafe { self.base.as_ptr().cast::<*mut u8>().write(next) };
    }

    /// Address of the first payload in this page.
    pub(crate) fn first_payload(self, layout: &BlockLayout) -> *mut u8 {
        // SAFETY: the first payload offset is inside the page by construction.
        unsafe { self.base.as_ptr().add(layout.first_payload_offset()) }
    }

    /// Payload addresses of every block in this page, in ascending address order.
    pub(crate) fn payloads(self, layout: &BlockLayout) -> impl Iterator<Item = *mut u8> {
        let first = self.first_payload(layout);
        let stride = layout.block_stride;

        (0..layout.objects_per_page).map(move |index| {
            // SAFETY: block `index` starts inside the page for every index below the per-page
            // block count.
            unsafe { first.add(index * stride) }
        })
    }

    /// Formats a fresh page: paints the debug signatures and threads every block onto
    /// `free_list`, lowest address first, so the highest-address block surfaces first on pop.
    ///
    /// # Safety
    ///
    /// The page must be freshly allocated with `layout` and not yet visible to any client.
    pub(crate) unsafe fn format(self, layout: &BlockLayout, debug: bool, free_list: &mut FreeList) {
        if debug {
            // SAFETY: the left filler sits right after the page link, inside the page.
            unsafe {
                signature::paint(
                    self.base.as_ptr().add(LINK_BYTES),
                    layout.left_align,
                    ALIGN_PATTERN,
                );
            }
        }

        for (index, payload) in self.payloads(layout).enumerate() {
            if debug {
                // SAFETY: the pads and payload of block `index` lie inside the page; the
                // trailing filler exists for every block but the last.
                unsafe {
                    signature::paint(payload.sub(layout.pad_bytes), layout.pad_bytes, PAD_PATTERN);
                    signature::paint(payload, layout.object_size, UNALLOCATED_PATTERN);
                    signature::paint(
                        payload.add(layout.object_size),
                        layout.pad_bytes,
                        PAD_PATTERN,
                    );
                    if index + 1 < layout.objects_per_page {
                        signature::paint(
                            payload.add(layout.object_size + layout.pad_bytes),
                            layout.inter_align,
                            ALIGN_PATTERN,
                        );
                    }
                }
            }

            // SAFETY: `payload` is a block payload of this freshly owned page, at least
            // pointer-width bytes long (the builder enforces the size floor), and on no list.
            unsafe { free_list.push(payload) };
        }
    }

    /// Releases the raw page memory.
    ///
    /// For External headers, any record still owned by a block on this page is dropped first;
    /// at pool destruction live blocks still hold their records.
    ///
    /// # Safety
    ///
    /// The page must have been produced by [`Page::allocate`] with the same `layout`, must be
    /// unlinked from the page list, and must not be used afterwards.
    pub(crate) unsafe fn release(self, layout: &BlockLayout, header_mode: HeaderMode) {
        if header_mode == HeaderMode::External {
            for payload in self.payloads(layout) {
                // SAFETY: the header slot sits `payload_to_header` bytes before each payload,
                // inside this page; `mark_freed` tolerates already-null slots.
                unsafe {
                    header::mark_freed(
                        payload.sub(layout.payload_to_header()),
                        HeaderMode::External,
                    );
                }
            }
        }

        // SAFETY: the allocation was produced by `alloc_zeroed` with this exact layout.
        unsafe { dealloc(self.base.as_ptr(), layout.page_layout()) };
    }
}

/// Singly-linked list of owned pages, newest first.
#[derive(Debug)]
pub(crate) struct PageList {
    head: *mut u8,
}

impl PageList {
    pub(crate) fn new() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    /// Base address of the newest page, null when no pages are owned.
    pub(crate) fn head(&self) -> *const u8 {
        self.head
    }

    pub(crate) fn head_page(&self) -> Option<Page> {
        NonNull::new(self.head).map(|base| Page { base })
    }

    /// Links `page` at the head of the list.
    ///
    /// # Safety
    ///
    /// `page` must be live and not already on the list.
    pub(crate) unsafe fn push(&mut self, page: Page) {
        // SAFETY: `page` is live per the contract.
        unsafe { page.set_next(self.head) };
        self.head = page.base().as_ptr();
    }

    /// Unlinks `page`, whose predecessor on the list is `prev` (`None` when `page` is the
    /// head).
    ///
    /// # Safety
    ///
    /// `page` and `prev` must be live pages on this list, with `prev` immediately preceding
    /// `page`.
    pub(crate) unsafe fn unlink(&mut self, page: Page, prev: Option<Page>) {
        // SAFETY: both pages are live list members per the contract.
        unsafe {
            let next = page.next().map_or(ptr::null_mut(), |p| p.base().as_ptr());
            match prev {
                Some(prev) => prev.set_next(next),
                None => self.head = next,
            }
        }
    }

    /// Iterates over the owned pages, newest first.
    pub(crate) fn iter(&self) -> PageIter {
        PageIter { cursor: self.head }
    }
}

/// Iterator over the pages of a [`PageList`].
pub(crate) struct PageIter {
    cursor: *mut u8,
}

impl Iterator for PageIter {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        let page = NonNull::new(self.cursor).map(|base| Page { base })?;
        // SAFETY: the cursor always holds the base of a live page on the list.
        self.cursor = unsafe { page.next() }.map_or(ptr::null_mut(), |p| p.base().as_ptr());
        Some(page)
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::num::NonZero;

    use super::*;
    use crate::config::PoolConfig;
    use crate::signature::is_painted;

    fn layout_for(config: &PoolConfig) -> BlockLayout {
        BlockLayout::compute(config)
    }

    fn config(debug: bool) -> PoolConfig {
        PoolConfig {
            object_size: 16,
            objects_per_page: NonZero::new(3).unwrap(),
            max_pages: 0,
            debug,
            pad_bytes: 2,
            header: HeaderMode::Basic,
            alignment: 0,
            passthrough: false,
        }
    }

    #[test]
    fn fresh_pages_are_zeroed_and_unlinked() {
        let layout = layout_for(&config(false));
        let page = Page::allocate(&layout).unwrap();

        unsafe {
            assert!(page.next().is_none());

            // Headers start zeroed, which is the fresh state for every mode.
            let first_header = page.base().as_ptr().add(layout.first_payload_offset()
                - layout.payload_to_header());
            assert!(is_painted(first_header, layout.header_size, 0));

            page.release(&layout, HeaderMode::Basic);
        }
    }

    #[test]
    fn formatting_paints_and_threads_every_block() {
        let cfg = config(true);
        let layout = layout_for(&cfg);
        let page = Page::allocate(&layout).unwrap();
        let mut free_list = FreeList::new();

        unsafe {
            page.format(&layout, true, &mut free_list);

            // The highest-address block is the head of the free list.
            let payloads: Vec<_> = page.payloads(&layout).collect();
            assert_eq!(free_list.head(), payloads[2].cast_const());

            for (index, payload) in payloads.iter().enumerate() {
                // Pads on both sides, unallocated payload beyond the embedded link.
                assert!(is_painted(
                    payload.sub(layout.pad_bytes),
                    layout.pad_bytes,
                    PAD_PATTERN
                ));
                assert!(is_painted(
                    payload.add(LINK_BYTES),
                    layout.object_size - LINK_BYTES,
                    UNALLOCATED_PATTERN
                ));
                assert!(is_painted(
                    payload.add(layout.object_size),
                    layout.pad_bytes,
                    PAD_PATTERN
                ));
                assert!(free_list.contains(*payload));

                if index + 1 < payloads.len() {
                    assert!(is_painted(
                        payload.add(layout.object_size + layout.pad_bytes),
                        layout.inter_align,
                        ALIGN_PATTERN
                    ));
                }
            }

            // The LIFO yields the highest-address block first and walks down the page.
            assert_eq!(free_list.pop().unwrap().as_ptr(), payloads[2]);
            assert_eq!(free_list.pop().unwrap().as_ptr(), payloads[1]);
            assert_eq!(free_list.pop().unwrap().as_ptr(), payloads[0]);

            page.release(&layout, cfg.header);
        }
    }

    #[test]
    fn payload_spacing_matches_the_stride() {
        let layout = layout_for(&config(false));
        let page = Page::allocate(&layout).unwrap();

        let payloads: Vec<_> = page.payloads(&layout).collect();
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[0], page.first_payload(&layout));
        for pair in payloads.windows(2) {
            assert_eq!(pair[0] as usize + layout.block_stride, pair[1] as usize);
        }

        assert!(page.contains(page.addr(), &layout));
        assert!(page.contains(page.addr() + layout.page_size - 1, &layout));
        assert!(!page.contains(page.addr() + layout.page_size, &layout));

        unsafe { page.release(&layout, HeaderMode::Basic) };
    }

    #[test]
    fn page_list_links_newest_first() {
        let layout = layout_for(&config(false));
        let mut pages = PageList::new();

        let first = Page::allocate(&layout).unwrap();
        let second = Page::allocate(&layout).unwrap();

        unsafe {
            pages.push(first);
            pages.push(second);

            let order: Vec<_> = pages.iter().map(Page::addr).collect();
            assert_eq!(order, vec![second.addr(), first.addr()]);

            // Unlinking the head promotes its successor.
            pages.unlink(second, None);
            assert_eq!(pages.head(), first.base().as_ptr().cast_const());
            second.release(&layout, HeaderMode::Basic);

            // Unlinking the last page empties the list.
            pages.unlink(first, None);
            assert!(pages.head_page().is_none());
            first.release(&layout, HeaderMode::Basic);
        }
    }

    #[test]
    fn unlinking_a_middle_page_preserves_the_rest() {
        let layout = layout_for(&config(false));
        let mut pages = PageList::new();

        let a = Page::allocate(&layout).unwrap();
        let b = Page::allocate(&layout).unwrap();
        let c = Page::allocate(&layout).unwrap();

        unsafe {
            pages.push(a);
            pages.push(b);
            pages.push(c);

            // List is c -> b -> a; remove the middle element.
            pages.unlink(b, Some(c));
            b.release(&layout, HeaderMode::Basic);

            let order: Vec<_> = pages.iter().map(Page::addr).collect();
            assert_eq!(order, vec![c.addr(), a.addr()]);

            pages.unlink(c, None);
            c.release(&layout, HeaderMode::Basic);
            pages.unlink(a, None);
            a.release(&layout, HeaderMode::Basic);
        }
    }
}
