use std::ptr::{self, NonNull};

/// Intrusive LIFO of free blocks, threaded through the payload bytes of the blocks themselves.
///
/// Each node stores the address of the next free block in its first pointer-width bytes; the
/// head is the most recently freed block. While a block is on the list those bytes are the
/// pool's bookkeeping; the moment it is popped they become client payload again. This type is
/// the only place that crosses that boundary.
///
/// Links are read and written unaligned: payload addresses follow the configured block layout,
/// not the platform pointer alignment.
#[derive(Debug)]
pub(crate) struct FreeList {
    head: *mut u8,
}

impl FreeList {
    pub(crate) fn new() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// The most recently pushed payload, null when the list is empty.
    pub(crate) fn head(&self) -> *const u8 {
        self.head
    }

    /// Pushes `payload` onto the head of the list.
    ///
    /// # Safety
    ///
    /// `payload` must be the payload address of a block inside a page owned by the caller, at
    /// least pointer-width bytes long, not already on the list, and not in client hands.
    pub(crate) unsafe fn push(&mut self, payload: *mut u8) {
        // SAFETY: per the contract the payload hosts at least pointer-width writable bytes.
        unsafe { payload.cast::<*mut u8>().write_unaligned(self.head) };
        self.head = payload;
    }

    /// Pops the most recently pushed payload, or `None` when the list is empty.
    ///
    /// # Safety
    ///
    /// Every node on the list must still lie inside a page owned by the caller.
    pub(crate) unsafe fn pop(&mut self) -> Option<NonNull<u8>> {
        let head = NonNull::new(self.head)?;
        // SAFETY: nodes on the list always hold a readable link in their first bytes.
        self.head = unsafe { head.as_ptr().cast::<*mut u8>().read_unaligned() };
        Some(head)
    }

    /// Whether `payload` is currently on the list. Linear in the list length.
    ///
    /// # Safety
    ///
    /// Every node on the list must still lie inside a page owned by the caller.
    pub(crate) unsafe fn contains(&self, payload: *const u8) -> bool {
        let mut cursor = self.head.cast_const();

        while !cursor.is_null() {
            if cursor == payload {
                return true;
            }
            // SAFETY: non-null nodes hold a readable link in their first bytes.
            cursor = unsafe { cursor.cast::<*const u8>().read_unaligned() };
        }

        false
    }

    /// Unlinks every node inside `[page_base, page_base + page_size)` and returns how many were
    /// removed. Used when an empty page is handed back to the raw allocator.
    ///
    /// # Safety
    ///
    /// Every node on the list must still lie inside a page owned by the caller.
    pub(crate) unsafe fn cull_page(&mut self, page_base: *const u8, page_size: usize) -> u32 {
        let page_start = page_base as usize;
        let page_end = page_start + page_size;
        let mut removed = 0_u32;

        // `slot` is wherever the link to the node under inspection lives: first the head field
        // of the list itself, afterwards the embedded link of the previous surviving node.
        let mut slot: *mut u8 = (&raw mut self.head).cast::<u8>();

        loop {
            // SAFETY: `slot` is either the head field or the link bytes of a node on the list.
            let node = unsafe { slot.cast::<*mut u8>().read_unaligned() };
            let Some(node) = NonNull::new(node) else {
                break;
            };

            let address = node.as_ptr() as usize;
            if address >= page_start && address < page_end {
                // SAFETY: `node` is on the list, so its first bytes hold the next link.
                let next = unsafe { node.as_ptr().cast::<*mut u8>().read_unaligned() };
                // SAFETY: `slot` points at writable link bytes (or the head field).
                unsafe { slot.cast::<*mut u8>().write_unaligned(next) };
                removed += 1;
            } else {
                slot = node.as_ptr();
            }
        }

        removed
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use super::*;

    /// A buffer standing in for a page, with "payloads" every 16 bytes.
    fn scratch() -> Vec<u8> {
        vec![0_u8; 16 * 8]
    }

    fn payload(buffer: &mut [u8], index: usize) -> *mut u8 {
        unsafe { buffer.as_mut_ptr().add(16 * index) }
    }

    #[test]
    fn pops_in_reverse_push_order() {
        let mut buffer = scratch();
        let mut list = FreeList::new();

        assert!(list.is_empty());

        unsafe {
            let a = payload(&mut buffer, 0);
            let b = payload(&mut buffer, 1);
            let c = payload(&mut buffer, 2);

            list.push(a);
            list.push(b);
            list.push(c);

            assert_eq!(list.head(), c.cast_const());
            assert_eq!(list.pop().unwrap().as_ptr(), c);
            assert_eq!(list.pop().unwrap().as_ptr(), b);
            assert_eq!(list.pop().unwrap().as_ptr(), a);
            assert!(list.pop().is_none());
        }
    }

    #[test]
    fn membership_walk_finds_only_listed_payloads() {
        let mut buffer = scratch();
        let mut list = FreeList::new();

        unsafe {
            let a = payload(&mut buffer, 0);
            let b = payload(&mut buffer, 1);
            let c = payload(&mut buffer, 2);

            list.push(a);
            list.push(c);

            assert!(list.contains(a));
            assert!(!list.contains(b));
            assert!(list.contains(c));
            assert!(!list.contains(buffer.as_ptr().add(1)));
        }
    }

    #[test]
    fn links_survive_unaligned_payload_addresses() {
        let mut buffer = scratch();
        let mut list = FreeList::new();

        unsafe {
            // Odd offsets: nothing here is pointer-aligned.
            let a = buffer.as_mut_ptr().add(1);
            let b = buffer.as_mut_ptr().add(19);

            list.push(a);
            list.push(b);

            assert!(list.contains(a));
            assert_eq!(list.pop().unwrap().as_ptr(), b);
            assert_eq!(list.pop().unwrap().as_ptr(), a);
        }
    }

    #[test]
    fn culling_removes_exactly_the_nodes_in_range() {
        let mut first = scratch();
        let mut second = scratch();
        let mut list = FreeList::new();

        unsafe {
            // Interleave nodes from two "pages".
            list.push(payload(&mut first, 0));
            list.push(payload(&mut second, 0));
            list.push(payload(&mut first, 1));
            list.push(payload(&mut second, 1));
            list.push(payload(&mut first, 2));

            let removed = list.cull_page(first.as_ptr(), first.len());
            assert_eq!(removed, 3);

            // Only the second page's nodes survive, order preserved.
            assert_eq!(list.pop().unwrap().as_ptr(), payload(&mut second, 1));
            assert_eq!(list.pop().unwrap().as_ptr(), payload(&mut second, 0));
            assert!(list.pop().is_none());
        }
    }

    #[test]
    fn culling_a_foreign_range_is_a_no_op() {
        let mut buffer = scratch();
        let other = scratch();
        let mut list = FreeList::new();

        unsafe {
            list.push(payload(&mut buffer, 0));
            list.push(payload(&mut buffer, 1));

            assert_eq!(list.cull_page(other.as_ptr(), other.len()), 0);
            assert!(!list.is_empty());
        }
    }
}
