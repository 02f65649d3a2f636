//! Per-block header bookkeeping.
//!
//! The functions here read and write the raw header bytes that sit in front of each payload,
//! for all four [`HeaderMode`]s. Accesses are unaligned because header addresses follow the
//! configured block layout.

use std::ptr;

use crate::config::{ALLOC_ID_BYTES, HeaderMode, USE_COUNTER_BYTES};

/// Heap record owned by an External header slot while its block is in client hands.
///
/// The record owns the copied label; dropping the record releases both.
#[derive(Debug)]
pub struct BlockNote {
    /// Whether the block is currently in client hands.
    pub in_use: bool,

    /// Copy of the label supplied at allocation time, if any.
    pub label: Option<Box<str>>,

    /// Allocation ordinal recorded when the block was handed out.
    pub allocation: u32,
}

/// Bit 0 of the flags byte is the in-use witness. The remaining bits are reserved and must
/// survive allocate/free transitions, so the byte is updated with masks, never whole stores.
const IN_USE_BIT: u8 = 0x1;

#[cfg(test)]
thread_local! {
    /// Count of [`BlockNote`]s dropped on this thread.
    static NOTES_DROPPED: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
}

/// Number of [`BlockNote`]s dropped on the current thread.
///
/// Test instrumentation for observing record reclamation. Every test runs on its own thread,
/// so counts never interfere across tests.
#[cfg(test)]
pub(crate) fn notes_dropped() -> u64 {
    NOTES_DROPPED.with(std::cell::Cell::get)
}

#[cfg(test)]
impl Drop for BlockNote {
    fn drop(&mut self) {
        NOTES_DROPPED.with(|count| count.set(count.get() + 1));
    }
}

/// Offset of the flags byte within a Basic or Extended header.
fn flag_offset(mode: HeaderMode) -> usize {
    match mode {
        HeaderMode::Basic => ALLOC_ID_BYTES,
        HeaderMode::Extended { additional } => {
            additional as usize + USE_COUNTER_BYTES + ALLOC_ID_BYTES
        }
        HeaderMode::None | HeaderMode::External => {
            unreachable!("mode {mode:?} does not carry a flags byte")
        }
    }
}

/// Offset of the allocation id within a Basic or Extended header.
fn alloc_id_offset(mode: HeaderMode) -> usize {
    match mode {
        HeaderMode::Basic => 0,
        HeaderMode::Extended { additional } => additional as usize + USE_COUNTER_BYTES,
        HeaderMode::None | HeaderMode::External => {
            unreachable!("mode {mode:?} does not carry an allocation id")
        }
    }
}

/// Applies the on-allocate header transition at `header`.
///
/// `allocation` is the pool-wide ordinal of the ongoing allocation. `label` is copied into the
/// External record and ignored by every other mode.
///
/// # Safety
///
/// `header` must point at `mode.size()` bytes laid out per `mode` inside memory the caller
/// owns. For `External` the slot must currently be null (the block was free).
pub(crate) unsafe fn mark_allocated(
    header: *mut u8,
    mode: HeaderMode,
    allocation: u32,
    label: Option<&str>,
) {
    match mode {
        HeaderMode::None => {}
        HeaderMode::Basic => {
            // SAFETY: the header spans the allocation id and flags byte per the contract.
            unsafe {
                header.cast::<u32>().write_unaligned(allocation);
                let flags = header.add(flag_offset(mode));
                flags.write(flags.read() | IN_USE_BIT);
            }
        }
        HeaderMode::Extended { additional } => {
            let additional = additional as usize;
            // SAFETY: the header spans the user bytes, counter, id and flags byte per the
            // contract.
            unsafe {
                header.write_bytes(0, additional);

                let counter = header.add(additional).cast::<u16>();
                counter.write_unaligned(counter.read_unaligned().wrapping_add(1));

                header
                    .add(alloc_id_offset(mode))
                    .cast::<u32>()
                    .write_unaligned(allocation);

                let flags = header.add(flag_offset(mode));
                flags.write(flags.read() | IN_USE_BIT);
            }
        }
        HeaderMode::External => {
            let note = Box::new(BlockNote {
                in_use: true,
                label: label.map(Box::from),
                allocation,
            });
            // SAFETY: the slot spans pointer-width writable bytes per the contract.
            unsafe {
                header
                    .cast::<*mut BlockNote>()
                    .write_unaligned(Box::into_raw(note));
            }
        }
    }
}

/// Applies the on-free header transition at `header`.
///
/// Basic and Extended headers zero the allocation id and clear the in-use bit, leaving user
/// bytes, the use counter and reserved flag bits untouched. External headers drop the owned
/// record (and its label) and null the slot.
///
/// # Safety
///
/// `header` must point at `mode.size()` bytes laid out per `mode` inside memory the caller
/// owns. A non-null External slot must hold a pointer produced by [`mark_allocated`].
pub(crate) unsafe fn mark_freed(header: *mut u8, mode: HeaderMode) {
    match mode {
        HeaderMode::None => {}
        HeaderMode::Basic | HeaderMode::Extended { .. } => {
            // SAFETY: the header spans `mode.size()` writable bytes per the contract.
            unsafe {
                header
                    .add(alloc_id_offset(mode))
                    .cast::<u32>()
                    .write_unaligned(0);

                let flags = header.add(flag_offset(mode));
                flags.write(flags.read() & !IN_USE_BIT);
            }
        }
        HeaderMode::External => {
            // SAFETY: the slot spans pointer-width readable bytes per the contract.
            let raw = unsafe { header.cast::<*mut BlockNote>().read_unaligned() };
            if !raw.is_null() {
                // SAFETY: a non-null slot holds a pointer produced by `Box::into_raw` in
                // `mark_allocated`, and nothing else aliases the record.
                drop(unsafe { Box::from_raw(raw) });
            }
            // SAFETY: the slot spans pointer-width writable bytes per the contract.
            unsafe {
                header.cast::<*mut BlockNote>().write_unaligned(ptr::null_mut());
            }
        }
    }
}

/// Reads the in-use witness from `header`, or `None` when `mode` does not carry one.
///
/// # Safety
///
/// `header` must point at `mode.size()` readable bytes laid out per `mode`.
pub(crate) unsafe fn is_marked_in_use(header: *const u8, mode: HeaderMode) -> Option<bool> {
    match mode {
        HeaderMode::None => None,
        HeaderMode::Basic | HeaderMode::Extended { .. } => {
            // SAFETY: the header spans `mode.size()` readable bytes per the contract.
            let flags = unsafe { header.add(flag_offset(mode)).read() };
            Some(flags & IN_USE_BIT != 0)
        }
        HeaderMode::External => {
            // SAFETY: the slot spans pointer-width readable bytes per the contract.
            let raw = unsafe { header.cast::<*const BlockNote>().read_unaligned() };
            Some(!raw.is_null())
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
    use super::*;

    #[test]
    fn bare_mode_touches_nothing() {
        let mut bytes = [0x5A_u8; 4];

        unsafe {
            mark_allocated(bytes.as_mut_ptr(), HeaderMode::None, 7, None);
            assert_eq!(bytes, [0x5A; 4]);

            mark_freed(bytes.as_mut_ptr(), HeaderMode::None);
            assert_eq!(bytes, [0x5A; 4]);

            assert_eq!(is_marked_in_use(bytes.as_ptr(), HeaderMode::None), None);
        }
    }

    #[test]
    fn basic_header_records_the_allocation_id_and_witness() {
        let mut bytes = [0_u8; 5];

        unsafe {
            mark_allocated(bytes.as_mut_ptr(), HeaderMode::Basic, 0x0102_0304, None);

            assert_eq!(
                bytes.as_ptr().cast::<u32>().read_unaligned(),
                0x0102_0304
            );
            assert_eq!(bytes[4] & 0x1, 0x1);
            assert_eq!(
                is_marked_in_use(bytes.as_ptr(), HeaderMode::Basic),
                Some(true)
            );

            mark_freed(bytes.as_mut_ptr(), HeaderMode::Basic);

            assert_eq!(bytes.as_ptr().cast::<u32>().read_unaligned(), 0);
            assert_eq!(
                is_marked_in_use(bytes.as_ptr(), HeaderMode::Basic),
                Some(false)
            );
        }
    }

    #[test]
    fn reserved_flag_bits_survive_transitions() {
        let mut bytes = [0_u8; 5];
        bytes[4] = 0x80;

        unsafe {
            mark_allocated(bytes.as_mut_ptr(), HeaderMode::Basic, 1, None);
            assert_eq!(bytes[4], 0x81);

            mark_freed(bytes.as_mut_ptr(), HeaderMode::Basic);
            assert_eq!(bytes[4], 0x80);
        }
    }

    #[test]
    fn extended_header_counts_uses_and_keeps_user_bytes_on_free() {
        let mode = HeaderMode::Extended { additional: 3 };
        // Fresh headers start zeroed, as pages are allocated zero-filled.
        let mut bytes = [0_u8; 10];

        unsafe {
            mark_allocated(bytes.as_mut_ptr(), mode, 9, None);

            assert_eq!(&bytes[..3], &[0; 3]);
            assert_eq!(bytes.as_ptr().add(3).cast::<u16>().read_unaligned(), 1);
            assert_eq!(bytes.as_ptr().add(5).cast::<u32>().read_unaligned(), 9);
            assert_eq!(bytes[9] & 0x1, 0x1);

            mark_freed(bytes.as_mut_ptr(), mode);

            // The counter survives the free; only the id and witness reset.
            assert_eq!(bytes.as_ptr().add(3).cast::<u16>().read_unaligned(), 1);
            assert_eq!(bytes.as_ptr().add(5).cast::<u32>().read_unaligned(), 0);
            assert_eq!(is_marked_in_use(bytes.as_ptr(), mode), Some(false));

            mark_allocated(bytes.as_mut_ptr(), mode, 10, None);
            assert_eq!(bytes.as_ptr().add(3).cast::<u16>().read_unaligned(), 2);
        }
    }

    #[test]
    fn extended_use_counter_wraps() {
        let mode = HeaderMode::Extended { additional: 0 };
        let mut bytes = [0_u8; 7];
        bytes[0] = 0xFF;
        bytes[1] = 0xFF;

        unsafe {
            mark_allocated(bytes.as_mut_ptr(), mode, 1, None);
            assert_eq!(bytes.as_ptr().cast::<u16>().read_unaligned(), 0);
        }
    }

    #[test]
    fn external_slot_owns_a_note_while_allocated() {
        let mut slot = [0_u8; size_of::<*mut u8>()];

        unsafe {
            mark_allocated(
                slot.as_mut_ptr(),
                HeaderMode::External,
                3,
                Some("alpha"),
            );

            let raw = slot.as_ptr().cast::<*const BlockNote>().read_unaligned();
            let note = &*raw;
            assert!(note.in_use);
            assert_eq!(note.label.as_deref(), Some("alpha"));
            assert_eq!(note.allocation, 3);
            assert_eq!(
                is_marked_in_use(slot.as_ptr(), HeaderMode::External),
                Some(true)
            );

            let dropped_before = notes_dropped();
            mark_freed(slot.as_mut_ptr(), HeaderMode::External);
            assert_eq!(notes_dropped(), dropped_before + 1);

            assert!(
                slot.as_ptr()
                    .cast::<*const BlockNote>()
                    .read_unaligned()
                    .is_null()
            );
            assert_eq!(
                is_marked_in_use(slot.as_ptr(), HeaderMode::External),
                Some(false)
            );
        }
    }

    #[test]
    fn external_free_of_an_empty_slot_is_harmless() {
        let mut slot = [0_u8; size_of::<*mut u8>()];

        unsafe {
            let dropped_before = notes_dropped();
            mark_freed(slot.as_mut_ptr(), HeaderMode::External);
            assert_eq!(notes_dropped(), dropped_before);
            assert_eq!(
                is_marked_in_use(slot.as_ptr(), HeaderMode::External),
                Some(false)
            );
        }
    }

    #[test]
    fn external_note_without_label() {
        let mut slot = [0_u8; size_of::<*mut u8>()];

        unsafe {
            mark_allocated(slot.as_mut_ptr(), HeaderMode::External, 1, None);

            let raw = slot.as_ptr().cast::<*const BlockNote>().read_unaligned();
            assert_eq!((*raw).label, None);

            mark_freed(slot.as_mut_ptr(), HeaderMode::External);
        }
    }
}
