use std::alloc::Layout;
use std::mem::{align_of, size_of};

use crate::config::PoolConfig;

/// Width of the intrusive links threaded through pages and free blocks.
pub(crate) const LINK_BYTES: usize = size_of::<*mut u8>();

/// Byte-exact placement numbers, computed once from the configuration.
///
/// A page is laid out as:
///
/// ```text
/// [ next-page link | left_align |
///   block_0 | inter_align | block_1 | inter_align | ... | block_{N-1} ]
/// ```
///
/// and each block as:
///
/// ```text
/// [ header | left pad | payload | right pad ]
/// ```
///
/// The alignment fillers are sized so that when `alignment` is non-zero, the first payload and
/// every payload after it land on an aligned address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockLayout {
    /// Bytes in each client payload.
    pub object_size: usize,

    /// Bytes in each per-block header.
    pub header_size: usize,

    /// Guard bytes on each side of each payload.
    pub pad_bytes: usize,

    /// Filler between the page link and the first header.
    pub left_align: usize,

    /// Filler between consecutive blocks.
    pub inter_align: usize,

    /// Distance between consecutive payload addresses within a page.
    pub block_stride: usize,

    /// Bytes in a page, as reported by statistics and used in boundary arithmetic.
    pub page_size: usize,

    /// Blocks carved into each page.
    pub(crate) objects_per_page: usize,

    /// Alignment requested from the raw allocator for each page, so that aligned payload
    /// placement inside the page translates into absolutely aligned addresses.
    pub(crate) page_align: usize,
}

impl BlockLayout {
    /// Derives the placement numbers for `config`.
    ///
    /// # Panics
    ///
    /// Panics if the combined dimensions overflow `usize`.
    pub(crate) fn compute(config: &PoolConfig) -> Self {
        let object_size = config.object_size;
        let header_size = config.header.size();
        let pad_bytes = config.pad_bytes as usize;
        let alignment = config.alignment as usize;
        let objects_per_page = config.objects_per_page.get() as usize;

        let (left_align, inter_align) = if alignment == 0 {
            (0, 0)
        } else {
            let before_first_payload = (LINK_BYTES + header_size + pad_bytes) % alignment;
            let bare_block = (header_size + 2 * pad_bytes + object_size) % alignment;
            (
                (alignment - before_first_payload) % alignment,
                (alignment - bare_block) % alignment,
            )
        };

        let block_stride = header_size
            .checked_add(pad_bytes.checked_mul(2).expect("pad bytes overflow usize"))
            .and_then(|bytes| bytes.checked_add(object_size))
            .and_then(|bytes| bytes.checked_add(inter_align))
            .expect("block dimensions overflow usize");

        // The last block needs no trailing inter-block filler.
        let page_size = block_stride
            .checked_mul(objects_per_page)
            .and_then(|bytes| bytes.checked_add(LINK_BYTES + left_align))
            .map(|bytes| bytes - inter_align)
            .expect("page dimensions overflow usize");

        let page_align = if alignment == 0 {
            align_of::<*mut u8>()
        } else {
            // The builder only admits power-of-two alignments, so requesting the same
            // alignment for the page base turns in-page congruence into absolute addresses.
            alignment.max(align_of::<*mut u8>())
        };

        Self {
            object_size,
            header_size,
            pad_bytes,
            left_align,
            inter_align,
            block_stride,
            page_size,
            objects_per_page,
            page_align,
        }
    }

    /// Offset from the page base to the first payload.
    pub(crate) fn first_payload_offset(&self) -> usize {
        LINK_BYTES + self.left_align + self.header_size + self.pad_bytes
    }

    /// Distance from a payload address back to the start of its header.
    pub(crate) fn payload_to_header(&self) -> usize {
        self.header_size + self.pad_bytes
    }

    /// The raw allocation request backing one page.
    pub(crate) fn page_layout(&self) -> Layout {
        Layout::from_size_align(self.page_size, self.page_align)
            .expect("page dimensions were validated when the layout was computed")
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZero;

    use super::*;
    use crate::config::HeaderMode;

    fn config(
        object_size: usize,
        header: HeaderMode,
        pad_bytes: u32,
        alignment: u32,
        objects_per_page: u32,
    ) -> PoolConfig {
        PoolConfig {
            object_size,
            objects_per_page: NonZero::new(objects_per_page).unwrap(),
            max_pages: 0,
            debug: false,
            pad_bytes,
            header,
            alignment,
            passthrough: false,
        }
    }

    #[test]
    fn unaligned_layout_has_no_filler() {
        let layout = BlockLayout::compute(&config(16, HeaderMode::None, 0, 0, 4));

        assert_eq!(layout.left_align, 0);
        assert_eq!(layout.inter_align, 0);
        assert_eq!(layout.block_stride, 16);
        assert_eq!(layout.page_size, LINK_BYTES + 4 * 16);
        assert_eq!(layout.first_payload_offset(), LINK_BYTES);
    }

    #[test]
    fn pads_and_headers_stack_in_front_of_the_payload() {
        let layout = BlockLayout::compute(&config(32, HeaderMode::Basic, 4, 0, 2));

        assert_eq!(layout.header_size, 5);
        assert_eq!(layout.block_stride, 5 + 4 + 32 + 4);
        assert_eq!(layout.page_size, LINK_BYTES + 2 * 45);
        assert_eq!(layout.payload_to_header(), 9);
        assert_eq!(layout.first_payload_offset(), LINK_BYTES + 9);
    }

    #[test]
    fn alignment_filler_follows_the_specified_formulas() {
        // (alignment, header, pad, object) tuples with hand-computed expectations.
        let cases: &[(u32, HeaderMode, u32, usize, usize, usize)] = &[
            // alignment 8, bare block of 8: everything already aligned.
            (8, HeaderMode::None, 0, 8, 0, 0),
            // alignment 16, Basic header (5) + pad 2 in front of the payload:
            // left  = (16 - (8 + 5 + 2) % 16) % 16 = 1
            // inter = (16 - (5 + 4 + 8) % 16) % 16 = 15
            (16, HeaderMode::Basic, 2, 8, 1, 15),
            // alignment 4 with an Extended header of 4 + 2 + 4 + 1 = 11 bytes:
            // left  = (4 - (8 + 11 + 0) % 4) % 4 = 1
            // inter = (4 - (11 + 0 + 12) % 4) % 4 = 1
            (4, HeaderMode::Extended { additional: 4 }, 0, 12, 1, 1),
            // alignment smaller than every component still zeroes out.
            (2, HeaderMode::None, 2, 8, 0, 0),
        ];

        for &(alignment, header, pad, object, left, inter) in cases {
            let layout = BlockLayout::compute(&config(object, header, pad, alignment, 4));

            assert_eq!(layout.left_align, left, "left filler for alignment {alignment}");
            assert_eq!(layout.inter_align, inter, "inter filler for alignment {alignment}");

            // The first payload offset and the stride must both be multiples of the alignment,
            // which is what makes every payload in the page congruent.
            let alignment = alignment as usize;
            assert_eq!(layout.first_payload_offset() % alignment, 0);
            assert_eq!(layout.block_stride % alignment, 0);
        }
    }

    #[test]
    fn page_size_drops_the_trailing_filler() {
        let layout = BlockLayout::compute(&config(8, HeaderMode::Basic, 2, 16, 3));

        let with_trailing = LINK_BYTES + layout.left_align + 3 * layout.block_stride;
        assert_eq!(layout.page_size, with_trailing - layout.inter_align);
    }

    #[test]
    fn page_allocation_alignment_covers_the_payload_alignment() {
        let layout = BlockLayout::compute(&config(8, HeaderMode::None, 0, 16, 4));
        assert_eq!(layout.page_align, 16);

        let natural = BlockLayout::compute(&config(8, HeaderMode::None, 0, 0, 4));
        assert_eq!(natural.page_align, align_of::<*mut u8>());

        let layout = natural.page_layout();
        assert_eq!(layout.size(), natural.page_size);
        assert_eq!(layout.align(), natural.page_align);
    }
}
