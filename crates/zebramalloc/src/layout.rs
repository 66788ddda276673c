//! Block placement inside a zebra slab.
//!
//! A block spans the whole slab. The body is pushed to the right of the even
//! page so that it ends at the odd page, give or take the shadow-ratio
//! alignment slack, which the trailer padding absorbs:
//!
//! ```text
//!          |-header-padding-|      |-------trailer-padding------|
//! +--------+----------------+------+--+-------------------------+---------+
//! |         even page                 |          odd page                 |
//! +--------+----------------+------+--+-------------------------+---------+
//! |-header-|                |-body-|                            |-trailer-|
//! ```
//!
//! The heap never reads or writes headers and trailers; it only stores the
//! resulting `BlockInfo` and hands it back.

use crate::util::{align_up, SHADOW_RATIO};

/// Bytes reserved at the start of a block for its header.
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Bytes reserved at the end of a block for its trailer.
pub const BLOCK_TRAILER_SIZE: usize = 16;

/// Sizes of every region of a planned block, in address order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub block_size: usize,
    pub header_size: usize,
    pub header_padding_size: usize,
    pub body_size: usize,
    pub trailer_padding_size: usize,
    pub trailer_size: usize,
}

impl BlockLayout {
    #[inline]
    pub fn body_offset(&self) -> usize {
        self.header_size + self.header_padding_size
    }

    #[inline]
    pub fn left_redzone_size(&self) -> usize {
        self.body_offset()
    }

    #[inline]
    pub fn right_redzone_size(&self) -> usize {
        self.trailer_padding_size + self.trailer_size
    }
}

/// Descriptor of a live or quarantined allocation, as stored in the slab
/// table. Addresses are plain integers so the descriptor can cross threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// First byte of the block: its header, or the body itself for raw
    /// allocations.
    pub block: usize,
    pub block_size: usize,
    /// Distance from `block` to the body.
    pub body_offset: usize,
    /// Bytes requested by the caller.
    pub body_size: usize,
}

impl BlockInfo {
    /// Descriptor of a raw allocation: no header, no trailer.
    pub fn raw(body: usize, body_size: usize) -> Self {
        BlockInfo {
            block: body,
            block_size: align_up(body_size, SHADOW_RATIO),
            body_offset: 0,
            body_size,
        }
    }

    /// Descriptor of a block placed at `block` according to `layout`.
    pub fn from_layout(block: usize, layout: &BlockLayout) -> Self {
        BlockInfo {
            block,
            block_size: layout.block_size,
            body_offset: layout.body_offset(),
            body_size: layout.body_size,
        }
    }

    #[inline]
    pub fn body(&self) -> usize {
        self.block + self.body_offset
    }

    #[inline]
    pub fn body_end(&self) -> usize {
        self.body() + self.body_size
    }
}

/// Offset of a raw `bytes`-long body from the start of its slab: the body is
/// shadow-ratio aligned and ends as close to the odd page as alignment allows.
/// `bytes` must not exceed `page_size`.
#[inline]
pub fn raw_body_offset(page_size: usize, bytes: usize) -> usize {
    debug_assert!(bytes <= page_size);
    page_size - align_up(bytes, SHADOW_RATIO)
}

/// Plan a block for a `body_size` body in a slab of two `page_size` pages,
/// with at least the requested redzones on each side. Returns `None` when
/// the body and redzones cannot share one slab.
pub fn plan_zebra_block(
    page_size: usize,
    body_size: usize,
    min_left_redzone: usize,
    min_right_redzone: usize,
) -> Option<BlockLayout> {
    let aligned_body = align_up(body_size, SHADOW_RATIO);
    if aligned_body > page_size {
        return None;
    }

    let left_redzone = page_size - aligned_body;
    if left_redzone < BLOCK_HEADER_SIZE.max(min_left_redzone) {
        return None;
    }

    let slab_size = 2 * page_size;
    let right_redzone = slab_size - left_redzone - body_size;
    if right_redzone < BLOCK_TRAILER_SIZE.max(min_right_redzone) {
        return None;
    }

    Some(BlockLayout {
        block_size: slab_size,
        header_size: BLOCK_HEADER_SIZE,
        header_padding_size: left_redzone - BLOCK_HEADER_SIZE,
        body_size,
        trailer_padding_size: right_redzone - BLOCK_TRAILER_SIZE,
        trailer_size: BLOCK_TRAILER_SIZE,
    })
}
