use crate::error::{Result, ZebraError};
use crate::platform;
use crate::util::{init_page_size, page_size};
use core::fmt;
use core::ptr::NonNull;
use tracing::debug;

/// Index of a slab inside one `SlabArena`. Only the arena hands these out,
/// so a `SlabIndex` is always in `[0, slab_count)` for the arena that made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlabIndex(usize);

impl SlabIndex {
    #[inline(always)]
    pub fn get(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) const fn from_raw(raw: usize) -> Self {
        SlabIndex(raw)
    }
}

impl fmt::Display for SlabIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One contiguous reservation split into slabs of two pages each.
///
/// ```text
///                             |-----------slab 1----------|
/// +-------------+-------------+-------------+-------------+------------- - -+
/// |  even page  |  odd page   |  even page  |  odd page   |             ... |
/// +-------------+-------------+-------------+-------------+------------- - -+
/// |-----------slab 0----------|                           |---slab 2---- - -|
/// ```
///
/// Address/index conversions are pure arithmetic and need no lock. Dropping
/// the arena unmaps all of it, whatever the slabs are doing at the time.
pub struct SlabArena {
    base: NonNull<u8>,
    heap_size: usize,
    slab_count: usize,
    page_size: usize,
    /// log2(slab size).
    slab_shift: u32,
}

unsafe impl Send for SlabArena {}
unsafe impl Sync for SlabArena {}

impl SlabArena {
    /// Reserve `requested` bytes rounded down to whole slabs.
    pub fn reserve(requested: usize) -> Result<Self> {
        init_page_size();
        let page_size = page_size();
        let slab_size = 2 * page_size;
        let slab_count = requested / slab_size;
        if slab_count == 0 {
            return Err(ZebraError::HeapTooSmall {
                requested,
                slab_size,
            });
        }

        let heap_size = slab_count * slab_size;
        let base = unsafe { platform::reserve(heap_size) }
            .ok_or(ZebraError::ReservationFailed { size: heap_size })?;

        debug!(base = ?base, heap_size, slab_count, "reserved zebra arena");

        Ok(SlabArena {
            base,
            heap_size,
            slab_count,
            page_size,
            slab_shift: slab_size.trailing_zeros(),
        })
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    pub fn heap_size(&self) -> usize {
        self.heap_size
    }

    #[inline]
    pub fn slab_count(&self) -> usize {
        self.slab_count
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[inline]
    pub fn slab_size(&self) -> usize {
        2 * self.page_size
    }

    /// Validate a raw slab number.
    #[inline]
    pub fn index(&self, raw: usize) -> Option<SlabIndex> {
        (raw < self.slab_count).then_some(SlabIndex(raw))
    }

    /// Every slab index in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = SlabIndex> {
        (0..self.slab_count).map(SlabIndex)
    }

    /// Start of the slab's even page.
    #[inline]
    pub fn slab_address(&self, index: SlabIndex) -> NonNull<u8> {
        debug_assert!(index.0 < self.slab_count);
        // SAFETY: the index is below slab_count, so the offset stays inside
        // the reservation, which starts at a non-null address.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index.0 << self.slab_shift)) }
    }

    /// Start of the slab's odd page.
    #[inline]
    pub fn odd_page(&self, index: SlabIndex) -> *mut u8 {
        unsafe { self.slab_address(index).as_ptr().add(self.page_size) }
    }

    /// Index of the slab containing `address`, or `None` outside the arena.
    #[inline]
    pub fn slab_index(&self, address: usize) -> Option<SlabIndex> {
        let base = self.base();
        if address < base || address >= base + self.heap_size {
            return None;
        }
        Some(SlabIndex((address - base) >> self.slab_shift))
    }

    /// Index of the slab whose even page contains `address`. Addresses in an
    /// odd page or outside the arena give `None`.
    #[inline]
    pub fn even_page_slab_index(&self, address: usize) -> Option<SlabIndex> {
        let index = self.slab_index(address)?;
        let offset = address - self.slab_address(index).as_ptr() as usize;
        (offset < self.page_size).then_some(index)
    }
}

impl Drop for SlabArena {
    fn drop(&mut self) {
        unsafe { platform::release(self.base, self.heap_size) };
        debug!(base = ?self.base, heap_size = self.heap_size, "released zebra arena");
    }
}
