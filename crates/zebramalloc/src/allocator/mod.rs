pub mod zebra;

pub use zebra::{ZebraHeap, ZebraStats};

use crate::error::Result;
use crate::layout::{BlockInfo, BlockLayout};
use core::ptr::NonNull;

/// The heap reports its reservations through a `MemoryNotifier`.
pub const HEAP_REPORTS_RESERVATIONS: u32 = 1 << 0;
/// `is_allocated` gives a real answer.
pub const HEAP_SUPPORTS_IS_ALLOCATED: u32 = 1 << 1;
/// `allocation_size` gives a real answer.
pub const HEAP_SUPPORTS_GET_ALLOCATION_SIZE: u32 = 1 << 2;

/// Which heap implementation sits behind a `dyn Heap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum HeapType {
    Zebra,
}

/// A heap a shadow-memory runtime can sit on top of.
pub trait Heap: Send + Sync {
    fn heap_type(&self) -> HeapType;

    /// Bitwise OR of the `HEAP_*` flags this heap supports.
    fn features(&self) -> u32;

    fn allocate(&self, bytes: usize) -> Result<NonNull<u8>>;

    fn allocate_block(
        &self,
        size: usize,
        min_left_redzone: usize,
        min_right_redzone: usize,
    ) -> Result<(NonNull<u8>, BlockLayout)>;

    /// Returns whatever allocation the free pushed out of quarantine.
    fn free(&self, ptr: *mut u8) -> Result<Option<BlockInfo>>;

    fn free_block(&self, info: &BlockInfo) -> Result<Option<BlockInfo>>;

    fn is_allocated(&self, ptr: *const u8) -> bool;

    fn allocation_size(&self, ptr: *const u8) -> Option<usize>;

    fn lock(&self);

    /// # Safety
    /// The current thread must hold the lock taken by `lock` or `try_lock`.
    unsafe fn unlock(&self);

    fn try_lock(&self) -> bool;
}

/// A FIFO quarantine of freed blocks.
pub trait BlockQuarantine {
    /// Quarantine `info`; returns the block evicted to make room, if any.
    fn push(&self, info: &BlockInfo) -> Result<Option<BlockInfo>>;

    /// Evict the oldest block.
    fn pop(&self) -> Option<BlockInfo>;

    /// Evict every block, oldest first.
    fn empty(&self) -> Vec<BlockInfo>;

    fn count(&self) -> usize;
}

impl Heap for ZebraHeap {
    fn heap_type(&self) -> HeapType {
        HeapType::Zebra
    }

    fn features(&self) -> u32 {
        HEAP_REPORTS_RESERVATIONS | HEAP_SUPPORTS_IS_ALLOCATED | HEAP_SUPPORTS_GET_ALLOCATION_SIZE
    }

    fn allocate(&self, bytes: usize) -> Result<NonNull<u8>> {
        ZebraHeap::allocate(self, bytes)
    }

    fn allocate_block(
        &self,
        size: usize,
        min_left_redzone: usize,
        min_right_redzone: usize,
    ) -> Result<(NonNull<u8>, BlockLayout)> {
        ZebraHeap::allocate_block(self, size, min_left_redzone, min_right_redzone)
    }

    fn free(&self, ptr: *mut u8) -> Result<Option<BlockInfo>> {
        ZebraHeap::free(self, ptr)
    }

    fn free_block(&self, info: &BlockInfo) -> Result<Option<BlockInfo>> {
        ZebraHeap::free_block(self, info)
    }

    fn is_allocated(&self, ptr: *const u8) -> bool {
        ZebraHeap::is_allocated(self, ptr)
    }

    fn allocation_size(&self, ptr: *const u8) -> Option<usize> {
        ZebraHeap::allocation_size(self, ptr)
    }

    fn lock(&self) {
        ZebraHeap::lock(self)
    }

    unsafe fn unlock(&self) {
        ZebraHeap::unlock(self)
    }

    fn try_lock(&self) -> bool {
        ZebraHeap::try_lock(self)
    }
}

impl BlockQuarantine for ZebraHeap {
    fn push(&self, info: &BlockInfo) -> Result<Option<BlockInfo>> {
        ZebraHeap::push(self, info)
    }

    fn pop(&self) -> Option<BlockInfo> {
        ZebraHeap::pop(self)
    }

    fn empty(&self) -> Vec<BlockInfo> {
        ZebraHeap::empty(self)
    }

    fn count(&self) -> usize {
        self.quarantine_count()
    }
}
