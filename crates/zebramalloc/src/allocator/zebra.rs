use crate::config::ZebraConfig;
use crate::error::{Result, ZebraError};
use crate::hardening::quarantine::QuarantineRatio;
use crate::hardening::self_check::IntegrityReport;
use crate::layout::{self, BlockInfo, BlockLayout, BLOCK_HEADER_SIZE};
use crate::notifier::MemoryNotifier;
use crate::slab::{
    FreePool, QuarantineOrder, SlabArena, SlabIndex, SlabQueue, SlabState, SlabStatus, SlabTable,
};
use crate::sync::RecursiveLock;
use core::ptr::NonNull;
use std::sync::Arc;
use tracing::{trace, warn};

/// Snapshot of how the slabs are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZebraStats {
    pub slab_count: usize,
    pub free_slabs: usize,
    pub allocated_slabs: usize,
    pub quarantined_slabs: usize,
    /// Quarantined slabs the current ratio allows.
    pub quarantine_budget_slabs: usize,
}

/// Everything that changes after construction. Under the heap lock.
struct ZebraState {
    free_slabs: SlabQueue<FreePool>,
    quarantine: SlabQueue<QuarantineOrder>,
    slabs: SlabTable,
    quarantine_ratio: QuarantineRatio,
}

/// A zebra-stripe heap: a fixed arena of two-page slabs serving allocations
/// of at most one page.
///
/// Every allocation lives in the even page of its slab, pushed to the right so
/// that it ends where the odd page begins. The odd page is protected while the
/// slab is allocated, so running off the end of the body faults right away.
///
/// Freed slabs are not reused directly. They go through a FIFO quarantine
/// bounded by `quarantine_ratio` of the heap; each push that leaves the
/// quarantine over budget evicts exactly one slab, the oldest, back to the
/// free pool. Freeing a quarantined address is an error, not a no-op.
///
/// Share it between threads with `Arc<ZebraHeap>`.
pub struct ZebraHeap {
    arena: SlabArena,
    state: RecursiveLock<ZebraState>,
    notifier: Arc<dyn MemoryNotifier>,
}

impl ZebraHeap {
    /// Reserve `heap_size` bytes (rounded down to whole slabs) with the
    /// default quarantine ratio.
    pub fn new(heap_size: usize, notifier: Arc<dyn MemoryNotifier>) -> Result<Self> {
        Self::with_config(&ZebraConfig::default().with_heap_size(heap_size), notifier)
    }

    pub fn with_config(config: &ZebraConfig, notifier: Arc<dyn MemoryNotifier>) -> Result<Self> {
        let quarantine_ratio = QuarantineRatio::new(config.quarantine_ratio)?;
        let arena = SlabArena::reserve(config.heap_size)?;
        let slab_count = arena.slab_count();

        let state = ZebraState {
            free_slabs: SlabQueue::filled(slab_count, arena.indices()),
            quarantine: SlabQueue::with_capacity(slab_count),
            slabs: SlabTable::new(slab_count),
            quarantine_ratio,
        };

        notifier.notify_future_heap_use(arena.base(), arena.heap_size());
        for (address, size) in [
            state.free_slabs.storage(),
            state.quarantine.storage(),
            state.slabs.storage(),
        ] {
            notifier.notify_internal_use(address, size);
        }

        Ok(ZebraHeap {
            arena,
            state: RecursiveLock::new(state),
            notifier,
        })
    }

    pub fn heap_size(&self) -> usize {
        self.arena.heap_size()
    }

    pub fn slab_count(&self) -> usize {
        self.arena.slab_count()
    }

    pub fn slab_size(&self) -> usize {
        self.arena.slab_size()
    }

    /// Largest request `allocate` accepts: one page.
    pub fn max_allocation_size(&self) -> usize {
        self.arena.page_size()
    }

    /// Largest body `allocate_block` accepts: one page minus the block header.
    pub fn max_block_allocation_size(&self) -> usize {
        self.arena.page_size() - BLOCK_HEADER_SIZE
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate `bytes` (1 ..= one page) with no header or trailer. The
    /// returned body is shadow-ratio aligned and ends at most
    /// `SHADOW_RATIO - 1` bytes before the protected odd page.
    pub fn allocate(&self, bytes: usize) -> Result<NonNull<u8>> {
        let max = self.max_allocation_size();
        if bytes == 0 || bytes > max {
            return Err(misuse(ZebraError::InvalidSize {
                requested: bytes,
                max,
            }));
        }
        let body_offset = layout::raw_body_offset(self.arena.page_size(), bytes);
        let info = self.claim_slab(|slab| BlockInfo::raw(slab + body_offset, bytes))?;
        Ok(body_ptr(&info))
    }

    /// Allocate a block whose body holds `size` bytes and is surrounded by at
    /// least the requested redzones. The block covers the whole slab.
    pub fn allocate_block(
        &self,
        size: usize,
        min_left_redzone: usize,
        min_right_redzone: usize,
    ) -> Result<(NonNull<u8>, BlockLayout)> {
        let max = self.max_block_allocation_size();
        if size == 0 || size > max {
            return Err(misuse(ZebraError::InvalidSize {
                requested: size,
                max,
            }));
        }
        let planned = layout::plan_zebra_block(
            self.arena.page_size(),
            size,
            min_left_redzone,
            min_right_redzone,
        )
        .ok_or_else(|| {
            misuse(ZebraError::UnsatisfiableLayout {
                size,
                min_left: min_left_redzone,
                min_right: min_right_redzone,
            })
        })?;
        let info = self.claim_slab(|slab| BlockInfo::from_layout(slab, &planned))?;
        Ok((body_ptr(&info), planned))
    }

    /// Take the next free slab, place the allocation with `place` (given the
    /// slab address), guard the odd page and record the slab as allocated.
    fn claim_slab(&self, place: impl FnOnce(usize) -> BlockInfo) -> Result<BlockInfo> {
        self.state.with(|state| {
            let index = state
                .free_slabs
                .pop_front()
                .ok_or_else(|| misuse(ZebraError::OutOfSlabs))?;

            if let Err(err) = self.guard_odd_page(index) {
                state.free_slabs.push_back(index);
                return Err(misuse(err));
            }

            let slab = self.arena.slab_address(index).as_ptr() as usize;
            let info = place(slab);
            debug_assert!(info.body() >= slab);
            debug_assert!(info.body_end() <= slab + self.arena.page_size());
            state.slabs.mark_allocated(index, info);
            trace!(
                slab = index.get(),
                body = ?(info.body() as *const u8),
                size = info.body_size,
                "allocated"
            );
            Ok(info)
        })
    }

    // ========================================================================
    // Free / quarantine
    // ========================================================================

    /// Free the allocation whose body starts at `ptr`. The slab enters the
    /// quarantine; if that puts the quarantine over budget, the oldest
    /// quarantined allocation is evicted and returned.
    pub fn free(&self, ptr: *mut u8) -> Result<Option<BlockInfo>> {
        self.quarantine_at(ptr as usize, None)
    }

    /// Same as `free`, addressed by the block descriptor. The descriptor must
    /// match the one recorded at allocation.
    pub fn free_block(&self, info: &BlockInfo) -> Result<Option<BlockInfo>> {
        self.push(info)
    }

    /// Put an allocated block into quarantine and trim synchronously: at most
    /// one eviction per push, so lowering the ratio drains the excess one
    /// push at a time.
    pub fn push(&self, info: &BlockInfo) -> Result<Option<BlockInfo>> {
        self.quarantine_at(info.body(), Some(info))
    }

    fn quarantine_at(&self, address: usize, expected: Option<&BlockInfo>) -> Result<Option<BlockInfo>> {
        let index = self
            .arena
            .even_page_slab_index(address)
            .ok_or_else(|| misuse(ZebraError::InvalidAddress { address }))?;

        self.state.with(|state| {
            match *state.slabs.get(index) {
                SlabState::Allocated(stored)
                    if stored.body() == address && expected.map_or(true, |e| *e == stored) => {}
                SlabState::Allocated(_) => {
                    return Err(misuse(ZebraError::InvalidAddress { address }));
                }
                // Only the recorded body of a quarantined slab is a double
                // free; any other address in it was never handed out.
                SlabState::Quarantined(stored) if stored.body() != address => {
                    return Err(misuse(ZebraError::InvalidAddress { address }));
                }
                other => {
                    return Err(misuse(ZebraError::DoubleFree {
                        address,
                        index: index.get(),
                        state: other.status(),
                    }));
                }
            }

            state.slabs.mark_quarantined(index);
            state.quarantine.push_back(index);
            trace!(
                slab = index.get(),
                quarantined = state.quarantine.len(),
                "quarantined"
            );

            if state
                .quarantine_ratio
                .admits(state.quarantine.len(), self.arena.slab_count())
            {
                return Ok(None);
            }
            Ok(self.evict_oldest(state))
        })
    }

    /// Evict the oldest quarantined allocation back to the free pool.
    /// Returns `None` when the quarantine is empty.
    pub fn pop(&self) -> Option<BlockInfo> {
        self.state.with(|state| self.evict_oldest(state))
    }

    /// Evict everything in quarantine, oldest first.
    pub fn empty(&self) -> Vec<BlockInfo> {
        self.state.with(|state| {
            let mut evicted = Vec::with_capacity(state.quarantine.len());
            while let Some(info) = self.evict_oldest(state) {
                evicted.push(info);
            }
            evicted
        })
    }

    pub fn quarantine_count(&self) -> usize {
        self.state.read(|state| state.quarantine.len())
    }

    fn evict_oldest(&self, state: &mut ZebraState) -> Option<BlockInfo> {
        let index = state.quarantine.pop_front()?;
        let info = state.slabs.mark_free(index);
        self.unguard_odd_page(index);
        state.free_slabs.push_back(index);
        trace!(slab = index.get(), "evicted from quarantine");
        Some(info)
    }

    fn guard_odd_page(&self, index: SlabIndex) -> Result<()> {
        #[cfg(feature = "guard-pages")]
        {
            let page = self.arena.odd_page(index);
            let len = self.arena.page_size();
            if !unsafe { crate::platform::protect_none(page, len) } {
                return Err(ZebraError::ProtectionFailed {
                    address: page as usize,
                    len,
                });
            }
        }
        #[cfg(not(feature = "guard-pages"))]
        let _ = index;
        Ok(())
    }

    /// Make the odd page accessible again so whoever receives the evicted
    /// descriptor can look at the trailer. Failure leaves the page protected,
    /// which only matters to that reader; the next allocation protects it anyway.
    fn unguard_odd_page(&self, index: SlabIndex) {
        #[cfg(feature = "guard-pages")]
        {
            let page = self.arena.odd_page(index);
            if !unsafe { crate::platform::protect_read_write(page, self.arena.page_size()) } {
                warn!(slab = index.get(), "odd page stays protected after eviction");
            }
        }
        #[cfg(not(feature = "guard-pages"))]
        let _ = index;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// True if `ptr` is the body of a live allocation of this heap.
    pub fn is_allocated(&self, ptr: *const u8) -> bool {
        self.allocation_info(ptr).is_some()
    }

    /// Requested size of the live allocation whose body starts at `ptr`.
    pub fn allocation_size(&self, ptr: *const u8) -> Option<usize> {
        self.allocation_info(ptr).map(|info| info.body_size)
    }

    /// Descriptor of the live allocation whose body starts at `ptr`.
    /// Quarantined, free and foreign addresses give `None`.
    pub fn allocation_info(&self, ptr: *const u8) -> Option<BlockInfo> {
        let address = ptr as usize;
        let index = self.arena.slab_index(address)?;
        self.state.read(|state| match state.slabs.get(index) {
            SlabState::Allocated(info) if info.body() == address => Some(*info),
            _ => None,
        })
    }

    /// Current state of the slab containing `ptr`, if it is inside the arena.
    pub fn slab_status(&self, ptr: *const u8) -> Option<SlabStatus> {
        let index = self.arena.slab_index(ptr as usize)?;
        self.state.read(|state| Some(state.slabs.get(index).status()))
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn quarantine_ratio(&self) -> f32 {
        self.state.read(|state| state.quarantine_ratio.get())
    }

    /// Change the quarantine budget. Out-of-range values are rejected and the
    /// previous ratio stays. Lowering the ratio evicts nothing by itself.
    pub fn set_quarantine_ratio(&self, ratio: f32) -> Result<()> {
        let ratio = QuarantineRatio::new(ratio).map_err(misuse)?;
        self.state.with(|state| state.quarantine_ratio = ratio);
        Ok(())
    }

    // ========================================================================
    // Locking
    // ========================================================================

    /// Hold the heap lock across several calls. Calls made by the holding
    /// thread still work; other threads block until `unlock`.
    pub fn lock(&self) {
        self.state.acquire();
    }

    /// # Safety
    /// The current thread must hold the heap lock through `lock` or a
    /// successful `try_lock`.
    pub unsafe fn unlock(&self) {
        self.state.release();
    }

    pub fn try_lock(&self) -> bool {
        self.state.try_acquire()
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn stats(&self) -> ZebraStats {
        self.state.read(|state| {
            let slab_count = self.arena.slab_count();
            ZebraStats {
                slab_count,
                free_slabs: state.free_slabs.len(),
                allocated_slabs: slab_count - state.free_slabs.len() - state.quarantine.len(),
                quarantined_slabs: state.quarantine.len(),
                quarantine_budget_slabs: state.quarantine_ratio.budget_slabs(slab_count),
            }
        })
    }

    /// Check that every slab index is in exactly one of the free pool, the
    /// quarantine and the allocated set, and that the slab table agrees.
    pub fn check_integrity(&self) -> IntegrityReport {
        self.state.read(|state| {
            const NOWHERE: u8 = 0;
            const IN_FREE_POOL: u8 = 1;
            const IN_QUARANTINE: u8 = 2;

            let total = self.arena.slab_count();
            let mut report = IntegrityReport {
                total_slabs: total,
                ..IntegrityReport::default()
            };
            let mut seen = vec![NOWHERE; total];

            let queued = state
                .free_slabs
                .iter()
                .map(|i| (i, IN_FREE_POOL, SlabStatus::Free))
                .chain(
                    state
                        .quarantine
                        .iter()
                        .map(|i| (i, IN_QUARANTINE, SlabStatus::Quarantined)),
                );
            for (index, location, expected) in queued {
                let slot = &mut seen[index.get()];
                if *slot != NOWHERE {
                    report.duplicate_entries += 1;
                }
                *slot = location;
                if state.slabs.get(index).status() != expected {
                    report.state_mismatches += 1;
                }
            }

            for (slab, &location) in state.slabs.iter().zip(seen.iter()) {
                match slab.status() {
                    SlabStatus::Free => report.free_slabs += 1,
                    SlabStatus::Allocated => report.allocated_slabs += 1,
                    SlabStatus::Quarantined => report.quarantined_slabs += 1,
                }
                if slab.status() != SlabStatus::Allocated && location == NOWHERE {
                    report.orphaned_slabs += 1;
                }
            }

            report.tally_errors();
            report
        })
    }
}

impl Drop for ZebraHeap {
    fn drop(&mut self) {
        // The arena itself is unmapped when the `arena` field drops, live and
        // quarantined slabs included.
        self.notifier
            .notify_returned_to_os(self.arena.base(), self.arena.heap_size());
    }
}

#[inline]
fn body_ptr(info: &BlockInfo) -> NonNull<u8> {
    // SAFETY: bodies lie inside the arena, which starts at a non-null address.
    unsafe { NonNull::new_unchecked(info.body() as *mut u8) }
}

/// Log a rejected call. These are caller errors, not heap corruption.
#[cold]
fn misuse(err: ZebraError) -> ZebraError {
    warn!(error = %err, "rejected zebra heap call");
    err
}
