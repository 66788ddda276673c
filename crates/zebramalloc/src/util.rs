use core::sync::atomic::{AtomicUsize, Ordering};

/// Align `value` up to the next multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Granularity of block bodies. A body always starts on a multiple of this,
/// so a right-aligned body ends at most `SHADOW_RATIO - 1` bytes before the
/// odd page.
pub const SHADOW_RATIO: usize = 8;

/// Default amount of memory reserved by a zebra heap.
pub const DEFAULT_HEAP_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

/// Default share of the heap that may sit in quarantine.
pub const DEFAULT_QUARANTINE_RATIO: f32 = 0.25;

/// Runtime page size, initialized from sysconf(_SC_PAGESIZE).
/// Starts at 4096 so `page_size()` never returns zero.
static PAGE_SIZE_CACHED: AtomicUsize = AtomicUsize::new(4096);

/// Initialize the page size from the OS. Idempotent; called by every heap
/// constructor before any slab arithmetic happens.
pub fn init_page_size() {
    let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let ps = if ps > 0 { ps as usize } else { 4096 };
    PAGE_SIZE_CACHED.store(ps, Ordering::Release);
}

/// Get the system page size.
#[inline(always)]
pub fn page_size() -> usize {
    PAGE_SIZE_CACHED.load(Ordering::Relaxed)
}
