//! Memory-notification sink. The heap reports what it reserves, what it uses
//! for bookkeeping, and what it gives back; it never depends on the answer.

use tracing::trace;

pub trait MemoryNotifier: Send + Sync {
    /// `size` bytes at `address` hold the heap's own bookkeeping.
    fn notify_internal_use(&self, address: usize, size: usize);

    /// `size` bytes at `address` are reserved for future allocations.
    fn notify_future_heap_use(&self, address: usize, size: usize);

    /// `size` bytes at `address` were handed back to the OS.
    fn notify_returned_to_os(&self, address: usize, size: usize);
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMemoryNotifier;

impl MemoryNotifier for NullMemoryNotifier {
    fn notify_internal_use(&self, _address: usize, _size: usize) {}
    fn notify_future_heap_use(&self, _address: usize, _size: usize) {}
    fn notify_returned_to_os(&self, _address: usize, _size: usize) {}
}

/// Emits every notification as a `trace` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMemoryNotifier;

impl MemoryNotifier for TracingMemoryNotifier {
    fn notify_internal_use(&self, address: usize, size: usize) {
        trace!(address = ?(address as *const u8), size, "internal use");
    }

    fn notify_future_heap_use(&self, address: usize, size: usize) {
        trace!(address = ?(address as *const u8), size, "future heap use");
    }

    fn notify_returned_to_os(&self, address: usize, size: usize) {
        trace!(address = ?(address as *const u8), size, "returned to OS");
    }
}
