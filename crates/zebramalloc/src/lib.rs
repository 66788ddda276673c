//! Zebra-stripe diagnostic heap.
//!
//! A fixed arena of two-page slabs: allocations live in the even pages, the
//! odd pages stay protected, and freed slabs sit in a ratio-bounded FIFO
//! quarantine before they are reused. Built for shadow-memory error detectors
//! that want overflows to fault and use-after-free to stay detectable.

extern crate libc;

pub mod allocator;
pub mod config;
pub mod error;
pub mod hardening;
pub mod layout;
pub mod notifier;
pub mod platform;
pub mod slab;
pub mod sync;
pub mod util;

pub use allocator::{BlockQuarantine, Heap, HeapType, ZebraHeap, ZebraStats};
pub use config::ZebraConfig;
pub use error::{Result, ZebraError};
pub use hardening::self_check::IntegrityReport;
pub use layout::{BlockInfo, BlockLayout};
pub use notifier::{MemoryNotifier, NullMemoryNotifier, TracingMemoryNotifier};
pub use slab::SlabStatus;
