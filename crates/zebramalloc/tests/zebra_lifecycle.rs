//! Slab lifecycle tests for the zebra heap: allocation placement, quarantine
//! ordering and trimming, misuse reporting, and memory notifications.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use zebramalloc::util::{init_page_size, page_size, SHADOW_RATIO};
use zebramalloc::{
    BlockInfo, MemoryNotifier, NullMemoryNotifier, SlabStatus, TracingMemoryNotifier, ZebraConfig,
    ZebraError, ZebraHeap,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// A heap of `slabs` slabs with the given quarantine ratio.
fn heap(slabs: usize, ratio: f32) -> ZebraHeap {
    init_logging();
    init_page_size();
    let config = ZebraConfig::default()
        .with_heap_size(slabs * 2 * page_size())
        .with_quarantine_ratio(ratio);
    ZebraHeap::with_config(&config, Arc::new(NullMemoryNotifier)).unwrap()
}

fn addr(p: std::ptr::NonNull<u8>) -> usize {
    p.as_ptr() as usize
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[test]
fn heap_size_rounds_down_to_whole_slabs() {
    init_page_size();
    let slab = 2 * page_size();
    let h = ZebraHeap::new(5 * slab + 3, Arc::new(NullMemoryNotifier)).unwrap();
    assert_eq!(h.slab_count(), 5);
    assert_eq!(h.heap_size(), 5 * slab);
    assert_eq!(h.slab_size(), slab);
    assert_eq!(h.max_allocation_size(), page_size());

    let stats = h.stats();
    assert_eq!(stats.free_slabs, 5);
    assert_eq!(stats.allocated_slabs, 0);
    assert_eq!(stats.quarantined_slabs, 0);
}

#[test]
fn heap_smaller_than_a_slab_is_rejected() {
    init_page_size();
    let err = ZebraHeap::new(page_size(), Arc::new(NullMemoryNotifier))
        .err()
        .unwrap();
    assert!(matches!(err, ZebraError::HeapTooSmall { .. }));
}

#[test]
fn bad_ratio_in_config_is_rejected() {
    init_page_size();
    let config = ZebraConfig::default()
        .with_heap_size(4 * page_size())
        .with_quarantine_ratio(-0.1);
    let err = ZebraHeap::with_config(&config, Arc::new(NullMemoryNotifier))
        .err()
        .unwrap();
    assert!(matches!(err, ZebraError::ConfigurationOutOfRange { .. }));
}

// ---------------------------------------------------------------------------
// Allocation placement
// ---------------------------------------------------------------------------

#[test]
fn allocations_end_at_the_odd_page() {
    let h = heap(8, 0.25);
    for &size in &[1usize, 7, 8, 9, 100, 1000] {
        let p = h.allocate(size).unwrap();
        let body = addr(p);
        assert_eq!(body % SHADOW_RATIO, 0, "size {size}");

        let slab_end_of_even = (body & !(page_size() - 1)) + page_size();
        let slack = slab_end_of_even - (body + size);
        assert!(slack < SHADOW_RATIO, "size {size}: slack {slack}");
        assert_eq!(h.allocation_size(p.as_ptr()), Some(size));
    }
}

#[test]
fn distinct_slabs_for_each_allocation() {
    let h = heap(6, 0.25);
    let mut bodies: Vec<usize> = (0..6).map(|_| addr(h.allocate(32).unwrap())).collect();
    bodies.sort_unstable();
    for pair in bodies.windows(2) {
        assert_eq!(pair[1] - pair[0], h.slab_size());
    }
}

#[test]
fn out_of_slabs_is_reported_and_recoverable() {
    let h = heap(2, 0.0);
    let a = h.allocate(16).unwrap();
    let _b = h.allocate(16).unwrap();
    assert_eq!(h.allocate(16), Err(ZebraError::OutOfSlabs));

    // Ratio 0: the free goes straight through quarantine.
    let evicted = h.free(a.as_ptr()).unwrap().unwrap();
    assert_eq!(evicted.body(), addr(a));
    assert_eq!(h.allocate(16).unwrap(), a);
}

#[test]
fn block_allocation_honors_redzones() {
    let h = heap(4, 0.25);
    let (body, layout) = h.allocate_block(200, 64, 128).unwrap();
    assert!(layout.left_redzone_size() >= 64);
    assert!(layout.right_redzone_size() >= 128);
    assert_eq!(layout.block_size, h.slab_size());

    let info = h.allocation_info(body.as_ptr()).unwrap();
    assert_eq!(info.body(), addr(body));
    assert_eq!(info.body_size, 200);
    assert_eq!(info.block % h.slab_size(), 0);
    assert_eq!(info.block + layout.body_offset(), addr(body));

    assert!(matches!(
        h.allocate_block(200, page_size(), 0),
        Err(ZebraError::UnsatisfiableLayout { .. })
    ));
}

// ---------------------------------------------------------------------------
// Quarantine
// ---------------------------------------------------------------------------

#[test]
fn four_slabs_half_ratio() {
    let h = heap(4, 0.5);
    let p: Vec<_> = (0..4).map(|_| h.allocate(64).unwrap()).collect();
    assert_eq!(h.allocate(64), Err(ZebraError::OutOfSlabs));

    assert_eq!(h.free(p[0].as_ptr()), Ok(None));
    assert_eq!(h.free(p[1].as_ptr()), Ok(None));
    assert_eq!(h.quarantine_count(), 2);

    // Third free goes over 2/4: exactly one eviction, the oldest.
    let evicted = h.free(p[2].as_ptr()).unwrap().unwrap();
    assert_eq!(evicted.body(), addr(p[0]));
    assert_eq!(h.quarantine_count(), 2);

    // Only the evicted slab is free, so the next allocation reuses it.
    assert_eq!(h.allocate(64).unwrap(), p[0]);
    assert_eq!(h.allocate(64), Err(ZebraError::OutOfSlabs));
}

#[test]
fn quarantine_drains_oldest_first() {
    let h = heap(6, 1.0);
    let bodies: Vec<_> = (0..5).map(|_| h.allocate(48).unwrap()).collect();
    for &i in &[3usize, 0, 4, 1] {
        assert_eq!(h.free(bodies[i].as_ptr()), Ok(None));
    }
    let drained: Vec<usize> = h.empty().iter().map(BlockInfo::body).collect();
    let expected: Vec<usize> = [3usize, 0, 4, 1].iter().map(|&i| addr(bodies[i])).collect();
    assert_eq!(drained, expected);
    assert_eq!(h.quarantine_count(), 0);
    assert!(h.pop().is_none());
    assert!(h.is_allocated(bodies[2].as_ptr()));
}

#[test]
fn lowering_ratio_trims_one_per_push() {
    let h = heap(10, 1.0);
    let bodies: Vec<_> = (0..10).map(|_| h.allocate(8).unwrap()).collect();
    for b in &bodies[..8] {
        h.free(b.as_ptr()).unwrap();
    }
    assert_eq!(h.quarantine_count(), 8);

    h.set_quarantine_ratio(0.2).unwrap();
    // Nothing is evicted until the next push.
    assert_eq!(h.quarantine_count(), 8);

    let evicted = h.free(bodies[8].as_ptr()).unwrap().unwrap();
    assert_eq!(evicted.body(), addr(bodies[0]));
    assert_eq!(h.quarantine_count(), 8);

    let evicted = h.free(bodies[9].as_ptr()).unwrap().unwrap();
    assert_eq!(evicted.body(), addr(bodies[1]));
    assert_eq!(h.quarantine_count(), 8);
    assert_eq!(h.stats().quarantine_budget_slabs, 2);
}

#[test]
fn quarantine_never_exceeds_budget_with_stable_ratio() {
    let h = heap(12, 0.25);
    let budget = h.stats().quarantine_budget_slabs;
    assert_eq!(budget, 3);
    for _ in 0..50 {
        let p = h.allocate(128).unwrap();
        h.free(p.as_ptr()).unwrap();
        assert!(h.quarantine_count() <= budget);
    }
    assert_eq!(h.quarantine_count(), budget);
}

#[test]
fn decimal_ratio_budget_is_inclusive() {
    for (ratio, budget) in [(0.7f32, 7usize), (0.9, 9)] {
        let h = heap(10, ratio);
        assert_eq!(h.stats().quarantine_budget_slabs, budget);
        let bodies: Vec<_> = (0..10).map(|_| h.allocate(64).unwrap()).collect();

        for b in &bodies[..budget] {
            assert_eq!(h.free(b.as_ptr()), Ok(None), "ratio {ratio}");
        }
        assert_eq!(h.quarantine_count(), budget);

        let evicted = h.free(bodies[budget].as_ptr()).unwrap().unwrap();
        assert_eq!(evicted.body(), addr(bodies[0]));
        assert_eq!(h.quarantine_count(), budget);
    }
}

#[test]
fn rejected_ratio_keeps_previous_value() {
    let h = heap(4, 0.5);
    for bad in [-0.01f32, 1.01, f32::NAN, f32::INFINITY] {
        assert!(matches!(
            h.set_quarantine_ratio(bad),
            Err(ZebraError::ConfigurationOutOfRange { .. })
        ));
        assert_eq!(h.quarantine_ratio(), 0.5);
    }
    h.set_quarantine_ratio(0.0).unwrap();
    assert_eq!(h.quarantine_ratio(), 0.0);
}

// ---------------------------------------------------------------------------
// Misuse
// ---------------------------------------------------------------------------

#[test]
fn double_free_names_the_slab_state() {
    let h = heap(4, 0.5);
    let p = h.allocate(64).unwrap().as_ptr();
    h.free(p).unwrap();

    match h.free(p) {
        Err(ZebraError::DoubleFree { address, state, .. }) => {
            assert_eq!(address, p as usize);
            assert_eq!(state, SlabStatus::Quarantined);
        }
        other => panic!("expected double free, got {other:?}"),
    }
    // The failed free changed nothing.
    assert_eq!(h.quarantine_count(), 1);
    assert!(h.check_integrity().is_ok());
}

#[test]
fn stray_address_in_quarantined_slab_is_invalid() {
    let h = heap(4, 1.0);
    let p = h.allocate(512).unwrap().as_ptr();
    h.free(p).unwrap();

    let stray = unsafe { p.sub(256) };
    assert_eq!(
        h.free(stray),
        Err(ZebraError::InvalidAddress {
            address: stray as usize
        })
    );
    // The real body is still a double free.
    assert!(matches!(
        h.free(p),
        Err(ZebraError::DoubleFree { state: SlabStatus::Quarantined, .. })
    ));
    assert_eq!(h.quarantine_count(), 1);
}

#[test]
fn odd_page_addresses_are_not_allocations() {
    let h = heap(2, 0.25);
    let p = h.allocate(64).unwrap().as_ptr();
    let odd = unsafe { p.add(64) };
    assert!(!h.is_allocated(odd));
    assert_eq!(h.allocation_size(odd), None);
    assert_eq!(h.slab_status(odd), Some(SlabStatus::Allocated));
    assert!(matches!(
        h.free(odd),
        Err(ZebraError::InvalidAddress { .. })
    ));
    assert!(h.is_allocated(p));
}

#[test]
fn quarantined_memory_is_not_allocated() {
    let h = heap(4, 1.0);
    let p = h.allocate(64).unwrap().as_ptr();
    h.free(p).unwrap();
    assert!(!h.is_allocated(p));
    assert_eq!(h.allocation_size(p), None);
    assert_eq!(h.slab_status(p), Some(SlabStatus::Quarantined));

    h.pop().unwrap();
    assert_eq!(h.slab_status(p), Some(SlabStatus::Free));
}

#[test]
fn size_bounds() {
    let h = heap(2, 0.25);
    assert!(matches!(h.allocate(0), Err(ZebraError::InvalidSize { .. })));
    assert!(matches!(
        h.allocate(page_size() + 1),
        Err(ZebraError::InvalidSize { .. })
    ));
    assert!(h.allocate(page_size()).is_ok());
    assert!(matches!(
        h.allocate_block(h.max_block_allocation_size() + 1, 0, 0),
        Err(ZebraError::InvalidSize { .. })
    ));
    assert!(h.allocate_block(h.max_block_allocation_size(), 0, 0).is_ok());
}

// ---------------------------------------------------------------------------
// Memory notifications
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CountingNotifier {
    internal_calls: AtomicUsize,
    internal_bytes: AtomicUsize,
    reserved_bytes: AtomicUsize,
    returned_bytes: AtomicUsize,
}

impl MemoryNotifier for CountingNotifier {
    fn notify_internal_use(&self, _address: usize, size: usize) {
        self.internal_calls.fetch_add(1, Ordering::Relaxed);
        self.internal_bytes.fetch_add(size, Ordering::Relaxed);
    }

    fn notify_future_heap_use(&self, _address: usize, size: usize) {
        self.reserved_bytes.fetch_add(size, Ordering::Relaxed);
    }

    fn notify_returned_to_os(&self, _address: usize, size: usize) {
        self.returned_bytes.fetch_add(size, Ordering::Relaxed);
    }
}

#[test]
fn notifier_sees_reservation_bookkeeping_and_release() {
    init_page_size();
    let notifier = Arc::new(CountingNotifier::default());
    let heap_size = 8 * page_size();

    let h = ZebraHeap::new(heap_size, notifier.clone()).unwrap();
    assert_eq!(notifier.reserved_bytes.load(Ordering::Relaxed), heap_size);
    assert!(notifier.internal_calls.load(Ordering::Relaxed) >= 1);
    assert!(notifier.internal_bytes.load(Ordering::Relaxed) > 0);
    assert_eq!(notifier.returned_bytes.load(Ordering::Relaxed), 0);

    let p = h.allocate(32).unwrap();
    h.free(p.as_ptr()).unwrap();
    drop(h);
    assert_eq!(notifier.returned_bytes.load(Ordering::Relaxed), heap_size);
}

/// Collects formatted log output in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn tracing_notifier_logs_reservation_and_release() {
    init_page_size();
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let h = ZebraHeap::new(4 * page_size(), Arc::new(TracingMemoryNotifier)).unwrap();
        let p = h.allocate(16).unwrap();
        h.free(p.as_ptr()).unwrap();
    });

    let output = String::from_utf8(logs.0.lock().clone()).unwrap();
    assert!(output.contains("future heap use"), "{output}");
    assert!(output.contains("internal use"), "{output}");
    assert!(output.contains("returned to OS"), "{output}");
}

// ---------------------------------------------------------------------------
// Integrity
// ---------------------------------------------------------------------------

#[test]
fn integrity_partitions_every_slab() {
    let h = heap(8, 0.5);
    let bodies: Vec<_> = (0..6).map(|_| h.allocate(256).unwrap()).collect();
    for b in &bodies[..3] {
        h.free(b.as_ptr()).unwrap();
    }
    let report = h.check_integrity();
    assert!(report.is_ok(), "{report:?}");
    assert_eq!(report.total_slabs, 8);
    assert_eq!(report.allocated_slabs, 3);
    assert_eq!(report.quarantined_slabs, 3);
    assert_eq!(report.free_slabs, 2);
    assert_eq!(
        report.free_slabs + report.allocated_slabs + report.quarantined_slabs,
        report.total_slabs
    );
}
