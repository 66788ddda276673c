#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use zebramalloc::{NullMemoryNotifier, ZebraConfig, ZebraError, ZebraHeap};

/// Interprets a byte slice as a sequence of zebra heap operations.
///
/// Each operation is encoded as:
///   byte 0: opcode (low 3 bits)
///   byte 1-2: size (little-endian u16)
///   byte 3: slot index, or the ratio in 1/255ths for opcode 5
///
/// The heap has 16 slabs; up to 32 pointers are tracked so that running out
/// of slabs gets exercised too.
const MAX_SLOTS: usize = 32;
const SLABS: usize = 16;

fuzz_target!(|data: &[u8]| {
    zebramalloc::util::init_page_size();
    let page = zebramalloc::util::page_size();
    let config = ZebraConfig::default()
        .with_heap_size(SLABS * 2 * page)
        .with_quarantine_ratio(0.25);
    let heap = ZebraHeap::with_config(&config, Arc::new(NullMemoryNotifier)).unwrap();
    let mut slots: [Option<(*mut u8, usize)>; MAX_SLOTS] = [None; MAX_SLOTS];

    let mut i = 0;
    while i + 4 <= data.len() {
        let opcode = data[i] & 0x07;
        let size = u16::from_le_bytes([data[i + 1], data[i + 2]]) as usize % (page + 1);
        let arg = data[i + 3];
        let slot = arg as usize % MAX_SLOTS;
        i += 4;

        match opcode {
            0 | 1 => {
                if slots[slot].is_some() {
                    continue;
                }
                let result = if opcode == 0 {
                    heap.allocate(size)
                } else {
                    heap.allocate_block(size, (arg as usize) * 8, 16)
                        .map(|(body, _)| body)
                };
                match result {
                    Ok(body) => {
                        // The whole body sits in the writable even page.
                        unsafe { std::ptr::write_bytes(body.as_ptr(), 0xAA, size) };
                        assert_eq!(heap.allocation_size(body.as_ptr()), Some(size));
                        slots[slot] = Some((body.as_ptr(), size));
                    }
                    Err(ZebraError::OutOfSlabs) => assert_eq!(heap.stats().free_slabs, 0),
                    Err(ZebraError::InvalidSize { .. })
                    | Err(ZebraError::UnsatisfiableLayout { .. }) => {}
                    Err(err) => panic!("unexpected allocation failure: {err}"),
                }
            }
            2 => {
                if let Some((ptr, _)) = slots[slot].take() {
                    heap.free(ptr).unwrap();
                    assert!(!heap.is_allocated(ptr));
                    assert!(matches!(
                        heap.free(ptr),
                        Err(ZebraError::DoubleFree { .. })
                    ));
                }
            }
            3 => {
                let before = heap.quarantine_count();
                let evicted = heap.pop();
                assert_eq!(evicted.is_some(), before > 0);
            }
            4 => {
                let before = heap.quarantine_count();
                assert_eq!(heap.empty().len(), before);
                assert_eq!(heap.quarantine_count(), 0);
            }
            5 => {
                heap.set_quarantine_ratio(arg as f32 / 255.0).unwrap();
            }
            6 => {
                if let Some((ptr, len)) = slots[slot] {
                    if len > 1 {
                        let interior = unsafe { ptr.add(1) };
                        assert!(heap.free(interior).is_err());
                        assert!(heap.is_allocated(ptr));
                    }
                }
            }
            _ => {
                if let Some((ptr, len)) = slots[slot] {
                    for j in 0..len.min(256) {
                        assert_eq!(unsafe { *ptr.add(j) }, 0xAA);
                    }
                }
            }
        }

        let report = heap.check_integrity();
        assert!(report.is_ok(), "{report:?}");
        let stats = heap.stats();
        assert_eq!(
            stats.free_slabs + stats.allocated_slabs + stats.quarantined_slabs,
            SLABS
        );
        assert_eq!(stats.allocated_slabs, slots.iter().flatten().count());
    }
});
