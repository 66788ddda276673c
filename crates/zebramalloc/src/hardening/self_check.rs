/// Result of an integrity scan over a zebra heap's slab bookkeeping.
///
/// A healthy heap has every slab index in exactly one of: the free queue, the
/// quarantine queue, or the allocated set, and the table state of each slab
/// agrees with where its index sits.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub total_slabs: usize,
    pub free_slabs: usize,
    pub allocated_slabs: usize,
    pub quarantined_slabs: usize,
    /// Queue entries whose slab is in a different state than the queue implies.
    pub state_mismatches: usize,
    /// Indices found in more than one queue, or twice in the same one.
    pub duplicate_entries: usize,
    /// Free or quarantined slabs whose index is in no queue.
    pub orphaned_slabs: usize,
    pub errors_found: usize,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.errors_found == 0
    }

    pub(crate) fn tally_errors(&mut self) {
        self.errors_found = self.state_mismatches + self.duplicate_entries + self.orphaned_slabs;
    }
}
