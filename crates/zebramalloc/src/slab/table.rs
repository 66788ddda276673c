use crate::hardening::abort_with_message;
use crate::layout::BlockInfo;
use crate::slab::arena::SlabIndex;
use core::fmt;

/// State of a slab without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlabStatus {
    Free,
    Allocated,
    Quarantined,
}

impl fmt::Display for SlabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SlabStatus::Free => "free",
            SlabStatus::Allocated => "allocated",
            SlabStatus::Quarantined => "quarantined",
        })
    }
}

/// A slab's record. Allocation metadata only exists while the slab holds an
/// allocation, live or quarantined.
///
/// Lifecycle: `Free -> Allocated -> Quarantined -> Free -> ...`. Nothing
/// skips a step; in particular an allocated slab never goes straight back to
/// free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlabState {
    Free,
    Allocated(BlockInfo),
    Quarantined(BlockInfo),
}

impl SlabState {
    pub fn status(&self) -> SlabStatus {
        match self {
            SlabState::Free => SlabStatus::Free,
            SlabState::Allocated(_) => SlabStatus::Allocated,
            SlabState::Quarantined(_) => SlabStatus::Quarantined,
        }
    }
}

/// One record per slab, indexed by slab number. The single source of truth
/// for what a slab is doing.
pub struct SlabTable {
    slabs: Box<[SlabState]>,
}

impl SlabTable {
    /// All slabs start out free.
    pub fn new(slab_count: usize) -> Self {
        SlabTable {
            slabs: vec![SlabState::Free; slab_count].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn get(&self, index: SlabIndex) -> &SlabState {
        &self.slabs[index.get()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlabState> + '_ {
        self.slabs.iter()
    }

    /// `Free -> Allocated`.
    pub fn mark_allocated(&mut self, index: SlabIndex, info: BlockInfo) {
        let slab = &mut self.slabs[index.get()];
        if *slab != SlabState::Free {
            Self::bad_transition(index, slab.status(), SlabStatus::Allocated);
        }
        *slab = SlabState::Allocated(info);
    }

    /// `Allocated -> Quarantined`. The caller has already ruled out misuse
    /// (double free, foreign address); anything else here is a heap bug.
    pub fn mark_quarantined(&mut self, index: SlabIndex) -> BlockInfo {
        let slab = &mut self.slabs[index.get()];
        match *slab {
            SlabState::Allocated(info) => {
                *slab = SlabState::Quarantined(info);
                info
            }
            other => Self::bad_transition(index, other.status(), SlabStatus::Quarantined),
        }
    }

    /// `Quarantined -> Free`. Returns the metadata the slab carried.
    pub fn mark_free(&mut self, index: SlabIndex) -> BlockInfo {
        let slab = &mut self.slabs[index.get()];
        match *slab {
            SlabState::Quarantined(info) => {
                *slab = SlabState::Free;
                info
            }
            other => Self::bad_transition(index, other.status(), SlabStatus::Free),
        }
    }

    /// Address and size of the record storage, for memory notifications.
    pub fn storage(&self) -> (usize, usize) {
        (
            self.slabs.as_ptr() as usize,
            core::mem::size_of_val(&*self.slabs),
        )
    }

    #[cold]
    fn bad_transition(index: SlabIndex, from: SlabStatus, to: SlabStatus) -> ! {
        abort_with_message(&format!(
            "zebramalloc: slab {} cannot go from {} to {}\n",
            index, from, to
        ))
    }
}
