use crate::hardening::abort_with_message;
use crate::slab::arena::SlabIndex;
use core::marker::PhantomData;

mod private {
    pub trait Sealed {}
}

/// What a `SlabQueue` holds. The two roles are distinct types, so a free-pool
/// queue cannot be passed where the quarantine order is expected.
pub trait QueueRole: private::Sealed {
    const NAME: &'static str;
}

/// Slabs ready to be allocated.
pub enum FreePool {}

/// Quarantined slabs, oldest first.
pub enum QuarantineOrder {}

impl private::Sealed for FreePool {}
impl private::Sealed for QuarantineOrder {}

impl QueueRole for FreePool {
    const NAME: &'static str = "free pool";
}

impl QueueRole for QuarantineOrder {
    const NAME: &'static str = "quarantine";
}

/// Bounded FIFO ring of slab indices.
///
/// The capacity is the arena's slab count, so a push can only overflow if an
/// index got enqueued twice, which is a heap bug and aborts. The queue does
/// not deduplicate; the slab table's state machine keeps every index in at
/// most one queue.
pub struct SlabQueue<R: QueueRole> {
    entries: Box<[Option<SlabIndex>]>,
    head: usize,
    tail: usize,
    count: usize,
    _role: PhantomData<R>,
}

impl<R: QueueRole> SlabQueue<R> {
    pub fn with_capacity(capacity: usize) -> Self {
        SlabQueue {
            entries: vec![None; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            count: 0,
            _role: PhantomData,
        }
    }

    /// A queue holding `indices` in iteration order.
    pub fn filled(capacity: usize, indices: impl IntoIterator<Item = SlabIndex>) -> Self {
        let mut queue = Self::with_capacity(capacity);
        for index in indices {
            queue.push_back(index);
        }
        queue
    }

    pub fn push_back(&mut self, index: SlabIndex) {
        if self.count == self.entries.len() {
            abort_with_message(&format!(
                "zebramalloc: {} queue overflow pushing slab {}\n",
                R::NAME,
                index
            ));
        }
        self.entries[self.tail] = Some(index);
        self.tail = (self.tail + 1) % self.entries.len();
        self.count += 1;
    }

    pub fn pop_front(&mut self) -> Option<SlabIndex> {
        if self.count == 0 {
            return None;
        }
        let index = self.entries[self.head].take();
        self.head = (self.head + 1) % self.entries.len();
        self.count -= 1;
        if index.is_none() {
            abort_with_message(&format!(
                "zebramalloc: {} queue lost an entry\n",
                R::NAME
            ));
        }
        index
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = SlabIndex> + '_ {
        let capacity = self.entries.len();
        (0..self.count).filter_map(move |i| self.entries[(self.head + i) % capacity])
    }

    /// Address and size of the ring storage, for memory notifications.
    pub fn storage(&self) -> (usize, usize) {
        (
            self.entries.as_ptr() as usize,
            core::mem::size_of_val(&*self.entries),
        )
    }
}
