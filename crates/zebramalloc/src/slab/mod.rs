pub mod arena;
pub mod queue;
pub mod table;

pub use arena::{SlabArena, SlabIndex};
pub use queue::{FreePool, QuarantineOrder, SlabQueue};
pub use table::{SlabState, SlabStatus, SlabTable};
