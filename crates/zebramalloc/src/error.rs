use crate::slab::table::SlabStatus;
use thiserror::Error;

/// Every failure the zebra heap reports to its caller. None of these leave
/// the heap in a different state than before the failed call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ZebraError {
    #[error("allocation of {requested} bytes is outside (0, {max}]")]
    InvalidSize { requested: usize, max: usize },

    #[error(
        "a {size}-byte body with redzones of {min_left}/{min_right} bytes does not fit in one slab"
    )]
    UnsatisfiableLayout {
        size: usize,
        min_left: usize,
        min_right: usize,
    },

    #[error("zebra arena has no free slab left")]
    OutOfSlabs,

    #[error("address {address:#x} is not a live zebra allocation")]
    InvalidAddress { address: usize },

    #[error("double free of {address:#x}: slab {index} is already {state}")]
    DoubleFree {
        address: usize,
        index: usize,
        state: SlabStatus,
    },

    #[error("quarantine ratio {ratio} is outside [0, 1]")]
    ConfigurationOutOfRange { ratio: f32 },

    #[error("invalid value {value:?} for {key}")]
    InvalidConfigValue { key: &'static str, value: String },

    #[error("heap size {requested} does not hold a single {slab_size}-byte slab")]
    HeapTooSmall { requested: usize, slab_size: usize },

    #[error("failed to reserve {size} bytes for the zebra arena")]
    ReservationFailed { size: usize },

    #[error("failed to change protection of {len} bytes at {address:#x}")]
    ProtectionFailed { address: usize, len: usize },
}

pub type Result<T> = core::result::Result<T, ZebraError>;
