use crate::error::{Result, ZebraError};
use crate::hardening::quarantine::QuarantineRatio;
use crate::util::{DEFAULT_HEAP_SIZE, DEFAULT_QUARANTINE_RATIO};

pub const HEAP_SIZE_VAR: &str = "ZEBRAMALLOC_HEAP_SIZE";
pub const QUARANTINE_RATIO_VAR: &str = "ZEBRAMALLOC_QUARANTINE_RATIO";

/// Construction parameters of a zebra heap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZebraConfig {
    /// Bytes to reserve. Rounded down to whole slabs by the heap.
    pub heap_size: usize,
    /// Initial share of the heap allowed to sit in quarantine, in `[0, 1]`.
    pub quarantine_ratio: f32,
}

impl Default for ZebraConfig {
    fn default() -> Self {
        ZebraConfig {
            heap_size: DEFAULT_HEAP_SIZE,
            quarantine_ratio: DEFAULT_QUARANTINE_RATIO,
        }
    }
}

impl ZebraConfig {
    pub fn with_heap_size(mut self, heap_size: usize) -> Self {
        self.heap_size = heap_size;
        self
    }

    pub fn with_quarantine_ratio(mut self, quarantine_ratio: f32) -> Self {
        self.quarantine_ratio = quarantine_ratio;
        self
    }

    /// Read overrides from `ZEBRAMALLOC_HEAP_SIZE` and
    /// `ZEBRAMALLOC_QUARANTINE_RATIO`. Unset variables keep the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with the variables supplied by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = ZebraConfig::default();
        if let Some(val) = lookup(HEAP_SIZE_VAR) {
            config.heap_size = parse_usize(&val).ok_or(ZebraError::InvalidConfigValue {
                key: HEAP_SIZE_VAR,
                value: val,
            })?;
        }
        if let Some(val) = lookup(QUARANTINE_RATIO_VAR) {
            config.quarantine_ratio =
                val.trim()
                    .parse::<f32>()
                    .map_err(|_| ZebraError::InvalidConfigValue {
                        key: QUARANTINE_RATIO_VAR,
                        value: val.clone(),
                    })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject a ratio outside `[0, 1]`. The heap size is checked against the
    /// slab size at construction time, when the page size is known.
    pub fn validate(&self) -> Result<()> {
        QuarantineRatio::new(self.quarantine_ratio).map(|_| ())
    }
}

/// Parse a decimal byte count. Digits only; no sign, no suffix.
fn parse_usize(val: &str) -> Option<usize> {
    let val = val.trim();
    if val.is_empty() {
        return None;
    }
    let mut result: usize = 0;
    for byte in val.bytes() {
        if !byte.is_ascii_digit() {
            return None;
        }
        result = result.checked_mul(10)?.checked_add((byte - b'0') as usize)?;
    }
    Some(result)
}
