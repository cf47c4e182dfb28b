use crate::dynamic::DEFAULT_BLOCK_SIZE;
use crate::{DiskError, DiskType, Result};

/// Options for the image a pipeline produces. Built once by the caller and passed by reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageConfig {
    pub disk_type: DiskType,
    /// Only used for dynamic images.
    pub block_size: u32,
    /// Grow the size so the CHS geometry describes it exactly.
    pub size_compat: bool,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            disk_type: DiskType::Fixed,
            block_size: DEFAULT_BLOCK_SIZE,
            size_compat: false,
        }
    }
}

impl ImageConfig {
    /// Resolve user-facing options.
    ///
    /// An explicit type wins; otherwise asking for a non-zero block size implies a dynamic disk.
    pub fn resolve(
        disk_type: Option<DiskType>,
        block_size: Option<u64>,
        size_compat: bool,
    ) -> Result<Self> {
        // A zero block size counts as not given.
        let block_size = block_size.filter(|bytes| *bytes != 0);
        let disk_type = disk_type.unwrap_or(if block_size.is_some() {
            DiskType::Dynamic
        } else {
            DiskType::Fixed
        });
        let block_size = match block_size {
            Some(bytes) => u32::try_from(bytes)
                .map_err(|_| DiskError::BlockSize("block size must fit in 32 bits"))?,
            None => DEFAULT_BLOCK_SIZE,
        };
        Ok(Self {
            disk_type,
            block_size,
            size_compat,
        })
    }
}

/// Parse a size such as `10G`, `64M`, `1024K`, `512S` or a plain byte count.
///
/// Suffixes are case-insensitive: `B` bytes, `K`/`M`/`G`/`T` powers of 1024, `S` 512-byte
/// sectors.
pub fn parse_size(input: &str) -> Result<u64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, suffix) = input.split_at(split);

    if digits.is_empty() {
        return Err(DiskError::InvalidConfig(format!(
            "size '{input}' does not start with a number"
        )));
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| DiskError::InvalidConfig(format!("size '{input}' is too large")))?;

    let mut chars = suffix.chars();
    let shift = match (chars.next(), chars.next()) {
        (None, _) => 0,
        (Some(c), None) => match c.to_ascii_uppercase() {
            'B' => 0,
            'S' => 9,
            'K' => 10,
            'M' => 20,
            'G' => 30,
            'T' => 40,
            other => {
                return Err(DiskError::InvalidConfig(format!(
                    "size modifier '{other}' not one of [BKMGTS]"
                )))
            }
        },
        (Some(_), Some(_)) => {
            return Err(DiskError::InvalidConfig(format!(
                "size suffix '{suffix}' must be a single character"
            )))
        }
    };

    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| DiskError::InvalidConfig(format!("size '{input}' is too large")))
}
