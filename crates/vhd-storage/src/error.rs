use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiskError>;

/// Unified error type for VHD creation and conversion.
///
/// Validation failures (`SizeAlignment`, `BlockSize`, ...) are raised before anything is written.
/// [`DiskError::Io`] carries the underlying system error text together with the operation and
/// the file it was applied to, so the command layer can print it verbatim.
#[derive(Debug, Error)]
pub enum DiskError {
    #[error("size must be in units of 512-byte sectors (got {size})")]
    SizeAlignment { size: u64 },

    #[error("invalid block size: {0}")]
    BlockSize(&'static str),

    #[error("CHS geometry did not converge after {iterations} size adjustments (size={size})")]
    GeometryDidNotConverge { iterations: u32, size: u64 },

    #[error("unsupported disk type for creation: {0}")]
    UnsupportedDiskType(u32),

    #[error("'{name}' is not a fixed VHD")]
    NotAVhd { name: String },

    #[error("out of bounds: offset={offset} len={len} capacity={capacity}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        capacity: u64,
    },

    #[error("integer overflow while computing byte offsets")]
    OffsetOverflow,

    #[error("unsupported disk image feature: {0}")]
    Unsupported(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failure reported by the underlying file primitives.
    #[error("io error: {0}")]
    Io(String),
}

impl DiskError {
    pub(crate) fn io(op: &str, name: &str, err: std::io::Error) -> Self {
        DiskError::Io(format!("couldn't {op} '{name}': {err}"))
    }
}
