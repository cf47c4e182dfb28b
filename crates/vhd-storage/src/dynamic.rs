use crate::util::{align_up_u64, be_u32, be_u64, vhd_checksum};
use crate::{DiskError, Result, SECTOR_SIZE};

pub const VHD_DYNAMIC_HEADER_SIZE: usize = 1024;
pub const VHD_DYNAMIC_COOKIE: [u8; 8] = *b"cxsparse";

pub const DEFAULT_BLOCK_SIZE: u32 = 2 * 1024 * 1024;

/// BAT entry for a block that has never been written.
pub const BAT_ENTRY_UNALLOCATED: u32 = u32::MAX;

const DYNAMIC_HEADER_VERSION: u32 = 0x0001_0000;
const CHECKSUM_RANGE: std::ops::Range<usize> = 36..40;

/// Sparse-extension header of a dynamic VHD.
///
/// Parent identifier, parent name and parent locators only matter for differencing disks and are
/// always written as zeros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicHeader {
    pub data_offset: u64,
    pub table_offset: u64,
    pub header_version: u32,
    pub max_table_entries: u32,
    pub block_size: u32,
    pub checksum: u32,
}

impl DynamicHeader {
    /// Build and checksum the header for a disk of `size` bytes whose header will live at
    /// `header_offset`. The BAT is placed directly after the header.
    pub fn build(size: u64, block_size: u32, header_offset: u64) -> Result<Self> {
        if block_size == 0 || block_size as u64 % SECTOR_SIZE as u64 != 0 {
            return Err(DiskError::BlockSize(
                "block size must be in units of 512-byte sectors",
            ));
        }

        let entries = size / block_size as u64;
        if entries == 0 {
            return Err(DiskError::BlockSize(
                "block size can't be larger than the VHD",
            ));
        }
        if entries * block_size as u64 != size {
            return Err(DiskError::BlockSize("VHD size not multiple of block size"));
        }
        let max_table_entries: u32 = entries
            .try_into()
            .map_err(|_| DiskError::BlockSize("too many blocks for a 32-bit BAT"))?;

        let table_offset = header_offset
            .checked_add(VHD_DYNAMIC_HEADER_SIZE as u64)
            .ok_or(DiskError::OffsetOverflow)?;

        let mut header = Self {
            data_offset: u64::MAX,
            table_offset,
            header_version: DYNAMIC_HEADER_VERSION,
            max_table_entries,
            block_size,
            checksum: 0,
        };
        header.checksum = header.compute_checksum();
        Ok(header)
    }

    /// Decode a header. Returns `None` if the cookie does not match.
    pub fn parse(raw: &[u8; VHD_DYNAMIC_HEADER_SIZE]) -> Option<Self> {
        if raw[..8] != VHD_DYNAMIC_COOKIE {
            return None;
        }
        Some(Self {
            data_offset: be_u64(&raw[8..16]),
            table_offset: be_u64(&raw[16..24]),
            header_version: be_u32(&raw[24..28]),
            max_table_entries: be_u32(&raw[28..32]),
            block_size: be_u32(&raw[32..36]),
            checksum: be_u32(&raw[CHECKSUM_RANGE]),
        })
    }

    pub fn to_bytes(&self) -> [u8; VHD_DYNAMIC_HEADER_SIZE] {
        let mut raw = [0u8; VHD_DYNAMIC_HEADER_SIZE];
        raw[0..8].copy_from_slice(&VHD_DYNAMIC_COOKIE);
        raw[8..16].copy_from_slice(&self.data_offset.to_be_bytes());
        raw[16..24].copy_from_slice(&self.table_offset.to_be_bytes());
        raw[24..28].copy_from_slice(&self.header_version.to_be_bytes());
        raw[28..32].copy_from_slice(&self.max_table_entries.to_be_bytes());
        raw[32..36].copy_from_slice(&self.block_size.to_be_bytes());
        raw[CHECKSUM_RANGE].copy_from_slice(&self.checksum.to_be_bytes());
        raw
    }

    pub fn compute_checksum(&self) -> u32 {
        let mut raw = self.to_bytes();
        raw[CHECKSUM_RANGE].fill(0);
        vhd_checksum(&raw)
    }

    pub fn checksum_valid(&self) -> bool {
        self.compute_checksum() == self.checksum
    }

    /// Size of the BAT on disk, padded to a whole sector.
    pub fn bat_size_on_disk(&self) -> Result<u64> {
        align_up_u64(self.max_table_entries as u64 * 4, SECTOR_SIZE as u64)
    }

    /// Offset of the trailing footer copy that follows the padded BAT.
    pub fn trailing_footer_offset(&self) -> Result<u64> {
        self.table_offset
            .checked_add(self.bat_size_on_disk()?)
            .ok_or(DiskError::OffsetOverflow)
    }

    /// An all-unallocated BAT followed by zero padding up to the next sector boundary.
    pub fn empty_bat(&self) -> Result<Vec<u8>> {
        let len: usize = self
            .bat_size_on_disk()?
            .try_into()
            .map_err(|_| DiskError::Unsupported("vhd bat too large"))?;
        let entries = self.max_table_entries as usize;

        let mut bat = Vec::new();
        bat.try_reserve_exact(len)
            .map_err(|_| DiskError::Unsupported("vhd bat too large"))?;
        for _ in 0..entries {
            bat.extend_from_slice(&BAT_ENTRY_UNALLOCATED.to_be_bytes());
        }
        bat.resize(len, 0);
        Ok(bat)
    }
}
