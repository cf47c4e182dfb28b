use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::geometry::{compute_geometry, ChsGeometry};
use crate::util::{be_u32, be_u64, vhd_checksum};
use crate::{DiskError, Result, SECTOR_SIZE};

pub const VHD_FOOTER_SIZE: usize = 512;
pub const VHD_FOOTER_COOKIE: [u8; 8] = *b"conectix";

/// Footer `data_offset` for fixed disks: there is no further structure to point at.
pub const FIXED_DATA_OFFSET: u64 = u64::MAX;

pub(crate) const VHD_FORMAT_VERSION: u32 = 0x0001_0000;
const FOOTER_FEATURES_RESERVED: u32 = 2;

const CREATOR_APP: [u8; 4] = *b"vhdt";
const CREATOR_VERSION: u32 = 1;
#[cfg(windows)]
const CREATOR_OS: [u8; 4] = *b"Win ";
#[cfg(not(windows))]
const CREATOR_OS: [u8; 4] = *b"Lnux";

// 2000-01-01T00:00:00Z as a Unix timestamp.
const VHD_EPOCH_UNIX_SECS: u64 = 946_684_800;

const CHECKSUM_RANGE: std::ops::Range<usize> = 64..68;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskType {
    Fixed,
    Dynamic,
    Differencing,
}

impl DiskType {
    pub fn code(self) -> u32 {
        match self {
            DiskType::Fixed => 2,
            DiskType::Dynamic => 3,
            DiskType::Differencing => 4,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            2 => Some(DiskType::Fixed),
            3 => Some(DiskType::Dynamic),
            4 => Some(DiskType::Differencing),
            _ => None,
        }
    }
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiskType::Fixed => "fixed",
            DiskType::Dynamic => "dynamic",
            DiskType::Differencing => "differencing",
        })
    }
}

/// Identity and time of a newly created image.
///
/// Production code uses [`CreationStamp::now`]; tests pin both fields to get reproducible bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreationStamp {
    pub disk_id: Uuid,
    pub created_at: SystemTime,
}

impl CreationStamp {
    pub fn now() -> Self {
        Self {
            disk_id: Uuid::new_v4(),
            created_at: SystemTime::now(),
        }
    }
}

/// Seconds since the VHD epoch, saturating at zero for earlier times.
pub fn vhd_timestamp(at: SystemTime) -> u32 {
    let unix = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    unix.saturating_sub(VHD_EPOCH_UNIX_SECS) as u32
}

/// The 512-byte descriptor stored at the end of every VHD (and at offset 0 of dynamic ones).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhdFooter {
    pub features: u32,
    pub file_format_version: u32,
    pub data_offset: u64,
    pub timestamp: u32,
    pub creator_app: [u8; 4],
    pub creator_version: u32,
    pub creator_os: [u8; 4],
    pub original_size: u64,
    pub current_size: u64,
    pub geometry: ChsGeometry,
    /// Raw disk type code; see [`DiskType::from_code`].
    pub disk_type: u32,
    pub checksum: u32,
    pub disk_id: Uuid,
    pub saved_state: u8,
}

impl VhdFooter {
    /// Build and checksum a footer for a new image of `size` bytes.
    ///
    /// The geometry calculation may grow the size in size-compatible mode; the grown value ends
    /// up in `original_size`/`current_size` and must be used for everything built after this.
    pub fn build(
        disk_type: DiskType,
        size: u64,
        size_compat: bool,
        stamp: &CreationStamp,
    ) -> Result<Self> {
        if size % SECTOR_SIZE as u64 != 0 {
            return Err(DiskError::SizeAlignment { size });
        }
        let data_offset = match disk_type {
            DiskType::Fixed => FIXED_DATA_OFFSET,
            DiskType::Dynamic => VHD_FOOTER_SIZE as u64,
            DiskType::Differencing => return Err(DiskError::UnsupportedDiskType(disk_type.code())),
        };

        let fit = compute_geometry(size, size_compat)?;

        let mut footer = Self {
            features: FOOTER_FEATURES_RESERVED,
            file_format_version: VHD_FORMAT_VERSION,
            data_offset,
            timestamp: vhd_timestamp(stamp.created_at),
            creator_app: CREATOR_APP,
            creator_version: CREATOR_VERSION,
            creator_os: CREATOR_OS,
            original_size: fit.size,
            current_size: fit.size,
            geometry: fit.geometry,
            disk_type: disk_type.code(),
            checksum: 0,
            disk_id: stamp.disk_id,
            saved_state: 0,
        };
        footer.checksum = footer.compute_checksum();
        Ok(footer)
    }

    /// Decode a footer. Returns `None` if the cookie does not match.
    pub fn parse(raw: &[u8; VHD_FOOTER_SIZE]) -> Option<Self> {
        if raw[..8] != VHD_FOOTER_COOKIE {
            return None;
        }
        let mut geometry = [0u8; 4];
        geometry.copy_from_slice(&raw[56..60]);
        let mut disk_id = [0u8; 16];
        disk_id.copy_from_slice(&raw[68..84]);

        Some(Self {
            features: be_u32(&raw[8..12]),
            file_format_version: be_u32(&raw[12..16]),
            data_offset: be_u64(&raw[16..24]),
            timestamp: be_u32(&raw[24..28]),
            creator_app: [raw[28], raw[29], raw[30], raw[31]],
            creator_version: be_u32(&raw[32..36]),
            creator_os: [raw[36], raw[37], raw[38], raw[39]],
            original_size: be_u64(&raw[40..48]),
            current_size: be_u64(&raw[48..56]),
            geometry: ChsGeometry::decode(&geometry),
            disk_type: be_u32(&raw[60..64]),
            checksum: be_u32(&raw[CHECKSUM_RANGE]),
            disk_id: Uuid::from_bytes(disk_id),
            saved_state: raw[84],
        })
    }

    pub fn to_bytes(&self) -> [u8; VHD_FOOTER_SIZE] {
        let mut raw = [0u8; VHD_FOOTER_SIZE];
        raw[0..8].copy_from_slice(&VHD_FOOTER_COOKIE);
        raw[8..12].copy_from_slice(&self.features.to_be_bytes());
        raw[12..16].copy_from_slice(&self.file_format_version.to_be_bytes());
        raw[16..24].copy_from_slice(&self.data_offset.to_be_bytes());
        raw[24..28].copy_from_slice(&self.timestamp.to_be_bytes());
        raw[28..32].copy_from_slice(&self.creator_app);
        raw[32..36].copy_from_slice(&self.creator_version.to_be_bytes());
        raw[36..40].copy_from_slice(&self.creator_os);
        raw[40..48].copy_from_slice(&self.original_size.to_be_bytes());
        raw[48..56].copy_from_slice(&self.current_size.to_be_bytes());
        raw[56..60].copy_from_slice(&self.geometry.encode());
        raw[60..64].copy_from_slice(&self.disk_type.to_be_bytes());
        raw[CHECKSUM_RANGE].copy_from_slice(&self.checksum.to_be_bytes());
        raw[68..84].copy_from_slice(self.disk_id.as_bytes());
        raw[84] = self.saved_state;
        raw
    }

    /// Checksum over the encoded footer with the checksum field zeroed.
    pub fn compute_checksum(&self) -> u32 {
        let mut raw = self.to_bytes();
        raw[CHECKSUM_RANGE].fill(0);
        vhd_checksum(&raw)
    }

    pub fn checksum_valid(&self) -> bool {
        self.compute_checksum() == self.checksum
    }

    pub fn kind(&self) -> Option<DiskType> {
        DiskType::from_code(self.disk_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stamp() -> CreationStamp {
        CreationStamp {
            disk_id: Uuid::from_u128(0x0011_2233_4455_6677_8899_aabb_ccdd_eeff),
            created_at: UNIX_EPOCH + Duration::from_secs(VHD_EPOCH_UNIX_SECS + 1234),
        }
    }

    #[test]
    fn fixed_footer_layout() {
        let footer = VhdFooter::build(DiskType::Fixed, 16 * 1024 * 1024, false, &stamp()).unwrap();
        let raw = footer.to_bytes();

        assert_eq!(&raw[0..8], b"conectix");
        assert_eq!(be_u32(&raw[8..12]), 2);
        assert_eq!(be_u32(&raw[12..16]), 0x0001_0000);
        assert_eq!(be_u64(&raw[16..24]), u64::MAX);
        assert_eq!(be_u32(&raw[24..28]), 1234);
        assert_eq!(&raw[28..32], b"vhdt");
        assert_eq!(be_u32(&raw[32..36]), 1);
        assert_eq!(be_u64(&raw[40..48]), 16 * 1024 * 1024);
        assert_eq!(be_u64(&raw[48..56]), 16 * 1024 * 1024);
        assert_eq!(be_u32(&raw[60..64]), 2);
        assert_eq!(
            &raw[68..84],
            &[
                0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc,
                0xdd, 0xee, 0xff
            ]
        );
        assert!(raw[84..].iter().all(|b| *b == 0));
    }

    #[test]
    fn dynamic_footer_points_at_header() {
        let footer =
            VhdFooter::build(DiskType::Dynamic, 64 * 1024 * 1024, false, &stamp()).unwrap();
        assert_eq!(footer.data_offset, 512);
        assert_eq!(footer.kind(), Some(DiskType::Dynamic));
    }

    #[test]
    fn checksum_is_verifiable_from_bytes() {
        let footer = VhdFooter::build(DiskType::Fixed, 1024 * 1024, false, &stamp()).unwrap();
        let mut raw = footer.to_bytes();
        let stored = be_u32(&raw[64..68]);
        raw[64..68].fill(0);
        assert_eq!(stored, vhd_checksum(&raw));
        assert!(footer.checksum_valid());
    }

    #[test]
    fn parse_roundtrips_and_rejects_bad_cookie() {
        let footer = VhdFooter::build(DiskType::Fixed, 1024 * 1024, true, &stamp()).unwrap();
        let raw = footer.to_bytes();
        assert_eq!(VhdFooter::parse(&raw), Some(footer));

        let mut bad = raw;
        bad[0] = b'C';
        assert_eq!(VhdFooter::parse(&bad), None);
    }

    #[test]
    fn compat_mode_grows_both_sizes() {
        let footer =
            VhdFooter::build(DiskType::Fixed, 64 * 1024 * 1024, true, &stamp()).unwrap();
        assert_eq!(footer.original_size, 67_125_248);
        assert_eq!(footer.current_size, 67_125_248);
        assert_eq!(footer.geometry.total_sectors() * 512, 67_125_248);
    }

    #[test]
    fn build_rejects_misaligned_size_and_differencing() {
        assert!(matches!(
            VhdFooter::build(DiskType::Fixed, 513, false, &stamp()).unwrap_err(),
            DiskError::SizeAlignment { size: 513 }
        ));
        assert!(matches!(
            VhdFooter::build(DiskType::Differencing, 512, false, &stamp()).unwrap_err(),
            DiskError::UnsupportedDiskType(4)
        ));
    }

    #[test]
    fn timestamp_saturates_before_vhd_epoch() {
        assert_eq!(vhd_timestamp(UNIX_EPOCH), 0);
        assert_eq!(
            vhd_timestamp(UNIX_EPOCH + Duration::from_secs(VHD_EPOCH_UNIX_SECS)),
            0
        );
    }
}
