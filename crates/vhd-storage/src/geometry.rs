//! Cylinder/head/sector translation for the VHD footer.
//!
//! The footer stores a legacy CHS triple alongside the byte size. Firmware and hypervisors that
//! still look at it derive the disk size as `C * H * S * 512`, so a size that is not an exact CHS
//! product is reported as smaller than it really is. Callers can opt into growing the size until
//! the product is exact.

use crate::util::{align_up_u64, be_u16};
use crate::{DiskError, Result, SECTOR_SIZE};

/// Largest sector count a CHS triple can describe (65535 cylinders, 16 heads, 255 sectors).
pub const MAX_CHS_SECTORS: u64 = 65535 * 16 * 255;

// Sector counts at or above this use the 255-sectors-per-track layout.
const CHS_SPT255_THRESHOLD: u64 = 65535 * 16 * 63;

// Growth converges within a few hundred steps for every size below the CHS ceiling.
const MAX_SIZE_ADJUSTMENTS: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChsGeometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
}

impl ChsGeometry {
    pub fn total_sectors(&self) -> u64 {
        self.cylinders as u64 * self.heads as u64 * self.sectors_per_track as u64
    }

    /// On-disk layout: big-endian cylinders, then heads, then sectors per track.
    pub fn encode(&self) -> [u8; 4] {
        let c = self.cylinders.to_be_bytes();
        [c[0], c[1], self.heads, self.sectors_per_track]
    }

    pub fn decode(raw: &[u8; 4]) -> Self {
        Self {
            cylinders: be_u16(&raw[0..2]),
            heads: raw[2],
            sectors_per_track: raw[3],
        }
    }

    fn smallest_nonzero_term(&self) -> u64 {
        [
            self.cylinders as u64,
            self.heads as u64,
            self.sectors_per_track as u64,
        ]
        .into_iter()
        .filter(|v| *v != 0)
        .min()
        .unwrap_or(1)
    }
}

/// Derive the CHS triple for a sector count. Counts above [`MAX_CHS_SECTORS`] are clamped.
pub fn chs_for_sectors(sectors: u64) -> ChsGeometry {
    let sectors = sectors.min(MAX_CHS_SECTORS);

    let (spt, heads, cyl_x_heads) = if sectors >= CHS_SPT255_THRESHOLD {
        (255u64, 16u64, sectors / 255)
    } else {
        let mut spt = 17u64;
        let mut cyl_x_heads = sectors / spt;
        let mut heads = cyl_x_heads.div_ceil(1024).max(4);

        if cyl_x_heads >= heads * 1024 || heads > 16 {
            spt = 31;
            heads = 16;
            cyl_x_heads = sectors / spt;
        }
        if cyl_x_heads >= heads * 1024 {
            spt = 63;
            heads = 16;
            cyl_x_heads = sectors / spt;
        }
        (spt, heads, cyl_x_heads)
    };

    // Every branch bounds cylinders by 65535 and heads by 16.
    ChsGeometry {
        cylinders: (cyl_x_heads / heads) as u16,
        heads: heads as u8,
        sectors_per_track: spt as u8,
    }
}

/// Result of fitting a byte size to a CHS triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryFit {
    pub geometry: ChsGeometry,
    /// Final logical size. Larger than the requested size only in size-compatible mode.
    pub size: u64,
    /// Whether `geometry.total_sectors() * 512 == size`.
    pub exact: bool,
}

/// Compute the CHS geometry for `size` bytes.
///
/// With `size_compat`, the size grows to the next multiple of `512 * min(C, H, S)` and the
/// calculation is repeated until the CHS product matches. Without it, a mismatch only produces a
/// warning and the approximate geometry is kept.
pub fn compute_geometry(size: u64, size_compat: bool) -> Result<GeometryFit> {
    if size % SECTOR_SIZE as u64 != 0 {
        return Err(DiskError::SizeAlignment { size });
    }

    let original_size = size;
    let mut size = size;

    for iteration in 0..=MAX_SIZE_ADJUSTMENTS {
        let sectors = (size / SECTOR_SIZE as u64).min(MAX_CHS_SECTORS);
        let geometry = chs_for_sectors(sectors);
        let derived = geometry.total_sectors();

        if sectors >= MAX_CHS_SECTORS || derived == sectors {
            if size != original_size {
                tracing::warn!(
                    from = original_size,
                    to = size,
                    "increased VHD size from {original_size} to {size} bytes"
                );
            }
            return Ok(GeometryFit {
                geometry,
                size,
                exact: derived == sectors,
            });
        }

        if iteration == 0 {
            tracing::warn!(
                "C({})H({})S({})-derived total sector count ({derived}) does not match actual ({sectors}){}",
                geometry.cylinders,
                geometry.heads,
                geometry.sectors_per_track,
                if size_compat { " and will be recomputed" } else { "" }
            );
        }

        if !size_compat {
            tracing::warn!(
                "you may have problems with Hyper-V if converting raw disks to VHD, or if moving VHDs from ATA to SCSI"
            );
            return Ok(GeometryFit {
                geometry,
                size,
                exact: false,
            });
        }

        let step = geometry.smallest_nonzero_term() * SECTOR_SIZE as u64;
        let next = size.checked_add(1).ok_or(DiskError::OffsetOverflow)?;
        size = align_up_u64(next, step)?;
    }

    Err(DiskError::GeometryDidNotConverge {
        iterations: MAX_SIZE_ADJUSTMENTS,
        size,
    })
}
