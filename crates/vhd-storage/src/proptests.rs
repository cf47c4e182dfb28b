use crate::{
    compute_geometry, vhd_checksum, CreationStamp, DiskType, DynamicHeader, VhdFooter,
    MAX_CHS_SECTORS, SECTOR_SIZE,
};
use proptest::prelude::*;
use std::time::{Duration, UNIX_EPOCH};
use uuid::Uuid;

const SECTOR_SIZE_U64: u64 = SECTOR_SIZE as u64;

fn chs_sized_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![
        // Small disks hit the 17-sectors-per-track branch and the zero-cylinder corner.
        4 => 1u64..=200_000,
        // Anything up to the CHS ceiling.
        4 => 1u64..=MAX_CHS_SECTORS,
        1 => Just(MAX_CHS_SECTORS - 1),
    ]
    .prop_map(|sectors| sectors * SECTOR_SIZE_U64)
}

fn stamp_strategy() -> impl Strategy<Value = CreationStamp> {
    (any::<u128>(), 0u64..=u32::MAX as u64).prop_map(|(id, secs)| CreationStamp {
        disk_id: Uuid::from_u128(id),
        created_at: UNIX_EPOCH + Duration::from_secs(secs),
    })
}

proptest! {
    #[test]
    fn geometry_without_compat_never_changes_size(size in chs_sized_strategy()) {
        let fit = compute_geometry(size, false).unwrap();
        prop_assert_eq!(fit.size, size);
        prop_assert_eq!(fit.exact, fit.geometry.total_sectors() * SECTOR_SIZE_U64 == size);
        prop_assert!(fit.geometry.total_sectors() * SECTOR_SIZE_U64 <= size);
    }

    #[test]
    fn geometry_with_compat_grows_to_an_exact_product(size in chs_sized_strategy()) {
        let fit = compute_geometry(size, true).unwrap();
        prop_assert!(fit.size >= size);
        prop_assert_eq!(fit.size % SECTOR_SIZE_U64, 0);

        let sectors = fit.size / SECTOR_SIZE_U64;
        if sectors < MAX_CHS_SECTORS {
            prop_assert!(fit.exact);
            prop_assert_eq!(fit.geometry.total_sectors(), sectors);
        }
        if fit.size != size && fit.exact {
            let g = fit.geometry;
            let min = [g.cylinders as u64, g.heads as u64, g.sectors_per_track as u64]
                .into_iter()
                .filter(|v| *v != 0)
                .min()
                .unwrap();
            prop_assert_eq!(fit.size % (min * SECTOR_SIZE_U64), 0);
        }
    }

    #[test]
    fn footer_checksum_verifies(
        size in chs_sized_strategy(),
        dynamic in any::<bool>(),
        compat in any::<bool>(),
        stamp in stamp_strategy(),
    ) {
        let disk_type = if dynamic { DiskType::Dynamic } else { DiskType::Fixed };
        let footer = VhdFooter::build(disk_type, size, compat, &stamp).unwrap();

        let mut raw = footer.to_bytes();
        let stored = u32::from_be_bytes([raw[64], raw[65], raw[66], raw[67]]);
        raw[64..68].fill(0);
        prop_assert_eq!(stored, vhd_checksum(&raw));
        prop_assert_eq!(VhdFooter::parse(&footer.to_bytes()), Some(footer));
    }

    #[test]
    fn dynamic_header_entries_cover_size_exactly(
        blocks in 1u64..=4096,
        block_sectors in 1u32..=8192,
        extra in 0u64..512,
    ) {
        let block_size = block_sectors * SECTOR_SIZE as u32;
        let size = blocks * block_size as u64;

        let hdr = DynamicHeader::build(size, block_size, 512).unwrap();
        prop_assert_eq!(hdr.max_table_entries as u64 * hdr.block_size as u64, size);
        prop_assert!(hdr.checksum_valid());

        // Any size that is not a whole number of blocks is rejected.
        let ragged = size + (extra % (block_size as u64 - 1).max(1)) + 1;
        if ragged % block_size as u64 != 0 {
            prop_assert!(DynamicHeader::build(ragged, block_size, 512).is_err());
        }
    }
}
