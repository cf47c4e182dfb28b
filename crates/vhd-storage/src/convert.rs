use std::path::Path;

use crate::backend::StorageBackend;
use crate::create::{create_image, finish};
use crate::footer::{CreationStamp, VhdFooter};
use crate::image::Image;
use crate::{ImageConfig, Result, SECTOR_SIZE};

/// Lay out `dst` as a new VHD with the logical size of `src`, then copy the data region.
///
/// `progress` is called with the bytes copied so far and the total after every chunk.
pub fn convert_image<S, D>(
    src: &mut Image<S>,
    dst: &mut Image<D>,
    config: &ImageConfig,
    stamp: &CreationStamp,
    progress: impl FnMut(u64, u64),
) -> Result<VhdFooter>
where
    S: StorageBackend,
    D: StorageBackend,
{
    let footer = create_image(dst, src.size(), config, stamp)?;
    copy_image(src, dst, progress)?;
    Ok(footer)
}

/// Stream the logical region of `src` into `dst`, one sector at a time in increasing offset
/// order. Stops at the first error from either side.
pub fn copy_image<S, D>(
    src: &mut Image<S>,
    dst: &mut Image<D>,
    mut progress: impl FnMut(u64, u64),
) -> Result<()>
where
    S: StorageBackend,
    D: StorageBackend,
{
    tracing::info!(
        "copying contents from '{}' to '{}'",
        src.name(),
        dst.name()
    );

    let total = src.size();
    let mut buf = [0u8; SECTOR_SIZE];
    let mut pos = 0u64;
    while pos < total {
        src.read(pos, &mut buf)?;
        dst.write(pos, &buf)?;
        pos += SECTOR_SIZE as u64;
        progress(pos, total);
    }
    Ok(())
}

/// Convert the image at `src_path` into a new VHD at `dst_path`.
///
/// The source may be a fixed VHD or any file, which is then treated as a raw image. The
/// destination must not exist; it is removed again if the conversion fails.
pub fn convert_image_file(
    src_path: impl AsRef<Path>,
    dst_path: impl AsRef<Path>,
    config: &ImageConfig,
    stamp: &CreationStamp,
    progress: impl FnMut(u64, u64),
) -> Result<VhdFooter> {
    let mut src = Image::open_file(src_path, true)?;
    let mut dst = match Image::create_file(dst_path) {
        Ok(dst) => dst,
        Err(err) => {
            src.close(false)?;
            return Err(err);
        }
    };

    let status = convert_image(&mut src, &mut dst, config, stamp, progress);
    let status = finish(dst, status);
    let src_closed = src.close(status.is_ok());
    match (status, src_closed) {
        (Err(err), _) | (Ok(_), Err(err)) => Err(err),
        (Ok(footer), Ok(())) => Ok(footer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DiskError, DiskType, MemBackend};

    #[test]
    fn raw_to_fixed_roundtrip_in_memory() {
        let data: Vec<u8> = (0..8192u32).map(|i| (i * 7 % 251) as u8).collect();
        let mut src = Image::open("src", MemBackend::from_vec(data.clone()), true).unwrap();
        let mut dst = Image::create("dst", MemBackend::new());

        let mut last = 0;
        convert_image(
            &mut src,
            &mut dst,
            &ImageConfig::default(),
            &CreationStamp::now(),
            |done, total| {
                assert_eq!(total, 8192);
                last = done;
            },
        )
        .unwrap();
        assert_eq!(last, 8192);

        let bytes = dst.into_backend().into_vec();
        let mut reopened = Image::open("dst", MemBackend::from_vec(bytes), false).unwrap();
        assert_eq!(reopened.size(), 8192);
        let mut back = vec![0u8; 8192];
        reopened.read(0, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn dynamic_destination_has_no_data_accessor() {
        let mut src = Image::open("src", MemBackend::from_vec(vec![1u8; 4096]), true).unwrap();
        let mut dst = Image::create("dst", MemBackend::new());
        let config = ImageConfig {
            disk_type: DiskType::Dynamic,
            block_size: 4096,
            size_compat: false,
        };

        let err = convert_image(&mut src, &mut dst, &config, &CreationStamp::now(), |_, _| {})
            .unwrap_err();
        assert!(matches!(err, DiskError::Unsupported(_)));
    }
}
