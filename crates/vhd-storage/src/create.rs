use std::path::Path;

use crate::backend::StorageBackend;
use crate::dynamic::DynamicHeader;
use crate::footer::{CreationStamp, VhdFooter, VHD_FOOTER_SIZE};
use crate::image::Image;
use crate::{DiskError, DiskType, ImageConfig, Result};

/// Progress of [`create_image`]. Only used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStage {
    Opened,
    FooterBuilt,
    DynamicHeaderBuilt,
    BatWritten,
    FooterCopyWritten,
    Flushed,
}

fn enter(image_name: &str, stage: CreateStage) {
    tracing::debug!(image = %image_name, ?stage, "create");
}

/// Lay out a new VHD of `size` bytes in `image`.
///
/// Fixed disks get a single footer at the end of the logical region and an otherwise untouched
/// (sparse) data region. Dynamic disks get, in order: footer copy, dynamic header, an
/// all-unallocated BAT padded to a sector boundary, and the trailing footer.
///
/// Returns the footer that was written; its `current_size` is the final logical size.
pub fn create_image<B: StorageBackend>(
    image: &mut Image<B>,
    size: u64,
    config: &ImageConfig,
    stamp: &CreationStamp,
) -> Result<VhdFooter> {
    enter(image.name(), CreateStage::Opened);

    if size == 0 {
        return Err(DiskError::InvalidConfig("image size must be non-zero".into()));
    }
    let footer = VhdFooter::build(config.disk_type, size, config.size_compat, stamp)?;
    let size = footer.current_size;
    enter(image.name(), CreateStage::FooterBuilt);

    tracing::info!(
        image = %image.name(),
        "creating {} VHD {} ({size} bytes)",
        config.disk_type,
        footer.disk_id.hyphenated()
    );

    let raw_footer = footer.to_bytes();
    match config.disk_type {
        DiskType::Fixed => {
            image.mark_sparse()?;
            image.write_raw_at(size, &raw_footer)?;
            enter(image.name(), CreateStage::FooterCopyWritten);
            image.set_fixed_layout(footer.clone());
        }
        DiskType::Dynamic => {
            let header = DynamicHeader::build(size, config.block_size, VHD_FOOTER_SIZE as u64)?;

            image.write_raw_at(0, &raw_footer)?;
            image.write_raw_at(footer.data_offset, &header.to_bytes())?;
            enter(image.name(), CreateStage::DynamicHeaderBuilt);

            image.write_raw_at(header.table_offset, &header.empty_bat()?)?;
            enter(image.name(), CreateStage::BatWritten);

            image.write_raw_at(header.trailing_footer_offset()?, &raw_footer)?;
            enter(image.name(), CreateStage::FooterCopyWritten);

            image.set_dynamic_layout(footer.clone(), header);
        }
        DiskType::Differencing => {
            return Err(DiskError::UnsupportedDiskType(config.disk_type.code()))
        }
    }

    Ok(footer)
}

/// Create a new VHD file at `path`.
///
/// Fails without touching anything if `path` exists. If creation fails afterwards the new file
/// is removed.
pub fn create_image_file(
    path: impl AsRef<Path>,
    size: u64,
    config: &ImageConfig,
    stamp: &CreationStamp,
) -> Result<VhdFooter> {
    let mut image = Image::create_file(path)?;
    let status = create_image(&mut image, size, config, stamp);
    finish(image, status)
}

/// Close `image` according to `status`, keeping the first error.
pub(crate) fn finish<B: StorageBackend, T>(image: Image<B>, status: Result<T>) -> Result<T> {
    let name = image.name().to_string();
    match status {
        Ok(value) => {
            image.close(true)?;
            enter(&name, CreateStage::Flushed);
            Ok(value)
        }
        Err(err) => {
            if let Err(close_err) = image.close(false) {
                tracing::error!(image = %name, "{close_err}");
            }
            Err(err)
        }
    }
}
