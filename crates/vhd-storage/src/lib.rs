//! Creation and conversion of VHD disk images.
//!
//! Two on-disk representations are produced:
//!
//! - *fixed*: the logical data region followed by a 512-byte footer
//! - *dynamic*: footer copy, dynamic header, block allocation table (BAT) and trailing footer,
//!   with every block unallocated
//!
//! The pieces, leaves first:
//!
//! - [`compute_geometry`]: logical size to legacy CHS triple, optionally growing the size
//! - [`VhdFooter`] / [`DynamicHeader`]: byte-exact, checksummed descriptors
//! - [`Image`]: bounds-checked data-region access over a [`StorageBackend`]
//! - [`create_image`] / [`convert_image`]: the pipelines, plus `*_file` variants that roll back
//!   newly created files on failure
//!
//! Reading or writing the data region of a dynamic image is not supported.

mod backend;
mod config;
mod convert;
mod create;
mod dynamic;
mod error;
mod footer;
mod geometry;
mod image;
mod util;

#[cfg(test)]
mod proptests;

pub use backend::{MemBackend, StdFileBackend, StorageBackend};
pub use config::{parse_size, ImageConfig};
pub use convert::{convert_image, convert_image_file, copy_image};
pub use create::{create_image, create_image_file, CreateStage};
pub use dynamic::{
    DynamicHeader, BAT_ENTRY_UNALLOCATED, DEFAULT_BLOCK_SIZE, VHD_DYNAMIC_COOKIE,
    VHD_DYNAMIC_HEADER_SIZE,
};
pub use error::{DiskError, Result};
pub use footer::{
    vhd_timestamp, CreationStamp, DiskType, VhdFooter, FIXED_DATA_OFFSET, VHD_FOOTER_COOKIE,
    VHD_FOOTER_SIZE,
};
pub use geometry::{chs_for_sectors, compute_geometry, ChsGeometry, GeometryFit, MAX_CHS_SECTORS};
pub use image::{Accessor, Image};
pub use util::vhd_checksum;

pub const SECTOR_SIZE: usize = 512;
