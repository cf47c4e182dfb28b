use std::path::Path;

use crate::backend::{StdFileBackend, StorageBackend};
use crate::dynamic::DynamicHeader;
use crate::footer::{VhdFooter, VHD_FOOTER_SIZE};
use crate::util::checked_range;
use crate::{DiskError, DiskType, Result};

/// How logical offsets of an image map onto its file.
///
/// Both variants map 1:1: a fixed container keeps its footer after the data region, so the data
/// starts at file offset 0 just like a raw image. They differ in what was established about the
/// file: `FooterRelative` is only used once the trailing footer was verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessor {
    /// Arbitrary file, or an image this process is laying out itself.
    Raw,
    /// Verified fixed VHD.
    FooterRelative,
}

impl Accessor {
    fn file_offset(self, offset: u64) -> u64 {
        match self {
            Accessor::Raw => offset,
            Accessor::FooterRelative => offset,
        }
    }
}

/// One open disk image file, exclusively owned by the pipeline working on it.
///
/// Data-region transfers go through [`Image::read`]/[`Image::write`], which bounds-check against
/// the logical size before touching the backend. Dynamic images have no data-region accessor.
#[derive(Debug)]
pub struct Image<B> {
    name: String,
    backend: B,
    size: u64,
    cursor: u64,
    disk_type: Option<DiskType>,
    accessor: Option<Accessor>,
    footer: Option<VhdFooter>,
    dynamic: Option<DynamicHeader>,
    created: bool,
}

impl Image<StdFileBackend> {
    /// Open an existing file as a source image. See [`Image::open`].
    pub fn open_file(path: impl AsRef<Path>, raw_ok: bool) -> Result<Self> {
        let path = path.as_ref();
        let backend = StdFileBackend::open_read_only(path)?;
        Self::open(path.display().to_string(), backend, raw_ok)
    }

    /// Exclusively create a new file. Fails, leaving it untouched, if `path` already exists.
    pub fn create_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let backend = StdFileBackend::create_new(path)?;
        Ok(Self::create(path.display().to_string(), backend))
    }
}

impl<B: StorageBackend> Image<B> {
    /// Open an existing image.
    ///
    /// The trailing sector is checked for a fixed VHD footer. Only fixed containers are
    /// recognised; anything else (including dynamic VHDs) is either treated as a raw image when
    /// `raw_ok` is set or rejected.
    pub fn open(name: impl Into<String>, mut backend: B, raw_ok: bool) -> Result<Self> {
        let name = name.into();
        let file_size = backend.len()?;

        let mut image = Self {
            name,
            backend,
            size: 0,
            cursor: 0,
            disk_type: None,
            accessor: None,
            footer: None,
            dynamic: None,
            created: false,
        };

        if file_size >= VHD_FOOTER_SIZE as u64 {
            let footer_offset = file_size - VHD_FOOTER_SIZE as u64;
            let mut raw = [0u8; VHD_FOOTER_SIZE];
            image.read_raw_at(footer_offset, &mut raw)?;
            if let Some(footer) = VhdFooter::parse(&raw) {
                if footer.kind() == Some(DiskType::Fixed) {
                    image.size = footer_offset;
                    image.disk_type = Some(DiskType::Fixed);
                    image.accessor = Some(Accessor::FooterRelative);
                    image.footer = Some(footer);
                    return Ok(image);
                }
            }
        }

        if !raw_ok {
            return Err(DiskError::NotAVhd { name: image.name });
        }
        tracing::warn!("'{}' treated as raw image", image.name);
        image.size = file_size;
        image.accessor = Some(Accessor::Raw);
        Ok(image)
    }

    /// Wrap a freshly created, empty backend. Its layout is filled in by the create pipeline.
    pub fn create(name: impl Into<String>, backend: B) -> Self {
        Self {
            name: name.into(),
            backend,
            size: 0,
            cursor: 0,
            disk_type: None,
            accessor: None,
            footer: None,
            dynamic: None,
            created: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// File offset just past the last transfer.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// `None` for files treated as raw images.
    pub fn disk_type(&self) -> Option<DiskType> {
        self.disk_type
    }

    pub fn accessor(&self) -> Option<Accessor> {
        self.accessor
    }

    pub fn footer(&self) -> Option<&VhdFooter> {
        self.footer.as_ref()
    }

    pub fn dynamic_header(&self) -> Option<&DynamicHeader> {
        self.dynamic.as_ref()
    }

    pub fn was_created(&self) -> bool {
        self.created
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Read `buf.len()` bytes of the logical data region starting at `offset`.
    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let accessor = self.data_accessor()?;
        checked_range(offset, buf.len(), self.size)?;
        self.read_raw_at(accessor.file_offset(offset), buf)
    }

    /// Write `buf` into the logical data region starting at `offset`.
    pub fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let accessor = self.data_accessor()?;
        checked_range(offset, buf.len(), self.size)?;
        self.write_raw_at(accessor.file_offset(offset), buf)
    }

    /// Close the image.
    ///
    /// On success the backend is flushed first. On failure an image created by this process is
    /// discarded; a pre-existing file is left as it is.
    pub fn close(mut self, success: bool) -> Result<()> {
        if success {
            return self.backend.flush();
        }
        if self.created {
            tracing::debug!(image = %self.name, "removing partially created image");
            return self.backend.discard();
        }
        Ok(())
    }

    fn data_accessor(&self) -> Result<Accessor> {
        match (self.accessor, self.disk_type) {
            (Some(accessor), _) => Ok(accessor),
            (None, Some(DiskType::Dynamic)) => {
                Err(DiskError::Unsupported("dynamic vhd data region access"))
            }
            (None, _) => Err(DiskError::Unsupported("image has no data region yet")),
        }
    }

    /// Unchecked file-level read, used for metadata outside the logical region.
    pub(crate) fn read_raw_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.cursor = offset;
        self.backend.read_at(offset, buf)?;
        self.cursor = offset + buf.len() as u64;
        Ok(())
    }

    /// Unchecked file-level write, used for metadata outside the logical region.
    pub(crate) fn write_raw_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.cursor = offset;
        self.backend.write_at(offset, buf)?;
        self.cursor = offset + buf.len() as u64;
        Ok(())
    }

    pub(crate) fn mark_sparse(&mut self) -> Result<()> {
        self.backend.mark_sparse()
    }

    pub(crate) fn set_fixed_layout(&mut self, footer: VhdFooter) {
        self.size = footer.current_size;
        self.disk_type = Some(DiskType::Fixed);
        self.accessor = Some(Accessor::Raw);
        self.footer = Some(footer);
        self.dynamic = None;
    }

    pub(crate) fn set_dynamic_layout(&mut self, footer: VhdFooter, header: DynamicHeader) {
        self.size = footer.current_size;
        self.disk_type = Some(DiskType::Dynamic);
        self.accessor = None;
        self.footer = Some(footer);
        self.dynamic = Some(header);
    }
}
