use crate::bsa::flags::{ArchiveFlags, FileTypeFlags};
use crate::layout;

/// Validated archive header. Counts and name-table lengths describe the
/// archive as it was read; saves recompute them from live container state.
#[derive(Clone, Default)]
pub struct BsaHeader {
    archive_flags: ArchiveFlags,
    folder_count: u32,
    file_count: u32,
    total_folder_name_length: u32,
    total_file_name_length: u32,
    file_flags: FileTypeFlags,
}

impl BsaHeader {
    pub fn new(archive_flags: ArchiveFlags) -> Self {
        Self {
            archive_flags,
            ..Self::default()
        }
    }

    #[inline]
    pub fn archive_flags(&self) -> ArchiveFlags {
        self.archive_flags
    }

    #[inline]
    pub fn folder_count(&self) -> u32 {
        self.folder_count
    }

    #[inline]
    pub fn file_count(&self) -> u32 {
        self.file_count
    }

    #[inline]
    pub fn total_folder_name_length(&self) -> u32 {
        self.total_folder_name_length
    }

    #[inline]
    pub fn total_file_name_length(&self) -> u32 {
        self.total_file_name_length
    }

    #[inline]
    pub fn file_flags(&self) -> FileTypeFlags {
        self.file_flags
    }

    pub(crate) fn set_file_flags(&mut self, flags: FileTypeFlags) {
        self.file_flags = flags;
    }

    pub(crate) fn set_counts(
        &mut self,
        folder_count: u32,
        file_count: u32,
        total_folder_name_length: u32,
        total_file_name_length: u32,
    ) {
        self.folder_count = folder_count;
        self.file_count = file_count;
        self.total_folder_name_length = total_folder_name_length;
        self.total_file_name_length = total_file_name_length;
    }

    pub(crate) fn to_layout(&self) -> layout::Header {
        layout::Header {
            magic: layout::MAGIC,
            version: layout::VERSION,
            header_size: layout::Header::SIZE as u32,
            archive_flags: self.archive_flags.bits(),
            folder_count: self.folder_count,
            file_count: self.file_count,
            total_folder_name_length: self.total_folder_name_length,
            total_file_name_length: self.total_file_name_length,
            file_flags: self.file_flags.bits(),
        }
    }
}

impl TryFrom<layout::Header> for BsaHeader {
    type Error = crate::error::BsaError;

    fn try_from(this: layout::Header) -> Result<Self, Self::Error> {
        if this.magic != layout::MAGIC {
            return Err(Self::Error::InvalidMagic {
                expected: layout::MAGIC,
                found: this.magic,
            });
        }
        if this.version != layout::VERSION {
            return Err(Self::Error::UnsupportedVersion {
                found: this.version,
                supported: layout::VERSION,
            });
        }

        Ok(BsaHeader {
            archive_flags: ArchiveFlags::from_bits_retain(this.archive_flags),
            folder_count: this.folder_count,
            file_count: this.file_count,
            total_folder_name_length: this.total_folder_name_length,
            total_file_name_length: this.total_file_name_length,
            file_flags: FileTypeFlags::from_bits_retain(this.file_flags),
        })
    }
}

impl std::fmt::Debug for BsaHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BsaHeader")
            .field("archive_flags", &format!("{:08x}", self.archive_flags.bits()))
            .field("folder_count", &self.folder_count)
            .field("file_count", &self.file_count)
            .field("total_folder_name_length", &self.total_folder_name_length)
            .field("total_file_name_length", &self.total_file_name_length)
            .field("file_flags", &format!("{:04x}", self.file_flags.bits()))
            .finish()
    }
}
