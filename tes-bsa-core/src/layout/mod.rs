//! Fixed-size on-disk record layouts, encoded little-endian regardless of
//! host byte order.

use std::io::{Read, Write};

use byteorder::{LE, ReadBytesExt, WriteBytesExt};

use crate::error::Result;

pub mod strings;

pub const MAGIC: [u8; 4] = *b"BSA\0";
pub const VERSION: u32 = 0x68;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u32,
    pub header_size: u32,
    pub archive_flags: u32,
    pub folder_count: u32,
    pub file_count: u32,
    pub total_folder_name_length: u32,
    pub total_file_name_length: u32,
    pub file_flags: u32,
}

impl Header {
    pub const SIZE: usize = 36;

    pub fn from_reader<R>(reader: &mut R) -> Result<Self>
    where
        R: Read,
    {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        Ok(Self {
            magic,
            version: reader.read_u32::<LE>()?,
            header_size: reader.read_u32::<LE>()?,
            archive_flags: reader.read_u32::<LE>()?,
            folder_count: reader.read_u32::<LE>()?,
            file_count: reader.read_u32::<LE>()?,
            total_folder_name_length: reader.read_u32::<LE>()?,
            total_file_name_length: reader.read_u32::<LE>()?,
            file_flags: reader.read_u32::<LE>()?,
        })
    }

    pub fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        writer.write_all(&self.magic)?;
        writer.write_u32::<LE>(self.version)?;
        writer.write_u32::<LE>(self.header_size)?;
        writer.write_u32::<LE>(self.archive_flags)?;
        writer.write_u32::<LE>(self.folder_count)?;
        writer.write_u32::<LE>(self.file_count)?;
        writer.write_u32::<LE>(self.total_folder_name_length)?;
        writer.write_u32::<LE>(self.total_file_name_length)?;
        writer.write_u32::<LE>(self.file_flags)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderRecord {
    pub hash: u64,
    pub file_count: u32,
    /// Stored value is the folder's file-record block position plus the
    /// total file-name table length; see the reader/writer for the split.
    pub offset: u32,
}

impl FolderRecord {
    pub const SIZE: usize = 16;

    pub fn from_reader<R>(reader: &mut R) -> Result<Self>
    where
        R: Read,
    {
        Ok(Self {
            hash: reader.read_u64::<LE>()?,
            file_count: reader.read_u32::<LE>()?,
            offset: reader.read_u32::<LE>()?,
        })
    }

    pub fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        writer.write_u64::<LE>(self.hash)?;
        writer.write_u32::<LE>(self.file_count)?;
        writer.write_u32::<LE>(self.offset)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRecord {
    pub hash: u64,
    /// Low bits: stored byte length of the data stream (excluding the
    /// original-size prefix and any embedded name). Bit 30: compression
    /// override, XORed against the archive default.
    pub size: u32,
    pub offset: u32,
}

impl FileRecord {
    pub const SIZE: usize = 16;

    pub const COMPRESSION_FLIP: u32 = 1 << 30;
    pub const SIZE_MASK: u32 = !(0b11 << 30);

    pub fn new(hash: u64, stored_len: u32, flip_compression: bool, offset: u32) -> Self {
        let mut size = stored_len & Self::SIZE_MASK;
        if flip_compression {
            size |= Self::COMPRESSION_FLIP;
        }
        Self { hash, size, offset }
    }

    #[inline]
    pub fn stored_len(&self) -> u32 {
        self.size & Self::SIZE_MASK
    }

    #[inline]
    pub fn compression_flipped(&self) -> bool {
        self.size & Self::COMPRESSION_FLIP != 0
    }

    pub fn from_reader<R>(reader: &mut R) -> Result<Self>
    where
        R: Read,
    {
        Ok(Self {
            hash: reader.read_u64::<LE>()?,
            size: reader.read_u32::<LE>()?,
            offset: reader.read_u32::<LE>()?,
        })
    }

    pub fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        writer.write_u64::<LE>(self.hash)?;
        writer.write_u32::<LE>(self.size)?;
        writer.write_u32::<LE>(self.offset)?;
        Ok(())
    }
}
