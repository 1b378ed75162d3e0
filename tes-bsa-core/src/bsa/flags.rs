use bitflags::bitflags;
use bstr::BStr;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ArchiveFlags: u32 {
        /// Folder records are followed by their BZString names.
        const NAMED_DIRECTORIES = 1 << 0;
        /// The flat CString file-name table is present.
        const NAMED_FILES = 1 << 1;
        /// Files are compressed unless their record bit flips it.
        const DEFAULT_COMPRESSED = 1 << 2;
        /// Each data block starts with a BString copy of the full path.
        const BSTRING_PREFIXED = 1 << 8;
    }
}

impl ArchiveFlags {
    pub fn named_directories(&self) -> bool {
        self.contains(Self::NAMED_DIRECTORIES)
    }

    pub fn named_files(&self) -> bool {
        self.contains(Self::NAMED_FILES)
    }

    pub fn default_compressed(&self) -> bool {
        self.contains(Self::DEFAULT_COMPRESSED)
    }

    pub fn bstring_prefixed(&self) -> bool {
        self.contains(Self::BSTRING_PREFIXED)
    }
}

impl Serialize for ArchiveFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for ArchiveFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = u32::deserialize(deserializer)?;
        Ok(ArchiveFlags::from_bits_retain(value))
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct FileTypeFlags: u32 {
        const MESHES = 1 << 0;
        const TEXTURES = 1 << 1;
        const MENUS = 1 << 2;
        const SOUNDS = 1 << 3;
        const VOICES = 1 << 4;
        const SHADERS = 1 << 5;
        const TREES = 1 << 6;
        const FONTS = 1 << 7;
        const MISC = 1 << 8;
    }
}

impl FileTypeFlags {
    /// Classification bit for one extension. Unrecognized extensions
    /// contribute nothing.
    pub fn classify(extension: &BStr) -> Self {
        let ext = extension.to_ascii_lowercase();
        match ext.as_slice() {
            b".nif" => Self::MESHES,
            b".dds" => Self::TEXTURES,
            b".xml" => Self::MENUS,
            b".wav" => Self::SOUNDS,
            b".mp3" => Self::VOICES,
            b".txt" | b".html" | b".bat" | b".scc" => Self::SHADERS,
            b".spt" => Self::TREES,
            b".tex" | b".fnt" => Self::FONTS,
            b".ctl" => Self::MISC,
            _ => Self::empty(),
        }
    }
}

impl Serialize for FileTypeFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for FileTypeFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = u32::deserialize(deserializer)?;
        Ok(FileTypeFlags::from_bits_retain(value))
    }
}
