//! Data directory table

use crate::buffers::{InputBufferStatefulWrapper, OutputBuffer};
use crate::error::{DataDirectoriesErrc, PeError, Result};
use crate::formats::pe::types::*;
use crate::packed::{FieldReader, FieldWriter, PackedLayout, PackedStruct};

/// Data directory entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageDataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl PackedLayout for ImageDataDirectory {
    const PACKED_SIZE: usize = 8;

    fn decode(f: &mut FieldReader<'_>) -> Self {
        Self {
            virtual_address: f.u32(),
            size: f.u32(),
        }
    }

    fn encode(&self, f: &mut FieldWriter<'_>) {
        f.u32(self.virtual_address);
        f.u32(self.size);
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataDirectories {
    entries: Vec<PackedStruct<ImageDataDirectory>>,
}

impl DataDirectories {
    /// Number of entries that will actually be decoded for a declared count.
    pub fn clamped_count(declared: u32) -> u32 {
        declared.min(MAX_DATA_DIRECTORIES)
    }

    /// Decode `min(declared, MAX_DATA_DIRECTORIES)` entries at the cursor.
    pub fn deserialize(
        &mut self,
        buf: &mut InputBufferStatefulWrapper,
        declared: u32,
        allow_virtual: bool,
    ) -> Result<()> {
        let count = Self::clamped_count(declared) as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let mut entry = PackedStruct::<ImageDataDirectory>::default();
            entry
                .deserialize(buf, allow_virtual)
                .map_err(|e| PeError::nested(DataDirectoriesErrc::UnableToReadDataDirectories, e))?;
            entries.push(entry);
        }
        self.entries = entries;
        Ok(())
    }

    pub fn serialize(&self, out: &mut dyn OutputBuffer, write_virtual_part: bool) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.serialize(out, write_virtual_part))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PackedStruct<ImageDataDirectory>] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut Vec<PackedStruct<ImageDataDirectory>> {
        &mut self.entries
    }

    pub fn get(&self, index: usize) -> Option<&ImageDataDirectory> {
        self.entries.get(index).map(|entry| entry.get())
    }

    /// True when the directory exists and is non-empty.
    pub fn has_directory(&self, index: usize) -> bool {
        self.get(index)
            .is_some_and(|dir| dir.virtual_address != 0 && dir.size != 0)
    }

    pub fn has_relocations(&self) -> bool {
        self.has_directory(IMAGE_DIRECTORY_ENTRY_BASERELOC)
    }
}
