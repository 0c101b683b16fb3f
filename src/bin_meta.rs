//! Bin descriptors.
//!
//! A bin is one genome-region partition of the aligned data: a contiguous
//! contig interval plus the location of its serialized records. Descriptors
//! come from the pipeline's bin index; this crate only reads them.

use crate::reference::ReferencePosition;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct BinMetadata {
    pub bin_id: u32,
    /// First position covered by the bin.
    pub bin_start: ReferencePosition,
    /// One past the last position covered.
    pub bin_end: ReferencePosition,
    /// Byte offset of the bin's data within its file.
    pub data_offset: u64,
    /// Declared byte size of the bin's data.
    pub data_size: u64,
    /// Source path, for diagnostics only.
    pub path: PathBuf,
    /// Unaligned bins hold unmapped records verbatim; no indexing applies.
    pub unaligned: bool,
}

impl BinMetadata {
    #[inline]
    pub fn covers_position(&self, pos: ReferencePosition) -> bool {
        self.bin_start <= pos && pos < self.bin_end
    }

    #[inline]
    pub fn is_unaligned(&self) -> bool {
        self.unaligned
    }

    pub fn path_string(&self) -> String {
        self.path.display().to_string()
    }
}

impl std::fmt::Display for BinMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bin({} [{}..{}) offset:{} size:{} {})",
            self.bin_id,
            self.bin_start,
            self.bin_end,
            self.data_offset,
            self.data_size,
            self.path.display()
        )
    }
}

/// Descriptor builder used by tests and fixtures.
pub fn bin(
    bin_id: u32,
    bin_start: ReferencePosition,
    bin_end: ReferencePosition,
    data_size: u64,
    path: impl AsRef<Path>,
) -> BinMetadata {
    BinMetadata {
        bin_id,
        bin_start,
        bin_end,
        data_offset: 0,
        data_size,
        path: path.as_ref().to_path_buf(),
        unaligned: false,
    }
}
