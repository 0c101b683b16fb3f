//! Small shared helpers.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use crate::bin_meta::BinMetadata;

/// Open the data stream of a bin, positioned at its data offset.
///
/// Plain files are seeked to `data_offset`; gzip-compressed bins (by `.gz`
/// extension) are decompressed transparently and must start at offset zero
/// since gzip streams do not seek.
pub fn open_data_stream(bin: &BinMetadata) -> Result<Box<dyn Read>> {
    let file = File::open(&bin.path).with_context(|| format!("Failed to open {}", bin))?;

    if bin.path.extension().is_some_and(|ext| ext == "gz") {
        assert_eq!(
            bin.data_offset, 0,
            "Compressed bin data cannot start mid-file: {}",
            bin
        );
        return Ok(Box::new(GzDecoder::new(BufReader::new(file))));
    }

    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(bin.data_offset))
        .with_context(|| format!("Failed to seek to position {} in {}", bin.data_offset, bin))?;
    Ok(Box::new(reader))
}
