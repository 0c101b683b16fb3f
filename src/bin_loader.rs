//! Reconstructs a `BinStore` from a serialized fragment stream.
//!
//! Aligned bins are read record by record: a record's paired flag means its
//! mate immediately follows in the stream and the two are taken together.
//! Records that do not cross the bin's covered interval, and byte-identical
//! repeats of the immediately preceding kept record (merged source files
//! replay records), are rolled back so the buffer holds kept fragments only.
//! Mate consistency is asserted fatally: continuing past a broken pair would
//! silently corrupt downstream genomic output.
//!
//! Unaligned bins are copied verbatim; no per-record filtering or indexing
//! is meaningful for unmapped reads.

use anyhow::{bail, Context, Result};
use std::io::Read;
use std::time::Instant;

use crate::alignment::cigar::{self, CigarOp};
use crate::bin_store::BinStore;
use crate::fragment::{FragmentHeader, FragmentRef, HEADER_SIZE};

pub struct BinLoader;

impl BinLoader {
    /// Populate `store` from `reader`, replacing any previous content.
    pub fn load_data(reader: &mut dyn Read, store: &mut BinStore) -> Result<()> {
        log::info!("Loading unsorted data from {}", store.bin);
        let start = Instant::now();

        if store.bin.is_unaligned() {
            Self::load_unaligned_data(reader, store)?;
        } else {
            Self::load_aligned_data(reader, store)?;
        }

        log::info!(
            "Loading unsorted data done in {}ms",
            start.elapsed().as_millis()
        );
        Ok(())
    }

    fn load_unaligned_data(reader: &mut dyn Read, store: &mut BinStore) -> Result<()> {
        if store.bin.data_size == 0 {
            return Ok(());
        }
        log::debug!("Reading unaligned records from {}", store.bin);
        let size = store.bin.data_size as usize;
        let (_, dst) = store.data.allocate(size);
        reader.read_exact(dst).with_context(|| {
            format!("Failed to read {} bytes from {}", size, store.bin)
        })?;
        Ok(())
    }

    fn load_aligned_data(reader: &mut dyn Read, store: &mut BinStore) -> Result<()> {
        if store.bin.data_size == 0 {
            return Ok(());
        }
        log::debug!("Reading alignment records from {}", store.bin);

        store.clear_indices();

        let mut kept_bytes: u64 = 0;
        let mut last_fragment_header: Option<FragmentHeader> = None;
        let mut last_mate_header: Option<FragmentHeader> = None;

        while let Some(offset) = Self::load_fragment(reader, store)? {
            let header = store.data.fragment(offset).header();

            if !header.is_paired() {
                if Self::fragment_crosses_bin(store, offset) {
                    kept_bytes += header.total_length as u64;
                    // the same record can appear multiple times across merged
                    // source files; keep one copy
                    if last_fragment_header != Some(header) {
                        store.store_se_index(&header, offset);
                        last_fragment_header = Some(header);
                        continue;
                    }
                }
            } else {
                let mate_offset = match Self::load_fragment(reader, store)? {
                    Some(mate_offset) => mate_offset,
                    None => bail!(
                        "Paired data is missing a mate in {} after fragment at offset {}",
                        store.bin,
                        offset
                    ),
                };
                let mate_header = store.data.fragment(mate_offset).header();

                let fragment_belongs = Self::fragment_crosses_bin(store, offset);
                let mate_belongs = Self::fragment_crosses_bin(store, mate_offset);

                // mates are kept even when only one side belongs to the bin
                if fragment_belongs || mate_belongs {
                    assert_eq!(
                        mate_header.tile, header.tile,
                        "Mate tile mismatch in {}",
                        store.bin
                    );
                    assert_eq!(
                        mate_header.cluster_id, header.cluster_id,
                        "Mate cluster mismatch in {}",
                        store.bin
                    );
                    assert_eq!(
                        mate_header.is_unmapped(),
                        header.is_mate_unmapped(),
                        "Mate unmapped flag contradicts fragment in {}",
                        store.bin
                    );
                    assert_eq!(
                        mate_header.is_reverse(),
                        header.is_mate_reverse(),
                        "Mate reverse flag contradicts fragment in {}",
                        store.bin
                    );

                    kept_bytes += header.total_length as u64;
                    kept_bytes += mate_header.total_length as u64;

                    if last_fragment_header != Some(header) {
                        assert_ne!(
                            last_mate_header,
                            Some(mate_header),
                            "New fragment but repeated mate in {}",
                            store.bin
                        );
                        store.store_fragment_index(&mate_header, mate_offset, offset);
                        store.store_fragment_index(&header, offset, mate_offset);
                        last_fragment_header = Some(header);
                        last_mate_header = Some(mate_header);
                        continue;
                    } else {
                        assert_eq!(
                            last_mate_header,
                            Some(mate_header),
                            "Repeated fragment but new mate in {}",
                            store.bin
                        );
                    }
                }
            }
            // irrelevant or duplicate; reclaim the buffer space
            store.data.rollback(offset);
        }

        log::debug!("Reading alignment records done from {}", store.bin);
        assert!(
            store.bin.data_size >= kept_bytes,
            "Too much data seen: {} for {}",
            kept_bytes,
            store.bin
        );
        store.finalize();
        Ok(())
    }

    /// Read one record into the buffer. Returns its offset, or `None` on a
    /// clean end of stream. A partial header or body is a truncation error.
    fn load_fragment(reader: &mut dyn Read, store: &mut BinStore) -> Result<Option<u64>> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        if !Self::read_header(reader, &mut header_bytes, store)? {
            return Ok(None);
        }

        let header = FragmentHeader::from_bytes(&header_bytes);
        assert!(
            header.is_initialized(),
            "Uninitialized header read from {}",
            store.bin
        );
        assert_eq!(
            header.total_length as usize,
            header.expected_total_length(),
            "Corrupt fragment (total length is broken) read from {}",
            store.bin
        );

        let total = header.total_length as usize;
        let (offset, dst) = store.data.allocate(total);
        dst[..HEADER_SIZE].copy_from_slice(&header_bytes);
        reader.read_exact(&mut dst[HEADER_SIZE..]).with_context(|| {
            format!(
                "Failed to read {} fragment body bytes from {}",
                total - HEADER_SIZE,
                store.bin
            )
        })?;
        Ok(Some(offset))
    }

    fn read_header(
        reader: &mut dyn Read,
        buf: &mut [u8; HEADER_SIZE],
        store: &BinStore,
    ) -> Result<bool> {
        let mut filled = 0usize;
        while filled < HEADER_SIZE {
            let n = reader
                .read(&mut buf[filled..])
                .with_context(|| format!("Failed to read fragment header from {}", store.bin))?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                bail!(
                    "Truncated fragment header ({} of {} bytes) in {}",
                    filled,
                    HEADER_SIZE,
                    store.bin
                );
            }
            filled += n;
        }
        Ok(true)
    }

    /// A fragment belongs to a bin if any match/mismatch run of its edit
    /// script overlaps the bin's covered interval.
    fn fragment_crosses_bin(store: &BinStore, offset: u64) -> bool {
        let record: FragmentRef<'_> = store.data.fragment(offset);
        let header = record.header();
        if !header.is_aligned() {
            return false;
        }

        let mut pos = header.fstrand_position;
        for word in record.cigar() {
            let (len, op) = cigar::unpack(word);
            match op {
                CigarOp::Align => {
                    if store.bin.covers_position(pos)
                        || store.bin.covers_position(pos.checked_add(len as u64 - 1))
                    {
                        return true;
                    }
                    pos = pos.checked_add(len as u64);
                }
                CigarOp::Delete => pos = pos.checked_add(len as u64),
                CigarOp::Insert | CigarOp::SoftClip => {}
            }
        }
        false
    }
}
