//! Per-bin fragment store: the packed arena plus its three index
//! collections. Owned by one bin's realignment pass and discarded once the
//! realigned data is handed to the next stage.

use crate::bin_meta::BinMetadata;
use crate::fragment::FragmentHeader;
use crate::fragment_index::{
    FStrandFragmentIndex, RStrandOrShadowFragmentIndex, SeFragmentIndex,
};
use crate::packed_buffer::PackedFragmentBuffer;

pub struct BinStore {
    pub bin: BinMetadata,
    pub data: PackedFragmentBuffer,
    /// Forward-strand ends of pairs.
    pub f_idx: Vec<FStrandFragmentIndex>,
    /// Reverse-strand ends and shadows.
    pub r_idx: Vec<RStrandOrShadowFragmentIndex>,
    /// Single-end fragments.
    pub se_idx: Vec<SeFragmentIndex>,
}

impl BinStore {
    pub fn new(bin: BinMetadata) -> Self {
        let mut data = PackedFragmentBuffer::new();
        data.reserve_for(&bin);
        BinStore {
            bin,
            data,
            f_idx: Vec::new(),
            r_idx: Vec::new(),
            se_idx: Vec::new(),
        }
    }

    /// Drop any indices from a previous load.
    pub fn clear_indices(&mut self) {
        self.f_idx.clear();
        self.r_idx.clear();
        self.se_idx.clear();
    }

    /// Route one end of a kept pair into the collection its strand demands.
    pub fn store_fragment_index(
        &mut self,
        header: &FragmentHeader,
        offset: u64,
        mate_offset: u64,
    ) {
        if header.is_reverse() || header.is_unmapped() {
            self.r_idx
                .push(RStrandOrShadowFragmentIndex::new(header, offset, mate_offset));
        } else {
            self.f_idx
                .push(FStrandFragmentIndex::new(header, offset, mate_offset));
        }
    }

    pub fn store_se_index(&mut self, header: &FragmentHeader, offset: u64) {
        self.se_idx.push(SeFragmentIndex::new(header, offset));
    }

    pub fn indexed_count(&self) -> usize {
        self.f_idx.len() + self.r_idx.len() + self.se_idx.len()
    }

    /// Order every collection by position; invoked once after loading.
    pub fn finalize(&mut self) {
        self.f_idx.sort_by_key(|entry| entry.fstrand_position);
        self.r_idx
            .sort_by_key(|entry| (entry.fstrand_position, entry.anchor));
        self.se_idx.sort_by_key(|entry| entry.fstrand_position);
        log::debug!(
            "Finalized {}: {} f-strand, {} r-strand/shadow, {} single-end entries",
            self.bin,
            self.f_idx.len(),
            self.r_idx.len(),
            self.se_idx.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::flags;
    use crate::reference::ReferencePosition;

    fn store() -> BinStore {
        BinStore::new(crate::bin_meta::bin(
            0,
            ReferencePosition::new(0, 0),
            ReferencePosition::new(0, 1000),
            4096,
            "test.dat",
        ))
    }

    fn header_at(pos: u64, extra_flags: u16) -> FragmentHeader {
        FragmentHeader {
            flags: flags::INITIALIZED | extra_flags,
            fstrand_position: ReferencePosition::new(0, pos),
            ..Default::default()
        }
    }

    #[test]
    fn test_strand_routing() {
        let mut store = store();
        store.store_fragment_index(&header_at(10, flags::PAIRED), 0, 100);
        store.store_fragment_index(&header_at(20, flags::PAIRED | flags::REVERSE), 100, 0);
        store.store_fragment_index(&header_at(30, flags::PAIRED | flags::UNMAPPED), 200, 300);
        assert_eq!(store.f_idx.len(), 1);
        assert_eq!(store.r_idx.len(), 2); // reverse and shadow both land here
    }

    #[test]
    fn test_finalize_sorts_by_position() {
        let mut store = store();
        store.store_se_index(&header_at(500, 0), 0);
        store.store_se_index(&header_at(100, 0), 64);
        store.store_se_index(&header_at(300, 0), 128);
        store.finalize();
        let positions: Vec<u64> = store
            .se_idx
            .iter()
            .map(|e| e.fstrand_position.position())
            .collect();
        assert_eq!(positions, vec![100, 300, 500]);
    }
}
