//! Parallel realignment pass over one bin.
//!
//! Work is partitioned by pairing key (tile, cluster id) so both ends of a
//! pair always land on the same worker: mate propagation then needs no
//! cross-thread coordination at all. Each worker owns a private
//! `GapRealigner` with its scratch buffers; the gap catalog and the reference
//! are shared read-only, and workers mutate the packed arena through
//! per-record byte slices carved from a raw view, so no reference to the
//! whole buffer exists while the pass runs.

use rayon::prelude::*;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Instant;

use crate::alignment::config::{AlignmentConfig, RealignConfig};
use crate::alignment::template_length::TemplateLengthStatistics;
use crate::bin_store::BinStore;
use crate::fragment::{FragmentRef, HEADER_SIZE};
use crate::gaps::RealignerGaps;
use crate::packed_buffer::{PackedFragmentBuffer, RealignIndex};
use crate::realigner::{GapRealigner, Realignment};
use crate::reference::ContigList;

/// One record to examine, with its mate for pair propagation.
#[derive(Debug, Clone, Copy)]
struct WorkItem {
    offset: u64,
    mate_offset: Option<u64>,
}

/// Aggregate result of a bin pass. Rewritten edit scripts live here rather
/// than in the records, whose bodies cannot grow in place.
#[derive(Debug, Default)]
pub struct RealignOutcome {
    pub fragments_examined: usize,
    pub fragments_realigned: usize,
    /// (record offset, rewritten packed cigar) for every changed fragment.
    pub rewritten_cigars: Vec<(u64, Vec<u32>)>,
}

impl RealignOutcome {
    fn merge(mut self, other: RealignOutcome) -> Self {
        self.fragments_examined += other.fragments_examined;
        self.fragments_realigned += other.fragments_realigned;
        self.rewritten_cigars.extend(other.rewritten_cigars);
        self
    }
}

/// Shared raw view of the bin's arena for the duration of one pass.
///
/// Workers carve per-record slices straight from the base pointer, so a
/// `&mut` to the whole buffer never exists while the pass runs and two live
/// slices can only alias if two groups shared a record, which the pairing
/// partition rules out. The storage cannot move: no allocation or rollback
/// runs while workers are active, and the marker keeps the buffer borrowed
/// for the view's whole lifetime.
struct ArenaView<'a> {
    data: *mut u8,
    len: usize,
    _buffer: PhantomData<&'a mut PackedFragmentBuffer>,
}

unsafe impl Sync for ArenaView<'_> {}

impl<'a> ArenaView<'a> {
    fn new(buffer: &'a mut PackedFragmentBuffer) -> Self {
        let (data, len) = buffer.raw_parts_mut();
        ArenaView {
            data,
            len,
            _buffer: PhantomData,
        }
    }

    /// Safety: the record at `offset` must belong to the caller's pairing
    /// group, and no other live slice may cover it.
    #[allow(clippy::mut_from_ref)]
    unsafe fn record_mut(&self, offset: u64) -> &mut [u8] {
        let at = offset as usize;
        assert!(
            at + HEADER_SIZE <= self.len,
            "Record offset {} past arena end {}",
            at,
            self.len
        );
        let total =
            u32::from_le(unsafe { std::ptr::read_unaligned(self.data.add(at) as *const u32) })
                as usize;
        assert!(
            at + total <= self.len,
            "Record at {} (length {}) crosses arena end {}",
            at,
            total,
            self.len
        );
        unsafe { std::slice::from_raw_parts_mut(self.data.add(at), total) }
    }
}

/// Collect the gaps of every indexed fragment into `gaps`. Known-indel sites
/// are seeded separately by the caller; `finalize` has to run afterwards.
pub fn collect_bin_gaps(store: &BinStore, gaps: &mut RealignerGaps) {
    let mut add = |offset: u64| {
        let record = store.data.fragment(offset);
        let header = record.header();
        if header.is_aligned() {
            gaps.add_fragment_gaps(header.fstrand_position, &record.collect_cigar());
        }
    };
    for entry in &store.f_idx {
        add(entry.data_offset);
    }
    for entry in &store.r_idx {
        add(entry.data_offset);
    }
    for entry in &store.se_idx {
        add(entry.data_offset);
    }
}

/// Realign every indexed fragment of `store` against the finalized catalog.
#[allow(clippy::too_many_arguments)]
pub fn realign_bin(
    store: &mut BinStore,
    realigner_gaps: &RealignerGaps,
    reference: &ContigList,
    realign_config: RealignConfig,
    alignment_config: AlignmentConfig,
    template_length_statistics: &[TemplateLengthStatistics],
) -> RealignOutcome {
    let started = Instant::now();
    let groups = pairing_groups(store);
    log::info!(
        "Realigning {}: {} fragments in {} pairing groups",
        store.bin,
        store.indexed_count(),
        groups.len()
    );

    let bin_start = store.bin.bin_start;
    let bin_end = store.bin.bin_end;
    let arena = ArenaView::new(&mut store.data);

    let outcome = groups
        .par_iter()
        .map_init(
            || {
                (
                    GapRealigner::new(realign_config, alignment_config),
                    Vec::<u32>::new(),
                )
            },
            |(realigner, scratch_cigars), group| {
                scratch_cigars.clear();

                let mut outcome = RealignOutcome::default();
                for item in group {
                    outcome.fragments_examined += 1;
                    // Safety: this worker is the only one processing `group`,
                    // and groups never share records.
                    let record = unsafe { arena.record_mut(item.offset) };
                    let mut index =
                        RealignIndex::new(FragmentRef::new(record), item.offset, scratch_cigars);
                    let realignment = realigner.realign(
                        realigner_gaps,
                        bin_start,
                        bin_end,
                        record,
                        &mut index,
                        reference,
                        scratch_cigars,
                    );
                    if let Some(Realignment {
                        rstrand_position,
                        edit_distance,
                    }) = realignment
                    {
                        outcome.fragments_realigned += 1;
                        outcome
                            .rewritten_cigars
                            .push((item.offset, index.cigar(scratch_cigars).to_vec()));
                        if let Some(mate_offset) = item.mate_offset {
                            // Safety: the mate belongs to the same pairing
                            // group and is a distinct record.
                            let mate = unsafe { arena.record_mut(mate_offset) };
                            GapRealigner::update_pair_details(
                                template_length_statistics,
                                record,
                                mate,
                                rstrand_position,
                                edit_distance,
                            );
                        }
                    }
                }
                outcome
            },
        )
        .reduce(RealignOutcome::default, RealignOutcome::merge);

    log::info!(
        "Realigned {}: {} of {} fragments changed in {:.2?}",
        store.bin,
        outcome.fragments_realigned,
        outcome.fragments_examined,
        started.elapsed()
    );
    outcome
}

/// Partition the indexed records so both ends of every pair share a group.
fn pairing_groups(store: &BinStore) -> Vec<Vec<WorkItem>> {
    let mut groups: HashMap<(u32, u64), Vec<WorkItem>> = HashMap::new();
    let mut insert = |offset: u64, mate_offset: Option<u64>| {
        let header = store.data.fragment(offset).header();
        groups
            .entry((header.tile, header.cluster_id))
            .or_default()
            .push(WorkItem {
                offset,
                mate_offset,
            });
    };
    for entry in &store.f_idx {
        insert(entry.data_offset, Some(entry.mate_data_offset));
    }
    for entry in &store.r_idx {
        insert(entry.data_offset, Some(entry.mate_data_offset));
    }
    for entry in &store.se_idx {
        insert(entry.data_offset, None);
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::cigar::{pack, CigarOp};
    use crate::fragment::{flags, write_record, FragmentHeader};
    use crate::reference::{Contig, ReferencePosition};

    fn pos(p: u64) -> ReferencePosition {
        ReferencePosition::new(0, p)
    }

    fn patterned_reference(length: usize) -> ContigList {
        let seq: Vec<u8> = (0..length).map(|i| (i % 4) as u8).collect();
        ContigList::new(vec![Contig::new(0, "chr1", seq)])
    }

    /// Two single-end reads copied from the reference, each missing a 3-base
    /// block, both stored as plain full-length matches.
    fn store_with_two_deleted_reads(reference: &ContigList) -> BinStore {
        let contig = &reference.contig(0).sequence;
        let mut stream = Vec::new();
        let mut offsets = Vec::new();
        for (cluster_id, read_start) in [(1u64, 100usize), (2, 300)] {
            let mut bases = Vec::with_capacity(100);
            bases.extend_from_slice(&contig[read_start..read_start + 30]);
            bases.extend_from_slice(&contig[read_start + 33..read_start + 103]);
            let header = FragmentHeader {
                flags: flags::INITIALIZED | flags::REALIGNABLE,
                tile: 1,
                cluster_id,
                fstrand_position: pos(read_start as u64),
                edit_distance: 70,
                ..Default::default()
            };
            offsets.push(stream.len() as u64);
            write_record(
                &mut stream,
                header,
                &[pack(100, CigarOp::Align)],
                &bases,
                &vec![30u8; 100],
            );
        }

        let mut store = BinStore::new(crate::bin_meta::bin(
            0,
            pos(0),
            pos(10_000),
            stream.len() as u64,
            "test.dat",
        ));
        let (base, dst) = store.data.allocate(stream.len());
        assert_eq!(base, 0);
        dst.copy_from_slice(&stream);
        for offset in offsets {
            let header = store.data.fragment(offset).header();
            store.store_se_index(&header, offset);
        }
        store.finalize();
        store
    }

    #[test]
    fn test_pairing_groups_keep_mates_together() {
        let reference = patterned_reference(1000);
        let store = store_with_two_deleted_reads(&reference);
        let groups = pairing_groups(&store);
        // distinct cluster ids: one entry per group
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.len() == 1));
    }

    #[test]
    fn test_realign_bin_rewrites_both_fragments() {
        let reference = patterned_reference(1000);
        let mut store = store_with_two_deleted_reads(&reference);

        let mut gaps = RealignerGaps::new(0);
        collect_bin_gaps(&store, &mut gaps);
        gaps.add_known_indel(pos(130), 3);
        gaps.add_known_indel(pos(330), 3);
        gaps.finalize();

        let outcome = realign_bin(
            &mut store,
            &gaps,
            &reference,
            RealignConfig::default(),
            AlignmentConfig::default(),
            &[TemplateLengthStatistics::default()],
        );

        assert_eq!(outcome.fragments_examined, 2);
        assert_eq!(outcome.fragments_realigned, 2);
        assert_eq!(outcome.rewritten_cigars.len(), 2);
        for (offset, cigar) in &outcome.rewritten_cigars {
            assert_eq!(crate::alignment::cigar::to_string(cigar), "30M3D70M");
            assert_eq!(store.data.fragment(*offset).header().edit_distance, 3);
        }
    }

    #[test]
    fn test_collect_bin_gaps_skips_unmapped() {
        let reference = patterned_reference(1000);
        let contig = &reference.contig(0).sequence;
        let mut stream = Vec::new();
        let header = FragmentHeader {
            flags: flags::INITIALIZED | flags::UNMAPPED,
            fstrand_position: pos(100),
            ..Default::default()
        };
        write_record(
            &mut stream,
            header,
            &[pack(20, CigarOp::Align), pack(2, CigarOp::Delete), pack(20, CigarOp::Align)],
            &contig[100..140],
            &vec![30u8; 40],
        );

        let mut store = BinStore::new(crate::bin_meta::bin(
            0,
            pos(0),
            pos(10_000),
            stream.len() as u64,
            "test.dat",
        ));
        let (offset, dst) = store.data.allocate(stream.len());
        dst.copy_from_slice(&stream);
        let h = store.data.fragment(offset).header();
        store.store_se_index(&h, offset);

        let mut gaps = RealignerGaps::new(0);
        collect_bin_gaps(&store, &mut gaps);
        gaps.finalize();
        assert_eq!(gaps.gap_count(), 0);
    }
}
