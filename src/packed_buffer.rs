//! The packed fragment arena.
//!
//! One contiguous byte buffer holds every record kept for a bin; byte offsets
//! are the only addressing mechanism, so no live reference survives a
//! mutation. Capacity is reserved once from the bin's declared data size and
//! never grows afterwards; exceeding it means the bin index lied about its
//! contents, which is fatal.

use crate::bin_meta::BinMetadata;
use crate::fragment::{FragmentRef, HEADER_SIZE};
use crate::reference::ReferencePosition;

#[derive(Default)]
pub struct PackedFragmentBuffer {
    data: Vec<u8>,
}

impl PackedFragmentBuffer {
    pub fn new() -> Self {
        PackedFragmentBuffer::default()
    }

    /// Reserve space for a bin's worth of records and clear previous content.
    pub fn reserve_for(&mut self, bin: &BinMetadata) {
        self.data.clear();
        self.data.reserve(bin.data_size as usize);
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append `length` zeroed bytes and return the offset of the new region
    /// plus a slice to fill it. Capacity was fixed by `reserve_for`; running
    /// out means the bin's declared size was wrong.
    pub fn allocate(&mut self, length: usize) -> (u64, &mut [u8]) {
        let offset = self.data.len();
        assert!(
            offset + length <= self.data.capacity(),
            "Insufficient buffer capacity: offset {} + record {} > capacity {}",
            offset,
            length,
            self.data.capacity()
        );
        self.data.resize(offset + length, 0);
        (offset as u64, &mut self.data[offset..])
    }

    /// Truncate back to `offset`, reclaiming the space of records appended
    /// after it.
    pub fn rollback(&mut self, offset: u64) {
        debug_assert!(offset <= self.data.len() as u64);
        self.data.truncate(offset as usize);
    }

    /// Byte span of the record starting at `offset`.
    pub fn record_bytes(&self, offset: u64) -> &[u8] {
        let at = offset as usize;
        assert!(
            at + HEADER_SIZE <= self.data.len(),
            "Record offset {} past buffer end {}",
            at,
            self.data.len()
        );
        let total = u32::from_le_bytes(self.data[at..at + 4].try_into().unwrap()) as usize;
        assert!(
            at + total <= self.data.len(),
            "Record at {} (length {}) crosses buffer end {}",
            at,
            total,
            self.data.len()
        );
        &self.data[at..at + total]
    }

    pub fn fragment(&self, offset: u64) -> FragmentRef<'_> {
        FragmentRef::new(self.record_bytes(offset))
    }

    /// Mutable byte span of the record starting at `offset`.
    pub fn record_bytes_mut(&mut self, offset: u64) -> &mut [u8] {
        let at = offset as usize;
        let total = u32::from_le_bytes(self.data[at..at + 4].try_into().unwrap()) as usize;
        &mut self.data[at..at + total]
    }

    /// Mutable byte spans of two distinct records, for pair propagation.
    pub fn record_pair_mut(&mut self, first: u64, second: u64) -> (&mut [u8], &mut [u8]) {
        assert_ne!(first, second, "A record cannot pair with itself");
        let swapped = first > second;
        let (low, high) = if swapped {
            (second as usize, first as usize)
        } else {
            (first as usize, second as usize)
        };
        let low_total = u32::from_le_bytes(self.data[low..low + 4].try_into().unwrap()) as usize;
        let high_total = u32::from_le_bytes(self.data[high..high + 4].try_into().unwrap()) as usize;
        debug_assert!(low + low_total <= high, "overlapping records");
        let (head, tail) = self.data.split_at_mut(high);
        let low_bytes = &mut head[low..low + low_total];
        let high_bytes = &mut tail[..high_total];
        if swapped {
            (high_bytes, low_bytes)
        } else {
            (low_bytes, high_bytes)
        }
    }

    /// Base pointer and byte length of the arena, for passes that carve
    /// per-record slices through raw offsets.
    pub(crate) fn raw_parts_mut(&mut self) -> (*mut u8, usize) {
        (self.data.as_mut_ptr(), self.data.len())
    }
}

/// Working entry the realigner operates on: a record offset, the current
/// alignment position, and the current edit script held in a bin-level
/// scratch cigar buffer. Rewrites replace the scratch range rather than the
/// record body, which cannot grow in place.
#[derive(Debug, Clone)]
pub struct RealignIndex {
    pub data_offset: u64,
    pub pos: ReferencePosition,
    pub reverse: bool,
    cigar_offset: usize,
    cigar_length: usize,
}

impl RealignIndex {
    /// Seed a working entry from `record` at `offset`, copying its current
    /// edit script into `scratch`.
    pub fn new(record: FragmentRef<'_>, offset: u64, scratch: &mut Vec<u32>) -> Self {
        let header = record.header();
        let cigar_offset = scratch.len();
        scratch.extend(record.cigar());
        RealignIndex {
            data_offset: offset,
            pos: header.fstrand_position,
            reverse: header.is_reverse(),
            cigar_offset,
            cigar_length: scratch.len() - cigar_offset,
        }
    }

    #[inline]
    pub fn cigar<'a>(&self, scratch: &'a [u32]) -> &'a [u32] {
        &scratch[self.cigar_offset..self.cigar_offset + self.cigar_length]
    }

    /// Point the entry at a new scratch range.
    pub(crate) fn set_cigar(&mut self, offset: usize, length: usize) {
        self.cigar_offset = offset;
        self.cigar_length = length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::cigar::{CigarOp, pack};
    use crate::fragment::{FragmentHeader, FragmentMut, flags, write_record};
    use crate::reference::ReferencePosition;

    fn test_bin(data_size: u64) -> BinMetadata {
        crate::bin_meta::bin(
            0,
            ReferencePosition::new(0, 0),
            ReferencePosition::new(0, 10_000),
            data_size,
            "test.dat",
        )
    }

    fn record_bytes(pos: u64, read_len: usize) -> Vec<u8> {
        let header = FragmentHeader {
            flags: flags::INITIALIZED,
            fstrand_position: ReferencePosition::new(0, pos),
            ..Default::default()
        };
        let mut out = Vec::new();
        write_record(
            &mut out,
            header,
            &[pack(read_len as u32, CigarOp::Align)],
            &vec![0u8; read_len],
            &vec![30u8; read_len],
        );
        out
    }

    #[test]
    fn test_allocate_and_access() {
        let record = record_bytes(100, 4);
        let mut buffer = PackedFragmentBuffer::new();
        buffer.reserve_for(&test_bin(record.len() as u64 * 2));

        let (offset, dst) = buffer.allocate(record.len());
        dst.copy_from_slice(&record);
        assert_eq!(offset, 0);
        assert_eq!(buffer.size(), record.len() as u64);
        assert_eq!(
            buffer.fragment(offset).header().fstrand_position.position(),
            100
        );
    }

    #[test]
    fn test_rollback_restores_size() {
        let record = record_bytes(100, 4);
        let mut buffer = PackedFragmentBuffer::new();
        buffer.reserve_for(&test_bin(record.len() as u64 * 2));

        let (first, dst) = buffer.allocate(record.len());
        dst.copy_from_slice(&record);
        let before = buffer.size();
        let (second, dst) = buffer.allocate(record.len());
        dst.copy_from_slice(&record);
        assert!(second > first);

        buffer.rollback(before);
        assert_eq!(buffer.size(), before);
    }

    #[test]
    #[should_panic(expected = "Insufficient buffer capacity")]
    fn test_capacity_overrun_is_fatal() {
        let mut buffer = PackedFragmentBuffer::new();
        buffer.reserve_for(&test_bin(8));
        buffer.allocate(64);
    }

    #[test]
    fn test_record_pair_mut_disjoint_views() {
        let first = record_bytes(100, 4);
        let second = record_bytes(300, 4);
        let mut buffer = PackedFragmentBuffer::new();
        buffer.reserve_for(&test_bin((first.len() + second.len()) as u64));
        let (first_at, dst) = buffer.allocate(first.len());
        dst.copy_from_slice(&first);
        let (second_at, dst) = buffer.allocate(second.len());
        dst.copy_from_slice(&second);

        // order of the arguments is preserved in the views
        let (a, b) = buffer.record_pair_mut(second_at, first_at);
        assert_eq!(FragmentRef::new(a).header().fstrand_position.position(), 300);
        assert_eq!(FragmentRef::new(b).header().fstrand_position.position(), 100);

        // both spans are writable at once
        FragmentMut::new(a).set_edit_distance(5);
        FragmentMut::new(b).set_edit_distance(6);
        assert_eq!(buffer.fragment(second_at).header().edit_distance, 5);
        assert_eq!(buffer.fragment(first_at).header().edit_distance, 6);
    }

    #[test]
    fn test_realign_index_seeds_scratch() {
        let record = record_bytes(250, 6);
        let mut buffer = PackedFragmentBuffer::new();
        buffer.reserve_for(&test_bin(record.len() as u64));
        let (offset, dst) = buffer.allocate(record.len());
        dst.copy_from_slice(&record);

        let mut scratch = Vec::new();
        let index = RealignIndex::new(buffer.fragment(offset), offset, &mut scratch);
        assert_eq!(index.pos.position(), 250);
        assert_eq!(index.cigar(&scratch), &[pack(6, CigarOp::Align)]);
    }
}
