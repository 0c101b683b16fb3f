//! Packed fragment records.
//!
//! A fragment is one sequenced read with its alignment metadata, stored as a
//! self-describing variable-length record: a fixed-size little-endian header
//! followed by the packed edit script and the base/quality payload. Records
//! live inside a bin's contiguous byte buffer and are addressed by offset
//! only; `FragmentRef`/`FragmentMut` are short-lived views decoded on demand.
//!
//! Layout contract: `total_length == HEADER_SIZE + 4 * cigar_count +
//! 2 * read_length`. A record violating this, or missing the `INITIALIZED`
//! flag, is stream corruption.

use crate::alignment::cigar;
use crate::reference::ReferencePosition;

/// Header flag bits.
pub mod flags {
    /// Set on every record written by the aligner; clear means corruption.
    pub const INITIALIZED: u16 = 1 << 0;
    /// Record is one half of a pair; its mate follows in the stream.
    pub const PAIRED: u16 = 1 << 1;
    pub const REVERSE: u16 = 1 << 2;
    pub const UNMAPPED: u16 = 1 << 3;
    pub const MATE_UNMAPPED: u16 = 1 << 4;
    pub const MATE_REVERSE: u16 = 1 << 5;
    /// Low-confidence or ambiguous existing alignment.
    pub const DODGY: u16 = 1 << 6;
    /// Alignment acceptable but marked by upstream as worth re-examining.
    pub const REALIGNABLE: u16 = 1 << 7;
    pub const PROPER_PAIR: u16 = 1 << 8;
}

// Field offsets within the fixed header.
const TOTAL_LENGTH: usize = 0; // u32
const FLAGS: usize = 4; // u16
const BARCODE: usize = 6; // u16
const TILE: usize = 8; // u32
const CLUSTER_ID: usize = 12; // u64
const FSTRAND_POSITION: usize = 20; // u64
const MATE_FSTRAND_POSITION: usize = 28; // u64
const MATE_ANCHOR: usize = 36; // u64
const MATE_STORAGE_BIN: usize = 44; // u32
const DUPLICATE_CLUSTER_RANK: usize = 48; // u32
const TEMPLATE_LENGTH: usize = 52; // i64
const READ_LENGTH: usize = 60; // u16
const EDIT_DISTANCE: usize = 62; // u16
const CIGAR_COUNT: usize = 64; // u16
const MATE_EDIT_DISTANCE: usize = 66; // u16

/// Size of the fixed header at the start of every record.
pub const HEADER_SIZE: usize = 68;

#[inline]
fn get_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

#[inline]
fn get_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

#[inline]
fn get_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

/// Decoded fixed-size header. Equality compares the full field set, which is
/// what the loader's duplicate detection relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FragmentHeader {
    pub total_length: u32,
    pub flags: u16,
    pub barcode: u16,
    pub tile: u32,
    pub cluster_id: u64,
    pub fstrand_position: ReferencePosition,
    pub mate_fstrand_position: ReferencePosition,
    pub mate_anchor: u64,
    pub mate_storage_bin: u32,
    pub duplicate_cluster_rank: u32,
    pub template_length: i64,
    pub read_length: u16,
    pub edit_distance: u16,
    pub cigar_count: u16,
    pub mate_edit_distance: u16,
}

impl FragmentHeader {
    /// Decode a header from the first `HEADER_SIZE` bytes of a record.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() >= HEADER_SIZE);
        FragmentHeader {
            total_length: get_u32(bytes, TOTAL_LENGTH),
            flags: get_u16(bytes, FLAGS),
            barcode: get_u16(bytes, BARCODE),
            tile: get_u32(bytes, TILE),
            cluster_id: get_u64(bytes, CLUSTER_ID),
            fstrand_position: ReferencePosition::from_raw(get_u64(bytes, FSTRAND_POSITION)),
            mate_fstrand_position: ReferencePosition::from_raw(get_u64(
                bytes,
                MATE_FSTRAND_POSITION,
            )),
            mate_anchor: get_u64(bytes, MATE_ANCHOR),
            mate_storage_bin: get_u32(bytes, MATE_STORAGE_BIN),
            duplicate_cluster_rank: get_u32(bytes, DUPLICATE_CLUSTER_RANK),
            template_length: get_u64(bytes, TEMPLATE_LENGTH) as i64,
            read_length: get_u16(bytes, READ_LENGTH),
            edit_distance: get_u16(bytes, EDIT_DISTANCE),
            cigar_count: get_u16(bytes, CIGAR_COUNT),
            mate_edit_distance: get_u16(bytes, MATE_EDIT_DISTANCE),
        }
    }

    /// Encode into the first `HEADER_SIZE` bytes of `bytes`.
    pub fn write_to(&self, bytes: &mut [u8]) {
        debug_assert!(bytes.len() >= HEADER_SIZE);
        bytes[TOTAL_LENGTH..TOTAL_LENGTH + 4].copy_from_slice(&self.total_length.to_le_bytes());
        bytes[FLAGS..FLAGS + 2].copy_from_slice(&self.flags.to_le_bytes());
        bytes[BARCODE..BARCODE + 2].copy_from_slice(&self.barcode.to_le_bytes());
        bytes[TILE..TILE + 4].copy_from_slice(&self.tile.to_le_bytes());
        bytes[CLUSTER_ID..CLUSTER_ID + 8].copy_from_slice(&self.cluster_id.to_le_bytes());
        bytes[FSTRAND_POSITION..FSTRAND_POSITION + 8]
            .copy_from_slice(&self.fstrand_position.raw().to_le_bytes());
        bytes[MATE_FSTRAND_POSITION..MATE_FSTRAND_POSITION + 8]
            .copy_from_slice(&self.mate_fstrand_position.raw().to_le_bytes());
        bytes[MATE_ANCHOR..MATE_ANCHOR + 8].copy_from_slice(&self.mate_anchor.to_le_bytes());
        bytes[MATE_STORAGE_BIN..MATE_STORAGE_BIN + 4]
            .copy_from_slice(&self.mate_storage_bin.to_le_bytes());
        bytes[DUPLICATE_CLUSTER_RANK..DUPLICATE_CLUSTER_RANK + 4]
            .copy_from_slice(&self.duplicate_cluster_rank.to_le_bytes());
        bytes[TEMPLATE_LENGTH..TEMPLATE_LENGTH + 8]
            .copy_from_slice(&self.template_length.to_le_bytes());
        bytes[READ_LENGTH..READ_LENGTH + 2].copy_from_slice(&self.read_length.to_le_bytes());
        bytes[EDIT_DISTANCE..EDIT_DISTANCE + 2].copy_from_slice(&self.edit_distance.to_le_bytes());
        bytes[CIGAR_COUNT..CIGAR_COUNT + 2].copy_from_slice(&self.cigar_count.to_le_bytes());
        bytes[MATE_EDIT_DISTANCE..MATE_EDIT_DISTANCE + 2]
            .copy_from_slice(&self.mate_edit_distance.to_le_bytes());
    }

    #[inline]
    pub fn flag(&self, bit: u16) -> bool {
        self.flags & bit != 0
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.flag(flags::INITIALIZED)
    }

    #[inline]
    pub fn is_paired(&self) -> bool {
        self.flag(flags::PAIRED)
    }

    #[inline]
    pub fn is_reverse(&self) -> bool {
        self.flag(flags::REVERSE)
    }

    #[inline]
    pub fn is_unmapped(&self) -> bool {
        self.flag(flags::UNMAPPED)
    }

    #[inline]
    pub fn is_aligned(&self) -> bool {
        !self.is_unmapped()
    }

    #[inline]
    pub fn is_mate_unmapped(&self) -> bool {
        self.flag(flags::MATE_UNMAPPED)
    }

    #[inline]
    pub fn is_mate_reverse(&self) -> bool {
        self.flag(flags::MATE_REVERSE)
    }

    #[inline]
    pub fn is_dodgy(&self) -> bool {
        self.flag(flags::DODGY)
    }

    #[inline]
    pub fn is_realignable(&self) -> bool {
        self.flag(flags::REALIGNABLE)
    }

    /// Byte size of the trailing edit script plus payload.
    #[inline]
    pub fn body_size(&self) -> usize {
        4 * self.cigar_count as usize + 2 * self.read_length as usize
    }

    /// The size the `total_length` field must carry for this header.
    #[inline]
    pub fn expected_total_length(&self) -> usize {
        HEADER_SIZE + self.body_size()
    }
}

/// Read-only view of one record inside a packed buffer. `bytes` spans exactly
/// the record.
#[derive(Copy, Clone)]
pub struct FragmentRef<'a> {
    bytes: &'a [u8],
}

impl<'a> FragmentRef<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        debug_assert!(bytes.len() >= HEADER_SIZE);
        FragmentRef { bytes }
    }

    pub fn header(&self) -> FragmentHeader {
        FragmentHeader::from_bytes(self.bytes)
    }

    /// Packed edit-script words. Decoded per word; the buffer carries no
    /// alignment guarantee.
    pub fn cigar(&self) -> impl Iterator<Item = u32> + 'a {
        let count = get_u16(self.bytes, CIGAR_COUNT) as usize;
        let cigar_bytes = &self.bytes[HEADER_SIZE..HEADER_SIZE + 4 * count];
        cigar_bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
    }

    pub fn collect_cigar(&self) -> Vec<u32> {
        self.cigar().collect()
    }

    /// Base codes (0-3, 4=N), clipped bases included.
    pub fn bases(&self) -> &'a [u8] {
        let count = get_u16(self.bytes, CIGAR_COUNT) as usize;
        let read_length = get_u16(self.bytes, READ_LENGTH) as usize;
        let at = HEADER_SIZE + 4 * count;
        &self.bytes[at..at + read_length]
    }

    pub fn qualities(&self) -> &'a [u8] {
        let count = get_u16(self.bytes, CIGAR_COUNT) as usize;
        let read_length = get_u16(self.bytes, READ_LENGTH) as usize;
        let at = HEADER_SIZE + 4 * count + read_length;
        &self.bytes[at..at + read_length]
    }

    /// Position one past the last reference base covered by the alignment.
    pub fn rstrand_position(&self) -> ReferencePosition {
        let header = self.header();
        let ref_len = cigar::reference_length(&self.collect_cigar());
        header.fstrand_position.checked_add(ref_len as u64)
    }
}

/// Mutable view over one record. Setters patch single fields in place; the
/// record never changes size.
pub struct FragmentMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> FragmentMut<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        debug_assert!(bytes.len() >= HEADER_SIZE);
        FragmentMut { bytes }
    }

    pub fn header(&self) -> FragmentHeader {
        FragmentHeader::from_bytes(self.bytes)
    }

    pub fn set_fstrand_position(&mut self, pos: ReferencePosition) {
        self.bytes[FSTRAND_POSITION..FSTRAND_POSITION + 8]
            .copy_from_slice(&pos.raw().to_le_bytes());
    }

    pub fn set_edit_distance(&mut self, edit_distance: u16) {
        self.bytes[EDIT_DISTANCE..EDIT_DISTANCE + 2]
            .copy_from_slice(&edit_distance.to_le_bytes());
    }

    pub fn set_template_length(&mut self, template_length: i64) {
        self.bytes[TEMPLATE_LENGTH..TEMPLATE_LENGTH + 8]
            .copy_from_slice(&template_length.to_le_bytes());
    }

    pub fn set_mate_fstrand_position(&mut self, pos: ReferencePosition) {
        self.bytes[MATE_FSTRAND_POSITION..MATE_FSTRAND_POSITION + 8]
            .copy_from_slice(&pos.raw().to_le_bytes());
    }

    pub fn set_mate_anchor(&mut self, anchor: u64) {
        self.bytes[MATE_ANCHOR..MATE_ANCHOR + 8].copy_from_slice(&anchor.to_le_bytes());
    }

    pub fn set_mate_edit_distance(&mut self, edit_distance: u16) {
        self.bytes[MATE_EDIT_DISTANCE..MATE_EDIT_DISTANCE + 2]
            .copy_from_slice(&edit_distance.to_le_bytes());
    }

    pub fn set_flag(&mut self, bit: u16, value: bool) {
        let mut flags = get_u16(self.bytes, FLAGS);
        if value {
            flags |= bit;
        } else {
            flags &= !bit;
        }
        self.bytes[FLAGS..FLAGS + 2].copy_from_slice(&flags.to_le_bytes());
    }
}

/// Serialize a whole record (header + script + payload) the way the aligner
/// writes them. Test and fixture helper; the loader itself only reads.
pub fn write_record(
    out: &mut Vec<u8>,
    mut header: FragmentHeader,
    cigar: &[u32],
    bases: &[u8],
    qualities: &[u8],
) {
    assert_eq!(bases.len(), qualities.len());
    header.cigar_count = cigar.len() as u16;
    header.read_length = bases.len() as u16;
    header.total_length = header.expected_total_length() as u32;
    let at = out.len();
    out.resize(at + header.total_length as usize, 0);
    header.write_to(&mut out[at..]);
    let mut cursor = at + HEADER_SIZE;
    for &word in cigar {
        out[cursor..cursor + 4].copy_from_slice(&word.to_le_bytes());
        cursor += 4;
    }
    out[cursor..cursor + bases.len()].copy_from_slice(bases);
    cursor += bases.len();
    out[cursor..cursor + qualities.len()].copy_from_slice(qualities);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::cigar::{CigarOp, pack};

    fn sample_header() -> FragmentHeader {
        FragmentHeader {
            flags: flags::INITIALIZED | flags::PAIRED | flags::MATE_REVERSE,
            barcode: 2,
            tile: 1101,
            cluster_id: 424242,
            fstrand_position: ReferencePosition::new(0, 5000),
            mate_fstrand_position: ReferencePosition::new(0, 5300),
            mate_anchor: ReferencePosition::new(0, 5400).raw(),
            mate_storage_bin: 7,
            duplicate_cluster_rank: 1,
            template_length: 400,
            edit_distance: 3,
            mate_edit_distance: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let mut header = sample_header();
        header.cigar_count = 3;
        header.read_length = 100;
        header.total_length = header.expected_total_length() as u32;

        let mut bytes = vec![0u8; HEADER_SIZE];
        header.write_to(&mut bytes);
        assert_eq!(FragmentHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn test_total_length_contract() {
        let mut header = sample_header();
        header.cigar_count = 2;
        header.read_length = 150;
        assert_eq!(
            header.expected_total_length(),
            HEADER_SIZE + 4 * 2 + 2 * 150
        );
    }

    #[test]
    fn test_record_views() {
        let cigar = vec![pack(4, CigarOp::Align), pack(2, CigarOp::Insert)];
        let bases = vec![0u8, 1, 2, 3, 0, 1];
        let quals = vec![30u8; 6];
        let mut buf = Vec::new();
        write_record(&mut buf, sample_header(), &cigar, &bases, &quals);

        let record = FragmentRef::new(&buf);
        assert_eq!(record.collect_cigar(), cigar);
        assert_eq!(record.bases(), &bases[..]);
        assert_eq!(record.qualities(), &quals[..]);
        assert_eq!(record.header().total_length as usize, buf.len());
        assert_eq!(record.rstrand_position().position(), 5004);
    }

    #[test]
    fn test_mut_patching() {
        let mut buf = Vec::new();
        write_record(&mut buf, sample_header(), &[pack(4, CigarOp::Align)], &[0, 1, 2, 3], &[30; 4]);

        let mut record = FragmentMut::new(&mut buf);
        record.set_fstrand_position(ReferencePosition::new(0, 6000));
        record.set_edit_distance(1);
        record.set_mate_edit_distance(4);
        record.set_flag(flags::PROPER_PAIR, true);

        let header = FragmentRef::new(&buf).header();
        assert_eq!(header.fstrand_position.position(), 6000);
        assert_eq!(header.edit_distance, 1);
        assert_eq!(header.mate_edit_distance, 4);
        assert!(header.flag(flags::PROPER_PAIR));
        // untouched fields survive patching
        assert_eq!(header.cluster_id, 424242);
    }
}
