//! Edit-script (CIGAR) operations over the packed u32 encoding used inside
//! fragment records.
//!
//! Every record stores its edit script as `length << 4 | op` words so the
//! loader and the realigner can walk scripts without decoding into a separate
//! structure. This module is the single authoritative implementation of
//! packing, walking and compaction.

/// Edit-script operation kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CigarOp {
    /// Match or mismatch run against the reference.
    Align = 0,
    /// Insertion: read bases with no reference span.
    Insert = 1,
    /// Deletion: reference span with no read bases.
    Delete = 2,
    /// Soft clip: read bases excluded from the alignment.
    SoftClip = 3,
}

impl CigarOp {
    #[inline(always)]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Align),
            1 => Some(Self::Insert),
            2 => Some(Self::Delete),
            3 => Some(Self::SoftClip),
            _ => None,
        }
    }

    /// Returns true if this operation consumes read bases
    #[inline(always)]
    pub const fn consumes_read(self) -> bool {
        matches!(self, Self::Align | Self::Insert | Self::SoftClip)
    }

    /// Returns true if this operation consumes reference bases
    #[inline(always)]
    pub const fn consumes_ref(self) -> bool {
        matches!(self, Self::Align | Self::Delete)
    }

    #[inline(always)]
    pub const fn symbol(self) -> char {
        match self {
            Self::Align => 'M',
            Self::Insert => 'I',
            Self::Delete => 'D',
            Self::SoftClip => 'S',
        }
    }
}

/// Maximum operation length representable in one packed word.
pub const MAX_OP_LENGTH: u32 = (1 << 28) - 1;

/// Pack one (length, op) component into its u32 word.
#[inline(always)]
pub const fn pack(length: u32, op: CigarOp) -> u32 {
    debug_assert!(length <= MAX_OP_LENGTH);
    (length << 4) | op as u32
}

/// Unpack a u32 word into (length, op). Panics on a corrupt op code; packed
/// words only ever come from `pack` or a record that passed header checks.
#[inline(always)]
pub fn unpack(word: u32) -> (u32, CigarOp) {
    let op = CigarOp::from_code((word & 0xf) as u8).expect("corrupt cigar op code");
    (word >> 4, op)
}

/// Number of read bases consumed by a packed script.
#[inline]
pub fn read_length(cigar: &[u32]) -> u32 {
    cigar
        .iter()
        .map(|&w| {
            let (len, op) = unpack(w);
            if op.consumes_read() { len } else { 0 }
        })
        .sum()
}

/// Number of reference bases consumed by a packed script.
#[inline]
pub fn reference_length(cigar: &[u32]) -> u32 {
    cigar
        .iter()
        .map(|&w| {
            let (len, op) = unpack(w);
            if op.consumes_ref() { len } else { 0 }
        })
        .sum()
}

/// Sum of insertion and deletion lengths (the indel part of edit distance).
#[inline]
pub fn indel_length(cigar: &[u32]) -> u32 {
    cigar
        .iter()
        .map(|&w| {
            let (len, op) = unpack(w);
            match op {
                CigarOp::Insert | CigarOp::Delete => len,
                _ => 0,
            }
        })
        .sum()
}

/// Leading soft-clip length, if the script starts with one.
#[inline]
pub fn head_clip(cigar: &[u32]) -> u32 {
    match cigar.first().map(|&w| unpack(w)) {
        Some((len, CigarOp::SoftClip)) => len,
        _ => 0,
    }
}

/// Trailing soft-clip length, if the script ends with one.
#[inline]
pub fn tail_clip(cigar: &[u32]) -> u32 {
    match cigar.last().map(|&w| unpack(w)) {
        Some((len, CigarOp::SoftClip)) if cigar.len() > 1 => len,
        _ => 0,
    }
}

/// Compact a packed script in place: merge adjacent same-kind operations and
/// drop zero-length ones.
pub fn compact_in_place(cigar: &mut Vec<u32>) {
    let mut write = 0usize;
    for read in 0..cigar.len() {
        let (len, op) = unpack(cigar[read]);
        if len == 0 {
            continue;
        }
        if write > 0 {
            let (prev_len, prev_op) = unpack(cigar[write - 1]);
            if prev_op == op {
                cigar[write - 1] = pack(prev_len + len, op);
                continue;
            }
        }
        cigar[write] = cigar[read];
        write += 1;
    }
    cigar.truncate(write);
}

/// Render a packed script as text ("50M2I48M"), for logs and diagnostics.
pub fn to_string(cigar: &[u32]) -> String {
    use std::fmt::Write;
    if cigar.is_empty() {
        return "*".to_string();
    }
    let mut out = String::with_capacity(cigar.len() * 4);
    for &w in cigar {
        let (len, op) = unpack(w);
        write!(&mut out, "{}{}", len, op.symbol()).unwrap();
    }
    out
}
