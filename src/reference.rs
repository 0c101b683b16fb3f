//! Reference coordinates and contig access.
//!
//! `ReferencePosition` packs a contig id and a contig-local offset into a
//! single u64 so positions order naturally across contigs and survive being
//! stored in fixed-width record fields. `ContigList` is the read-only
//! reference accessor handed in by the reference-loading stage.

/// Bits of a packed position reserved for the contig-local offset.
const POSITION_BITS: u32 = 40;
const POSITION_MASK: u64 = (1u64 << POSITION_BITS) - 1;

/// A genomic position: contig id in the high bits, 0-based offset in the low
/// 40 bits. Ordering is (contig, offset) lexicographic for free.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReferencePosition(u64);

impl ReferencePosition {
    /// Sentinel for "no position" (unmapped records, absent mates).
    pub const NONE: ReferencePosition = ReferencePosition(u64::MAX);

    #[inline]
    pub fn new(contig_id: u32, position: u64) -> Self {
        debug_assert!(position <= POSITION_MASK, "position overflows packing");
        ReferencePosition(((contig_id as u64) << POSITION_BITS) | position)
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        ReferencePosition(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn contig_id(self) -> u32 {
        (self.0 >> POSITION_BITS) as u32
    }

    #[inline]
    pub fn position(self) -> u64 {
        self.0 & POSITION_MASK
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Offset within the same contig. Callers never advance across a contig
    /// boundary; the debug assertion catches it if they do.
    #[inline]
    pub fn checked_add(self, bases: u64) -> Self {
        let ret = ReferencePosition(self.0 + bases);
        debug_assert_eq!(ret.contig_id(), self.contig_id());
        ret
    }

    #[inline]
    pub fn checked_sub(self, bases: u64) -> Self {
        debug_assert!(self.position() >= bases);
        ReferencePosition(self.0 - bases)
    }

    /// Signed distance in bases from `other`, assuming the same contig.
    #[inline]
    pub fn distance_from(self, other: ReferencePosition) -> i64 {
        debug_assert_eq!(self.contig_id(), other.contig_id());
        self.position() as i64 - other.position() as i64
    }
}

impl std::fmt::Debug for ReferencePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "pos(none)")
        } else {
            write!(f, "pos({}:{})", self.contig_id(), self.position())
        }
    }
}

impl std::fmt::Display for ReferencePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// One reference contig with 2-bit-coded bases (0=A,1=C,2=G,3=T,4=N).
#[derive(Clone)]
pub struct Contig {
    pub id: u32,
    pub name: String,
    pub sequence: Vec<u8>,
}

impl Contig {
    pub fn new(id: u32, name: impl Into<String>, sequence: Vec<u8>) -> Self {
        Contig {
            id,
            name: name.into(),
            sequence,
        }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.sequence.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Reference accessor indexed by contig id. Supplied by the reference-loading
/// stage; read-only here.
#[derive(Clone, Default)]
pub struct ContigList {
    contigs: Vec<Contig>,
}

impl ContigList {
    pub fn new(contigs: Vec<Contig>) -> Self {
        ContigList { contigs }
    }

    #[inline]
    pub fn contig(&self, contig_id: u32) -> &Contig {
        &self.contigs[contig_id as usize]
    }

    /// Base code at `pos`, or `None` past the contig end.
    #[inline]
    pub fn base_at(&self, pos: ReferencePosition) -> Option<u8> {
        self.contig(pos.contig_id())
            .sequence
            .get(pos.position() as usize)
            .copied()
    }

    /// Position one past the last base of the contig containing `pos`.
    #[inline]
    pub fn contig_end(&self, pos: ReferencePosition) -> ReferencePosition {
        ReferencePosition::new(pos.contig_id(), self.contig(pos.contig_id()).len())
    }
}
