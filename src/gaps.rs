//! Candidate gaps and the per-sample gap catalog.
//!
//! A gap is a signed contig interval: deletions carry a positive reference
//! span, insertions a negative length (the number of inserted bases). The
//! catalog collects gaps observed on every fragment of a bin plus externally
//! known indel sites, deduplicates them with saturating priority
//! accumulation, and answers position-range queries during the realignment
//! pass, where it is strictly read-only.

use crate::alignment::cigar::{self, CigarOp};
use crate::reference::ReferencePosition;

/// One candidate insertion or deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    /// First reference position affected.
    pub pos: ReferencePosition,
    /// Positive: deleted reference span. Negative: inserted base count.
    pub length: i32,
    /// Evidence weight; accumulation saturates at `HIGHEST_PRIORITY`.
    pub priority: u8,
    /// Originating sample.
    pub sample_id: u16,
}

impl Gap {
    pub const HIGHEST_PRIORITY: u8 = u8::MAX;

    pub fn insertion(pos: ReferencePosition, bases: u32, sample_id: u16) -> Self {
        Gap {
            pos,
            length: -(bases as i32),
            priority: 1,
            sample_id,
        }
    }

    pub fn deletion(pos: ReferencePosition, bases: u32, sample_id: u16) -> Self {
        Gap {
            pos,
            length: bases as i32,
            priority: 1,
            sample_id,
        }
    }

    #[inline]
    pub fn is_insertion(&self) -> bool {
        self.length < 0
    }

    #[inline]
    pub fn is_deletion(&self) -> bool {
        self.length > 0
    }

    /// Reference bases consumed: zero for insertions.
    #[inline]
    pub fn ref_span(&self) -> u64 {
        self.length.max(0) as u64
    }

    /// Read bases consumed: zero for deletions.
    #[inline]
    pub fn read_span(&self) -> u32 {
        (-self.length).max(0) as u32
    }

    /// Total indel length regardless of direction.
    #[inline]
    pub fn edit_length(&self) -> u32 {
        self.length.unsigned_abs()
    }

    /// One past the last affected reference position.
    #[inline]
    pub fn end_pos(&self) -> ReferencePosition {
        self.pos.checked_add(self.ref_span())
    }

    /// Whether the gap touches [begin, end). Insertions are zero-width and
    /// count when their anchor point lies inside.
    #[inline]
    pub fn overlaps(&self, begin: ReferencePosition, end: ReferencePosition) -> bool {
        self.pos < end && (self.end_pos() > begin || (self.is_insertion() && self.pos >= begin))
    }
}

/// Half-open index range into a catalog's sorted gap list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapsRange {
    pub begin: usize,
    pub end: usize,
}

impl GapsRange {
    pub const EMPTY: GapsRange = GapsRange { begin: 0, end: 0 };

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

/// Position-ordered gap catalog for one sample.
///
/// Build with `add_*`, call `finalize` once, then query. No mutation once a
/// realignment pass has begun.
#[derive(Debug, Clone)]
pub struct RealignerGaps {
    sample_id: u16,
    gaps: Vec<Gap>,
    finalized: bool,
}

impl RealignerGaps {
    pub fn new(sample_id: u16) -> Self {
        RealignerGaps {
            sample_id,
            gaps: Vec::new(),
            finalized: false,
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        self.gaps.reserve(additional);
    }

    #[inline]
    pub fn sample_id(&self) -> u16 {
        self.sample_id
    }

    #[inline]
    pub fn gap_count(&self) -> usize {
        self.gaps.len()
    }

    pub fn gaps(&self, range: GapsRange) -> &[Gap] {
        &self.gaps[range.begin..range.end]
    }

    /// Record the indels of one fragment's edit script.
    pub fn add_fragment_gaps(&mut self, fstrand_position: ReferencePosition, packed_cigar: &[u32]) {
        debug_assert!(!self.finalized);
        let mut pos = fstrand_position;
        for &word in packed_cigar {
            let (len, op) = cigar::unpack(word);
            match op {
                CigarOp::Align => pos = pos.checked_add(len as u64),
                CigarOp::Insert => {
                    self.gaps.push(Gap::insertion(pos, len, self.sample_id));
                }
                CigarOp::Delete => {
                    self.gaps.push(Gap::deletion(pos, len, self.sample_id));
                    pos = pos.checked_add(len as u64);
                }
                CigarOp::SoftClip => {}
            }
        }
    }

    /// Seed an externally known indel site at the highest priority so it wins
    /// priority tie-breaks against observed gaps.
    pub fn add_known_indel(&mut self, pos: ReferencePosition, length: i32) {
        debug_assert!(!self.finalized);
        self.gaps.push(Gap {
            pos,
            length,
            priority: Gap::HIGHEST_PRIORITY,
            sample_id: self.sample_id,
        });
    }

    /// Sort by position and merge identical gaps, accumulating priority with
    /// saturation. Must run once before any query.
    pub fn finalize(&mut self) {
        self.gaps.sort_by_key(|gap| (gap.pos, gap.length));
        let mut write = 0usize;
        for read in 0..self.gaps.len() {
            if write > 0
                && self.gaps[write - 1].pos == self.gaps[read].pos
                && self.gaps[write - 1].length == self.gaps[read].length
            {
                let merged = self.gaps[write - 1]
                    .priority
                    .saturating_add(self.gaps[read].priority);
                self.gaps[write - 1].priority = merged;
            } else {
                self.gaps[write] = self.gaps[read];
                write += 1;
            }
        }
        self.gaps.truncate(write);
        self.finalized = true;
        log::debug!(
            "Gap catalog for sample {}: {} distinct gaps",
            self.sample_id,
            self.gaps.len()
        );
    }

    /// Gaps overlapping [begin, end).
    pub fn find_gaps(&self, begin: ReferencePosition, end: ReferencePosition) -> GapsRange {
        debug_assert!(self.finalized, "query before finalize");
        let mut first = self.gaps.partition_point(|gap| gap.pos < begin);
        // deletions starting earlier can still span into the window
        while first > 0 && self.gaps[first - 1].end_pos() > begin {
            first -= 1;
        }
        let last = self.gaps.partition_point(|gap| gap.pos < end);
        GapsRange {
            begin: first,
            end: last.max(first),
        }
    }

    /// Widen `range` until it covers every catalog gap touching the
    /// fragment's own indel span [own_begin, own_end). Needed when a
    /// fragment's existing gap lies just outside the first query window.
    pub fn find_more_gaps(
        &self,
        mut range: GapsRange,
        own_begin: ReferencePosition,
        own_end: ReferencePosition,
    ) -> GapsRange {
        debug_assert!(self.finalized, "query before finalize");
        while range.begin > 0 && self.gaps[range.begin - 1].overlaps(own_begin, own_end) {
            range.begin -= 1;
        }
        while range.end < self.gaps.len() && self.gaps[range.end].pos < own_end {
            range.end += 1;
        }
        range
    }
}
