//! Gap realignment search.
//!
//! Attempts to reduce a fragment's mismatches by introducing gaps observed on
//! other fragments, while preserving the option of keeping the ones already
//! there. For one fragment the search pulls the overlapping slice of the gap
//! catalog, strips the fragment's own gaps to obtain a gapless anchor so the
//! "no gap" hypothesis competes on equal footing, then walks bounded subsets
//! of the candidate gaps, scoring each resulting alignment against the
//! reference. The fragment is rewritten only when a candidate clears the
//! mismatch-reduction dead-band and wins the full precedence chain; anything
//! else leaves it untouched.
//!
//! Each worker thread owns one `GapRealigner`; its scratch buffers are reused
//! across fragments and never shared.

use crate::alignment::cigar::{self, CigarOp};
use crate::alignment::config::{AlignmentConfig, RealignConfig};
use crate::alignment::template_length::TemplateLengthStatistics;
use crate::fragment::{flags, FragmentMut, FragmentRef};
use crate::gaps::{Gap, GapsRange, RealignerGaps};
use crate::packed_buffer::RealignIndex;
use crate::reference::{ContigList, ReferencePosition};

/// Number of bits available to represent the on/off state of each candidate
/// gap in one attempt. The choice bitmask is a u64.
pub const MAX_GAPS_AT_A_TIME: u32 = 64;

/// Minimum relative reduction of the mismatch percentage a candidate must
/// deliver before it may replace the existing alignment.
const MISMATCH_PERCENT_REDUCTION_MIN: u32 = 20;

/// Exact binomial coefficient; saturates instead of overflowing for the few
/// (n, k) pairs past u64 range.
pub fn binomial(n: u64, k: u64) -> u64 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut result: u64 = 1;
    for i in 0..k {
        result = match result.checked_mul(n - i) {
            Some(v) => v / (i + 1),
            None => return u64::MAX,
        };
    }
    result
}

/// Outcome of a successful realignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Realignment {
    /// Position one past the last reference base of the new alignment.
    pub rstrand_position: ReferencePosition,
    pub edit_distance: u16,
}

/// Realignment bounds of a fragment, derived from its current edit script.
#[derive(Debug, Clone, Copy)]
struct RealignmentBounds {
    /// Position of the first non soft-clipped base.
    begin_pos: ReferencePosition,
    /// Start of the first indel; equals `end_pos` if there are none.
    first_gap_start: ReferencePosition,
    /// End of the last indel; equals `begin_pos` if there are none.
    last_gap_end: ReferencePosition,
    /// Position following the last non soft-clipped base.
    end_pos: ReferencePosition,
}

impl RealignmentBounds {
    fn has_gaps(&self) -> bool {
        self.first_gap_start <= self.last_gap_end
    }
}

/// One evaluated gap subset and its derived metrics.
#[derive(Debug, Clone, Copy)]
struct GapChoice {
    choice: u64,
    edit_distance: u32,
    mismatches: u32,
    mismatches_percent: u32,
    cost: u32,
    total_priority: u32,
    mapped_length: u32,
    start_pos: ReferencePosition,
}

impl GapChoice {
    fn add_priority(&mut self, gap: &Gap) {
        let cap = Gap::HIGHEST_PRIORITY as u32;
        if cap - self.total_priority >= gap.priority as u32 {
            self.total_priority += gap.priority as u32;
        } else {
            self.total_priority = cap;
        }
    }
}

pub struct GapRealigner {
    realign_vigorously: bool,
    realign_dodgy: bool,
    gaps_per_fragment_max: u32,
    /// Cap on the number of evaluated bitmasks, fixed at construction.
    combinations_limit: u64,
    mismatch_cost: u32,
    gap_open_cost: u32,
    gap_extend_cost: u32,
    /// Choices whose combined gap length exceeds this are rejected; longer
    /// events belong to split alignments upstream.
    max_combined_gap_length: u32,

    // per-thread scratch, reused across fragments
    current_attempt_gaps: Vec<Gap>,
    current_cigar: Vec<u32>,
    scratch_cigar: Vec<u32>,
}

impl GapRealigner {
    pub fn new(config: RealignConfig, alignment: AlignmentConfig) -> Self {
        assert!(config.gaps_per_fragment_max <= MAX_GAPS_AT_A_TIME);
        GapRealigner {
            realign_vigorously: config.realign_vigorously,
            realign_dodgy: config.realign_dodgy,
            gaps_per_fragment_max: config.gaps_per_fragment_max,
            combinations_limit: binomial(
                MAX_GAPS_AT_A_TIME as u64,
                config.gaps_per_fragment_max as u64,
            ),
            mismatch_cost: config.mismatch_cost,
            gap_open_cost: config.gap_open_cost,
            gap_extend_cost: config.gap_extend_cost,
            max_combined_gap_length: alignment.split_gap_length,
            current_attempt_gaps: Vec::with_capacity(MAX_GAPS_AT_A_TIME as usize),
            current_cigar: Vec::with_capacity(16),
            scratch_cigar: Vec::with_capacity(16),
        }
    }

    #[inline]
    pub fn combinations_limit(&self) -> u64 {
        self.combinations_limit
    }

    /// Realign one fragment against the catalog. Returns `None` when the
    /// fragment is left unchanged: not eligible, nothing to try, or no
    /// candidate cleared the improvement threshold. On success the record's
    /// position and edit distance are updated in place, the rewritten edit
    /// script is appended to `realigned_cigars`, and `index` points at it.
    #[allow(clippy::too_many_arguments)]
    pub fn realign(
        &mut self,
        realigner_gaps: &RealignerGaps,
        bin_start: ReferencePosition,
        bin_end: ReferencePosition,
        record_bytes: &mut [u8],
        index: &mut RealignIndex,
        reference: &ContigList,
        realigned_cigars: &mut Vec<u32>,
    ) -> Option<Realignment> {
        let header = FragmentRef::new(record_bytes).header();
        if header.is_unmapped() {
            return None;
        }
        // eligibility gate: the expensive search runs only for fragments
        // that are worth it
        if header.is_dodgy() {
            if !self.realign_dodgy {
                return None;
            }
        } else if !self.realign_vigorously && !header.is_realignable() {
            return None;
        }

        self.current_cigar.clear();
        self.current_cigar.extend_from_slice(index.cigar(realigned_cigars));

        let bounds = self.extract_realignment_bounds(index);
        let mut range = realigner_gaps.find_gaps(bounds.begin_pos, bounds.end_pos);
        if bounds.has_gaps() {
            range = realigner_gaps.find_more_gaps(range, bounds.first_gap_start, bounds.last_gap_end);
        }
        if range.is_empty() {
            return None;
        }
        // at most 64 candidates are representable per attempt
        if range.len() > MAX_GAPS_AT_A_TIME as usize {
            range = GapsRange {
                begin: range.begin,
                end: range.begin + MAX_GAPS_AT_A_TIME as usize,
            };
        }
        self.current_attempt_gaps.clear();
        self.current_attempt_gaps
            .extend_from_slice(realigner_gaps.gaps(range));

        let record = FragmentRef::new(record_bytes);
        let undone_pos = self.undo_existing_gaps(index);
        let original = self.alignment_cost(&record, index)?;
        let max_mismatches_percent = original.mismatches_percent
            - original.mismatches_percent * MISMATCH_PERCENT_REDUCTION_MIN / 100;

        let mut best = original;
        let mut best_changed = false;
        self.find_better_gaps_choice(
            &record,
            reference,
            bin_start,
            bin_end,
            undone_pos,
            max_mismatches_percent,
            &mut best,
            &mut best_changed,
        );

        if !best_changed {
            log::trace!(
                "No better choice for fragment at offset {} ({})",
                index.data_offset,
                cigar::to_string(&self.current_cigar)
            );
            return None;
        }

        let realignment = self.apply_choice(&best, record_bytes, index, realigned_cigars);
        log::trace!(
            "Realigned fragment at offset {} to {} ({})",
            index.data_offset,
            best.start_pos,
            cigar::to_string(index.cigar(realigned_cigars))
        );
        Some(realignment)
    }

    /// Enumerate gap subsets and keep the best eligible one in `best`.
    /// The number of bitmasks evaluated never exceeds the combinations
    /// limit; the search may therefore terminate without exhausting every
    /// theoretically valid subset.
    #[allow(clippy::too_many_arguments)]
    fn find_better_gaps_choice(
        &mut self,
        record: &FragmentRef<'_>,
        reference: &ContigList,
        bin_start: ReferencePosition,
        bin_end: ReferencePosition,
        undone_pos: i64,
        max_mismatches_percent: u32,
        best: &mut GapChoice,
        best_changed: &mut bool,
    ) {
        let gap_count = self.current_attempt_gaps.len() as u32;
        let all_gaps_mask = if gap_count == 64 {
            u64::MAX
        } else {
            (1u64 << gap_count) - 1
        };

        let mut left_to_evaluate = self.combinations_limit;
        let max_set = self.gaps_per_fragment_max.min(gap_count);
        'sizes: for set_bits in 1..=max_set {
            // Gosper's hack: visit every subset of `set_bits` gaps in
            // ascending bitmask order
            let mut choice: u64 = if set_bits == 64 {
                u64::MAX
            } else {
                (1u64 << set_bits) - 1
            };
            while choice & !all_gaps_mask == 0 {
                if left_to_evaluate == 0 {
                    break 'sizes;
                }
                left_to_evaluate -= 1;

                self.evaluate_choice(
                    choice,
                    record,
                    reference,
                    bin_start,
                    bin_end,
                    undone_pos,
                    max_mismatches_percent,
                    best,
                    best_changed,
                );

                let lowest = choice & choice.wrapping_neg();
                let ripple = match choice.checked_add(lowest) {
                    Some(r) => r,
                    None => break 'sizes,
                };
                choice = (((ripple ^ choice) >> 2) / lowest) | ripple;
            }
        }
    }

    /// Score one bitmask, trying each chosen gap as the pivot that resolves
    /// the start position.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_choice(
        &self,
        choice: u64,
        record: &FragmentRef<'_>,
        reference: &ContigList,
        bin_start: ReferencePosition,
        bin_end: ReferencePosition,
        undone_pos: i64,
        max_mismatches_percent: u32,
        best: &mut GapChoice,
        best_changed: &mut bool,
    ) {
        let mut last_start: Option<i64> = None;
        let mut bits = choice;
        while bits != 0 {
            let pivot = bits.trailing_zeros();
            bits &= bits - 1;

            let start = match self.find_start_pos(choice, pivot, undone_pos) {
                Some(start) => start,
                None => continue,
            };
            // overlapping insertion/deletion prefixes often resolve to the
            // same start; skip the repeat evaluation
            if last_start == Some(start) {
                continue;
            }
            last_start = Some(start);

            if let Some(candidate) =
                self.verify_gaps_choice(choice, start, record, reference, bin_start, bin_end)
            {
                if self.is_better_choice(&candidate, max_mismatches_percent, best, *best_changed) {
                    *best = candidate;
                    *best_changed = true;
                }
            }
        }
    }

    /// Resolve the candidate start position for `choice` by anchoring the
    /// pivot gap at its catalog position: signed arithmetic over the chosen
    /// gaps preceding the pivot shifts the gapless anchor left for deleted
    /// reference and right for inserted read bases.
    fn find_start_pos(&self, choice: u64, pivot_index: u32, undone_pos: i64) -> Option<i64> {
        let pivot = &self.current_attempt_gaps[pivot_index as usize];
        let mut start = undone_pos;
        let mut bits = choice & ((1u64 << pivot_index) - 1);
        while bits != 0 {
            let i = bits.trailing_zeros();
            bits &= bits - 1;
            let gap = &self.current_attempt_gaps[i as usize];
            start += gap.read_span() as i64;
            start -= gap.ref_span() as i64;
        }
        if start < 0 {
            return None;
        }
        // the pivot must still fall at or after the shifted start
        if (pivot.pos.position() as i64) < start {
            return None;
        }
        Some(start)
    }

    /// Walk the read from `start`, applying the chosen gaps in position
    /// order, and score the result. Returns `None` for geometrically
    /// invalid placements.
    fn verify_gaps_choice(
        &self,
        choice: u64,
        start: i64,
        record: &FragmentRef<'_>,
        reference: &ContigList,
        bin_start: ReferencePosition,
        bin_end: ReferencePosition,
    ) -> Option<GapChoice> {
        let header = record.header();
        let contig_id = header.fstrand_position.contig_id();
        let start_pos = ReferencePosition::new(contig_id, u64::try_from(start).ok()?);
        if start_pos < bin_start || start_pos >= bin_end {
            return None;
        }

        let head = cigar::head_clip(&self.current_cigar) as usize;
        let tail = cigar::tail_clip(&self.current_cigar) as usize;
        let bases = record.bases();
        let unclipped = &bases[head..bases.len() - tail];

        let mut result = GapChoice {
            choice,
            edit_distance: 0,
            mismatches: 0,
            mismatches_percent: 0,
            cost: 0,
            total_priority: 0,
            mapped_length: 0,
            start_pos,
        };

        let mut read_at = 0usize;
        let mut pos = start_pos;
        let mut combined_gap_length = 0u32;

        let mut bits = choice;
        while bits != 0 {
            let i = bits.trailing_zeros();
            bits &= bits - 1;
            let gap = self.current_attempt_gaps[i as usize];

            if gap.pos < pos {
                return None; // non-monotonic placement
            }
            let match_len = gap.pos.distance_from(pos) as usize;
            if read_at + match_len >= unclipped.len() {
                return None; // gap lands at or past the read end
            }
            result.mismatches +=
                count_mismatches(reference, pos, &unclipped[read_at..read_at + match_len])?;
            result.mapped_length += match_len as u32;
            read_at += match_len;
            pos = pos.checked_add(match_len as u64);

            if gap.is_insertion() {
                let span = gap.read_span() as usize;
                if read_at + span > unclipped.len() {
                    return None;
                }
                read_at += span;
            } else {
                pos = pos.checked_add(gap.ref_span());
            }
            combined_gap_length += gap.edit_length();
            if combined_gap_length > self.max_combined_gap_length {
                return None;
            }
            result.edit_distance += gap.edit_length();
            result.cost += self.gap_open_cost + self.gap_extend_cost * (gap.edit_length() - 1);
            result.add_priority(&gap);
        }

        let remaining = &unclipped[read_at..];
        result.mismatches += count_mismatches(reference, pos, remaining)?;
        result.mapped_length += remaining.len() as u32;

        if result.mapped_length == 0 {
            return None;
        }
        result.edit_distance += result.mismatches;
        result.cost += result.mismatches * self.mismatch_cost;
        result.mismatches_percent = result.mismatches * 100 / result.mapped_length;
        Some(result)
    }

    /// Strict selection precedence. A candidate must first clear the
    /// dead-band against the fragment's current mismatch percentage; only
    /// then do cost, priority, mapped length and start position break ties.
    /// While the incumbent is still the fragment's current alignment the
    /// cost comparison is strict with no tie-breaks, so rewriting never
    /// replaces an alignment with an equivalent one.
    fn is_better_choice(
        &self,
        candidate: &GapChoice,
        max_mismatches_percent: u32,
        best: &GapChoice,
        best_is_candidate: bool,
    ) -> bool {
        if candidate.mismatches_percent > max_mismatches_percent {
            return false;
        }
        if !best_is_candidate {
            return candidate.cost < best.cost;
        }
        if candidate.cost != best.cost {
            return candidate.cost < best.cost;
        }
        if candidate.total_priority != best.total_priority {
            return candidate.total_priority > best.total_priority;
        }
        if candidate.mapped_length != best.mapped_length {
            return candidate.mapped_length > best.mapped_length;
        }
        candidate.start_pos < best.start_pos
    }

    /// Metrics of the fragment's current alignment, the baseline every
    /// candidate has to beat.
    fn alignment_cost(&self, record: &FragmentRef<'_>, index: &RealignIndex) -> Option<GapChoice> {
        let header = record.header();
        let mut result = GapChoice {
            choice: 0,
            edit_distance: header.edit_distance as u32,
            mismatches: 0,
            mismatches_percent: 0,
            cost: 0,
            total_priority: 0,
            mapped_length: 0,
            start_pos: index.pos,
        };

        let mut gap_count = 0u32;
        let mut gap_length = 0u32;
        for &word in &self.current_cigar {
            let (len, op) = cigar::unpack(word);
            match op {
                CigarOp::Align => result.mapped_length += len,
                CigarOp::Insert | CigarOp::Delete => {
                    gap_count += 1;
                    gap_length += len;
                }
                CigarOp::SoftClip => {}
            }
        }
        if result.mapped_length == 0 {
            return None;
        }
        // edit distance carries mismatches + indel length
        result.mismatches = (header.edit_distance as u32).saturating_sub(gap_length);
        result.mismatches_percent = result.mismatches * 100 / result.mapped_length;
        result.cost = result.mismatches * self.mismatch_cost
            + gap_count * self.gap_open_cost
            + self.gap_extend_cost * gap_length.saturating_sub(gap_count);
        Some(result)
    }

    /// The gapless anchor: where the read's first non-clipped base sits once
    /// the fragment's own indels are conceptually stripped. Stripping
    /// internal gaps does not move the first aligned base, so this is the
    /// current position; the value exists as a signed quantity because
    /// chosen-gap arithmetic may shift candidate starts below zero.
    fn undo_existing_gaps(&self, index: &RealignIndex) -> i64 {
        index.pos.position() as i64
    }

    fn extract_realignment_bounds(&self, index: &RealignIndex) -> RealignmentBounds {
        let mut pos = index.pos;
        let begin_pos = pos;
        let mut first_gap_start = None;
        let mut last_gap_end = None;
        for &word in &self.current_cigar {
            let (len, op) = cigar::unpack(word);
            match op {
                CigarOp::Align => pos = pos.checked_add(len as u64),
                CigarOp::Insert => {
                    first_gap_start.get_or_insert(pos);
                    last_gap_end = Some(pos);
                }
                CigarOp::Delete => {
                    first_gap_start.get_or_insert(pos);
                    pos = pos.checked_add(len as u64);
                    last_gap_end = Some(pos);
                }
                CigarOp::SoftClip => {}
            }
        }
        RealignmentBounds {
            begin_pos,
            first_gap_start: first_gap_start.unwrap_or(pos),
            last_gap_end: last_gap_end.unwrap_or(begin_pos),
            end_pos: pos,
        }
    }

    /// Emit the winning choice's edit script into the bin-level scratch
    /// buffer, compact it, and patch the record in place. Discarded
    /// candidates never reach the shared buffer; only the winner is
    /// serialized, so no scratch reclamation pass is needed afterwards.
    fn apply_choice(
        &mut self,
        best: &GapChoice,
        record_bytes: &mut [u8],
        index: &mut RealignIndex,
        realigned_cigars: &mut Vec<u32>,
    ) -> Realignment {
        let head = cigar::head_clip(&self.current_cigar);
        let tail = cigar::tail_clip(&self.current_cigar);
        let read_length = cigar::read_length(&self.current_cigar);
        let unclipped = read_length - head - tail;

        self.scratch_cigar.clear();
        if head > 0 {
            self.scratch_cigar.push(cigar::pack(head, CigarOp::SoftClip));
        }
        let mut read_at = 0u32;
        let mut pos = best.start_pos;
        let mut bits = best.choice;
        while bits != 0 {
            let i = bits.trailing_zeros();
            bits &= bits - 1;
            let gap = self.current_attempt_gaps[i as usize];
            let match_len = gap.pos.distance_from(pos) as u32;
            self.scratch_cigar.push(cigar::pack(match_len, CigarOp::Align));
            read_at += match_len;
            pos = pos.checked_add(match_len as u64);
            if gap.is_insertion() {
                self.scratch_cigar
                    .push(cigar::pack(gap.read_span(), CigarOp::Insert));
                read_at += gap.read_span();
            } else {
                self.scratch_cigar
                    .push(cigar::pack(gap.ref_span() as u32, CigarOp::Delete));
                pos = pos.checked_add(gap.ref_span());
            }
        }
        self.scratch_cigar
            .push(cigar::pack(unclipped - read_at, CigarOp::Align));
        if tail > 0 {
            self.scratch_cigar.push(cigar::pack(tail, CigarOp::SoftClip));
        }
        cigar::compact_in_place(&mut self.scratch_cigar);

        let cigar_offset = realigned_cigars.len();
        realigned_cigars.extend_from_slice(&self.scratch_cigar);
        index.set_cigar(cigar_offset, self.scratch_cigar.len());
        index.pos = best.start_pos;

        let edit_distance = best.edit_distance.min(u16::MAX as u32) as u16;
        let mut record = FragmentMut::new(record_bytes);
        record.set_fstrand_position(best.start_pos);
        record.set_edit_distance(edit_distance);

        let ref_length = cigar::reference_length(&self.scratch_cigar);
        Realignment {
            rstrand_position: best.start_pos.checked_add(ref_length as u64),
            edit_distance,
        }
    }

    /// Propagate a realignment into the partner record: refresh its stored
    /// mate summary (position, anchor, edit distance) and recompute the
    /// pair's template length and proper-pair flags from the per-barcode
    /// statistics. The two byte spans must be the pair's records.
    pub fn update_pair_details(
        barcode_template_length_statistics: &[TemplateLengthStatistics],
        fragment_bytes: &mut [u8],
        mate_bytes: &mut [u8],
        new_rstrand_position: ReferencePosition,
        new_edit_distance: u16,
    ) {
        let fragment = FragmentRef::new(fragment_bytes).header();
        let mate = FragmentRef::new(mate_bytes).header();

        {
            let mut mate = FragmentMut::new(mate_bytes);
            mate.set_mate_fstrand_position(fragment.fstrand_position);
            mate.set_mate_anchor(new_rstrand_position.raw());
            mate.set_mate_edit_distance(new_edit_distance);
        }

        if fragment.is_unmapped() || mate.is_unmapped() {
            return;
        }

        let stats = &barcode_template_length_statistics[fragment.barcode as usize];
        // current alignment ends live in the partner-side anchors
        let fragment_end = new_rstrand_position;
        let mate_end = ReferencePosition::from_raw(fragment.mate_anchor);

        let fragment_is_left = fragment.fstrand_position <= mate.fstrand_position;
        let (left_begin, right_end, left_reverse, right_reverse) = if fragment_is_left {
            (
                fragment.fstrand_position,
                mate_end,
                fragment.is_reverse(),
                mate.is_reverse(),
            )
        } else {
            (
                mate.fstrand_position,
                fragment_end,
                mate.is_reverse(),
                fragment.is_reverse(),
            )
        };

        let (template_length, proper) =
            if left_begin.contig_id() == right_end.contig_id() && right_end > left_begin {
                let length = TemplateLengthStatistics::template_length(
                    left_begin.position(),
                    right_end.position(),
                );
                (
                    length as i64,
                    stats.matches_model(left_reverse, right_reverse, length),
                )
            } else {
                (0, false)
            };

        let (fragment_tlen, mate_tlen) = if fragment_is_left {
            (template_length, -template_length)
        } else {
            (-template_length, template_length)
        };

        let mut record = FragmentMut::new(fragment_bytes);
        record.set_template_length(fragment_tlen);
        record.set_flag(flags::PROPER_PAIR, proper);
        let mut record = FragmentMut::new(mate_bytes);
        record.set_template_length(mate_tlen);
        record.set_flag(flags::PROPER_PAIR, proper);
    }
}

/// Mismatches of `read` against the reference starting at `pos`. `None` when
/// the segment runs off the contig end.
fn count_mismatches(reference: &ContigList, pos: ReferencePosition, read: &[u8]) -> Option<u32> {
    let contig = &reference.contig(pos.contig_id()).sequence;
    let at = pos.position() as usize;
    if at + read.len() > contig.len() {
        return None;
    }
    let mut mismatches = 0u32;
    for (read_base, ref_base) in read.iter().zip(&contig[at..at + read.len()]) {
        if read_base != ref_base {
            mismatches += 1;
        }
    }
    Some(mismatches)
}
