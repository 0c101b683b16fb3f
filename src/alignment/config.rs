//! Scoring configuration consumed from the configuration stage.

use crate::defaults;

/// How alignments get penalized for mismatches and gaps. Built once by the
/// surrounding configuration handling and shared read-only.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentConfig {
    pub match_score: i32,
    pub mismatch_score: i32,
    pub gap_open_score: i32,
    pub gap_extend_score: i32,
    pub min_gap_extend_score: i32,
    /// Gaps longer than this are handled as split alignments upstream; the
    /// realigner rejects choices whose combined gap length exceeds it.
    pub split_gap_length: u32,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        AlignmentConfig {
            match_score: defaults::MATCH_SCORE,
            mismatch_score: defaults::MISMATCH_SCORE,
            gap_open_score: defaults::GAP_OPEN_SCORE,
            gap_extend_score: defaults::GAP_EXTEND_SCORE,
            min_gap_extend_score: defaults::MIN_GAP_EXTEND_SCORE,
            split_gap_length: defaults::SPLIT_GAP_LENGTH,
        }
    }
}

/// Knobs of the realignment search itself, separate from alignment scoring so
/// the two can be configured independently.
#[derive(Debug, Clone, Copy)]
pub struct RealignConfig {
    /// Run the search even for fragments whose alignment is already
    /// acceptable.
    pub realign_vigorously: bool,
    /// Allow the search to touch fragments flagged dodgy.
    pub realign_dodgy: bool,
    /// Maximum number of gaps introduced into one fragment.
    pub gaps_per_fragment_max: u32,
    /// Recommended to stay below `gap_open_cost` so that no less than two
    /// mismatches would warrant adding a gap.
    pub mismatch_cost: u32,
    pub gap_open_cost: u32,
    /// Recommended 0: it does not matter how long the introduced gap is.
    pub gap_extend_cost: u32,
}

impl Default for RealignConfig {
    fn default() -> Self {
        RealignConfig {
            realign_vigorously: false,
            realign_dodgy: false,
            gaps_per_fragment_max: defaults::GAPS_PER_FRAGMENT_MAX,
            mismatch_cost: defaults::MISMATCH_COST,
            gap_open_cost: defaults::GAP_OPEN_COST,
            gap_extend_cost: defaults::GAP_EXTEND_COST,
        }
    }
}
