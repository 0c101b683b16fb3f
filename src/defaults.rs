// src/defaults.rs

// Alignment scoring defaults
pub const MATCH_SCORE: i32 = 2;
pub const MISMATCH_SCORE: i32 = -1;
pub const GAP_OPEN_SCORE: i32 = -15;
pub const GAP_EXTEND_SCORE: i32 = -3;
pub const MIN_GAP_EXTEND_SCORE: i32 = -25;
pub const SPLIT_GAP_LENGTH: u32 = 10_000;

// Realignment search defaults
pub const GAPS_PER_FRAGMENT_MAX: u32 = 2;
pub const MISMATCH_COST: u32 = 3;
pub const GAP_OPEN_COST: u32 = 4;
pub const GAP_EXTEND_COST: u32 = 0;
