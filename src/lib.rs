//! Packed fragment storage and gap realignment.
//!
//! The two halves of this crate are the bin loader, which reconstructs a
//! genome-region bin's worth of packed fragment records with paired reads
//! kept consistent, and the gap realigner, which tries to explain a
//! fragment's mismatches with insertions and deletions observed elsewhere in
//! the bin. Everything upstream (seeding, scoring, reference preparation) and
//! downstream (duplicate marking, output serialization) lives in
//! collaborating crates.

pub mod alignment;
pub mod bin_loader;
pub mod bin_meta;
pub mod bin_store;
pub mod defaults;
pub mod fragment;
pub mod fragment_index;
pub mod gaps;
pub mod packed_buffer;
pub mod parallel;
pub mod realigner;
pub mod reference;
pub mod utils;
