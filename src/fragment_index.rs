//! Index entries referencing records inside a bin's packed buffer.
//!
//! Three shapes, kept in separate collections because downstream sorting and
//! merging treats them differently: forward-strand ends of pairs,
//! reverse-strand or shadow (unmapped-at-mate-position) ends, and single-end
//! fragments. Entries denormalize the sort and lookup keys so consumers never
//! have to touch the packed buffer while ordering.

use crate::fragment::FragmentHeader;
use crate::reference::ReferencePosition;

/// Compact summary of the mate stored inside its partner's index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentIndexMate {
    pub unmapped: bool,
    pub reverse: bool,
    /// Bin the mate record was routed to.
    pub storage_bin: u32,
    /// Anchor: the mate's alignment summary (raw reverse-strand position).
    pub anchor: u64,
}

impl FragmentIndexMate {
    pub fn from_header(header: &FragmentHeader) -> Self {
        FragmentIndexMate {
            unmapped: header.is_mate_unmapped(),
            reverse: header.is_mate_reverse(),
            storage_bin: header.mate_storage_bin,
            anchor: header.mate_anchor,
        }
    }
}

/// Forward-strand end of a pair.
#[derive(Debug, Clone, Copy)]
pub struct FStrandFragmentIndex {
    pub fstrand_position: ReferencePosition,
    pub mate: FragmentIndexMate,
    pub duplicate_cluster_rank: u32,
    pub data_offset: u64,
    pub mate_data_offset: u64,
}

/// Reverse-strand end of a pair, or an unmapped shadow stored at its
/// singleton's position.
#[derive(Debug, Clone, Copy)]
pub struct RStrandOrShadowFragmentIndex {
    pub fstrand_position: ReferencePosition,
    /// This fragment's own anchor, mirrored out of the record for sorting.
    pub anchor: u64,
    pub mate: FragmentIndexMate,
    pub duplicate_cluster_rank: u32,
    pub data_offset: u64,
    pub mate_data_offset: u64,
}

/// Single-end fragment; no mate linkage.
#[derive(Debug, Clone, Copy)]
pub struct SeFragmentIndex {
    pub fstrand_position: ReferencePosition,
    pub data_offset: u64,
}

impl FStrandFragmentIndex {
    pub fn new(header: &FragmentHeader, data_offset: u64, mate_data_offset: u64) -> Self {
        FStrandFragmentIndex {
            fstrand_position: header.fstrand_position,
            mate: FragmentIndexMate::from_header(header),
            duplicate_cluster_rank: header.duplicate_cluster_rank,
            data_offset,
            mate_data_offset,
        }
    }
}

impl RStrandOrShadowFragmentIndex {
    pub fn new(header: &FragmentHeader, data_offset: u64, mate_data_offset: u64) -> Self {
        RStrandOrShadowFragmentIndex {
            // shadows are stored at the position of their singletons
            fstrand_position: header.fstrand_position,
            anchor: header.fstrand_position.raw(),
            mate: FragmentIndexMate::from_header(header),
            duplicate_cluster_rank: header.duplicate_cluster_rank,
            data_offset,
            mate_data_offset,
        }
    }
}

impl SeFragmentIndex {
    pub fn new(header: &FragmentHeader, data_offset: u64) -> Self {
        SeFragmentIndex {
            fstrand_position: header.fstrand_position,
            data_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::flags;

    #[test]
    fn test_mate_descriptor_from_header() {
        let header = FragmentHeader {
            flags: flags::INITIALIZED | flags::PAIRED | flags::MATE_REVERSE,
            mate_storage_bin: 12,
            mate_anchor: 98765,
            ..Default::default()
        };
        let mate = FragmentIndexMate::from_header(&header);
        assert!(!mate.unmapped);
        assert!(mate.reverse);
        assert_eq!(mate.storage_bin, 12);
        assert_eq!(mate.anchor, 98765);
    }

    #[test]
    fn test_entry_keys_denormalized() {
        let header = FragmentHeader {
            flags: flags::INITIALIZED | flags::PAIRED | flags::REVERSE,
            fstrand_position: ReferencePosition::new(1, 777),
            duplicate_cluster_rank: 5,
            ..Default::default()
        };
        let entry = RStrandOrShadowFragmentIndex::new(&header, 100, 300);
        assert_eq!(entry.fstrand_position, header.fstrand_position);
        assert_eq!(entry.anchor, header.fstrand_position.raw());
        assert_eq!(entry.duplicate_cluster_rank, 5);
        assert_eq!((entry.data_offset, entry.mate_data_offset), (100, 300));
    }
}
