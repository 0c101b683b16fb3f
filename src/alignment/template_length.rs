//! Template-length statistics used to refresh pair-level fields after
//! realignment.
//!
//! One instance per barcode, estimated upstream from the first batch of
//! confidently aligned pairs. The mate updater only needs the dominant
//! orientation and the accepted length band.

/// Relative orientation of the two reads of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOrientation {
    /// Forward-reverse, reads facing each other (the common library prep).
    Fr,
    /// Reverse-forward, reads facing away.
    Rf,
    /// Both reads on the same strand.
    Tandem,
}

/// Insert-size model for one barcode.
#[derive(Debug, Clone, Copy)]
pub struct TemplateLengthStatistics {
    pub orientation: PairOrientation,
    pub min: u32,
    pub median: u32,
    pub max: u32,
    /// Whether enough pairs were seen to trust the model.
    pub stable: bool,
}

impl Default for TemplateLengthStatistics {
    fn default() -> Self {
        TemplateLengthStatistics {
            orientation: PairOrientation::Fr,
            min: 0,
            median: 0,
            max: 0,
            stable: false,
        }
    }
}

impl TemplateLengthStatistics {
    pub fn new(orientation: PairOrientation, min: u32, median: u32, max: u32) -> Self {
        TemplateLengthStatistics {
            orientation,
            min,
            median,
            max,
            stable: true,
        }
    }

    /// Template length of a pair given the leftmost begin and rightmost end
    /// positions of its two reads on the contig.
    #[inline]
    pub fn template_length(leftmost_begin: u64, rightmost_end: u64) -> u64 {
        rightmost_end.saturating_sub(leftmost_begin)
    }

    /// Checks a pair against the model: observed orientation must match the
    /// dominant one and the length must fall inside the accepted band.
    pub fn matches_model(&self, f_reverse: bool, r_reverse: bool, template_length: u64) -> bool {
        if !self.stable {
            return false;
        }
        let orientation = match (f_reverse, r_reverse) {
            (false, true) => PairOrientation::Fr,
            (true, false) => PairOrientation::Rf,
            _ => PairOrientation::Tandem,
        };
        orientation == self.orientation
            && template_length >= self.min as u64
            && template_length <= self.max as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_model() {
        let stats = TemplateLengthStatistics::new(PairOrientation::Fr, 100, 300, 600);
        assert!(stats.matches_model(false, true, 300));
        assert!(stats.matches_model(false, true, 100));
        assert!(!stats.matches_model(false, true, 601));
        assert!(!stats.matches_model(true, false, 300));
        assert!(!stats.matches_model(false, false, 300));
    }

    #[test]
    fn test_unstable_never_matches() {
        let stats = TemplateLengthStatistics::default();
        assert!(!stats.matches_model(false, true, 300));
    }

    #[test]
    fn test_template_length() {
        assert_eq!(TemplateLengthStatistics::template_length(100, 400), 300);
        assert_eq!(TemplateLengthStatistics::template_length(400, 100), 0);
    }
}
