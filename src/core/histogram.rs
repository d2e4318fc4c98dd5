// Histogram of bit arrays used to bin-sort the 64 neighbor differences of one
// axis by magnitude. Bin `j` holds bit `k` when difference `k` has
// magnitude `j`, so the bins double as an order statistic over 64 values.

use crate::core::bitset::BitSet64;

/// Number of magnitude bins (one per possible `|difference|`).
pub const BINS: usize = 256;

/// Number of differences per axis.
pub const DIFFERENCES: usize = 64;

const HALF: u32 = (DIFFERENCES / 2) as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramState {
    Empty,
    Accumulating,
}

/// An accumulating histogram. Finalizing consumes it, so a finalized
/// histogram can never receive further inserts.
#[derive(Debug, Clone)]
pub struct Histogram {
    bins: [BitSet64; BINS],
    differences: [i16; DIFFERENCES],
    hash: BitSet64,
    state: HistogramState,
}

/// The result of [`Histogram::finalize`].
#[derive(Debug, Clone)]
pub struct FinalizedHistogram {
    bins: [BitSet64; BINS],
    differences: [i16; DIFFERENCES],
    hash: BitSet64,
    median: u8,
    importance: BitSet64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            bins: [BitSet64::EMPTY; BINS],
            differences: [0; DIFFERENCES],
            hash: BitSet64::EMPTY,
            state: HistogramState::Empty,
        }
    }

    pub fn state(&self) -> HistogramState {
        self.state
    }

    /// Set bit `bit` in bin `bin`.
    pub fn insert(&mut self, bin: u8, bit: usize) {
        self.bins[bin as usize].set(bit);
        self.state = HistogramState::Accumulating;
    }

    pub fn get(&self, bin: u8, bit: usize) -> bool {
        self.bins[bin as usize].get(bit)
    }

    /// Clear bit `bit` in bin `bin`.
    pub fn remove(&mut self, bin: u8, bit: usize) {
        self.bins[bin as usize].clear(bit);
    }

    pub fn bin(&self, bin: u8) -> BitSet64 {
        self.bins[bin as usize]
    }

    pub fn hash(&self) -> BitSet64 {
        self.hash
    }

    /// Record the signed difference `next - current` for pixel `index`:
    /// a positive difference sets the hash bit, and the magnitude selects
    /// the bin that receives bit `index`.
    pub fn record_difference(&mut self, index: usize, difference: i16) {
        let index = index % DIFFERENCES;
        self.differences[index] = difference;
        if difference > 0 {
            self.hash.set(index);
        }
        self.insert(difference.unsigned_abs().min(u8::MAX as u16) as u8, index);
    }

    /// Index of the first bin at which the cumulative popcount strictly
    /// exceeds 32.
    ///
    /// If the cumulative count never exceeds 32 (fewer than 33 bits were
    /// inserted) the median stays at 0, and the importance mask becomes the
    /// union of every bin.
    pub fn compute_median(&self) -> u8 {
        let mut count = 0u32;
        for (i, bin) in self.bins.iter().enumerate() {
            count += bin.popcount();
            if count > HALF {
                return i as u8;
            }
        }
        0
    }

    /// Union of the bins from `median` to 255 inclusive.
    pub fn compute_importance(&self, median: u8) -> BitSet64 {
        self.bins[median as usize..]
            .iter()
            .fold(BitSet64::EMPTY, |acc, bin| acc | *bin)
    }

    pub fn finalize(self) -> FinalizedHistogram {
        let median = self.compute_median();
        let importance = self.compute_importance(median);
        FinalizedHistogram {
            bins: self.bins,
            differences: self.differences,
            hash: self.hash,
            median,
            importance,
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalizedHistogram {
    pub fn median(&self) -> u8 {
        self.median
    }

    pub fn importance(&self) -> BitSet64 {
        self.importance
    }

    pub fn hash(&self) -> BitSet64 {
        self.hash
    }

    pub fn bin(&self, bin: u8) -> BitSet64 {
        self.bins[bin as usize]
    }

    /// Signed neighbor differences, indexed by bit position.
    pub fn differences(&self) -> &[i16; DIFFERENCES] {
        &self.differences
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram_from_magnitudes(magnitudes: &[u8]) -> Histogram {
        let mut hist = Histogram::new();
        for (bit, &m) in magnitudes.iter().enumerate() {
            hist.insert(m, bit);
        }
        hist
    }

    #[test]
    fn test_insert_get_remove() {
        let mut hist = Histogram::new();
        assert_eq!(hist.state(), HistogramState::Empty);

        hist.insert(0, 1);
        assert_eq!(hist.state(), HistogramState::Accumulating);
        assert!(hist.get(0, 1));
        assert!(!hist.get(0, 2));
        assert!(!hist.get(1, 1));

        hist.remove(0, 1);
        assert!(!hist.get(0, 1));
    }

    #[test]
    fn test_record_difference_sets_hash_and_bin() {
        let mut hist = Histogram::new();
        hist.record_difference(5, 12);
        hist.record_difference(6, -40);
        hist.record_difference(7, 0);

        assert!(hist.hash().get(5));
        assert!(!hist.hash().get(6));
        assert!(!hist.hash().get(7));
        assert!(hist.get(12, 5));
        assert!(hist.get(40, 6));
        assert!(hist.get(0, 7));

        let finalized = hist.finalize();
        assert_eq!(finalized.differences()[5], 12);
        assert_eq!(finalized.differences()[6], -40);
    }

    #[test]
    fn test_median_of_uniform_magnitudes() {
        // Bit k has magnitude k: the 33rd value (index 32) is the first
        // to push the running count past 32.
        let magnitudes: Vec<u8> = (0..64).collect();
        let hist = histogram_from_magnitudes(&magnitudes);
        assert_eq!(hist.compute_median(), 32);
    }

    #[test]
    fn test_median_all_in_one_bin() {
        let hist = histogram_from_magnitudes(&[17; 64]);
        assert_eq!(hist.compute_median(), 17);
    }

    #[test]
    fn test_median_monotone_under_shift() {
        let base: Vec<u8> = (0..64).map(|k| (k * 3) as u8).collect();
        let mut previous = 0u8;
        for shift in [0u8, 1, 5, 20, 40, 60] {
            let shifted: Vec<u8> = base.iter().map(|m| m.saturating_add(shift)).collect();
            let median = histogram_from_magnitudes(&shifted).compute_median();
            assert!(median >= previous, "shift {shift}: {median} < {previous}");
            previous = median;
        }
    }

    #[test]
    fn test_median_defaults_to_zero_when_half_never_exceeded() {
        // Exactly 32 bits, all in the last bin: the count reaches 32 but
        // never exceeds it.
        let mut hist = Histogram::new();
        for bit in 0..32 {
            hist.insert(255, bit);
        }
        assert_eq!(hist.compute_median(), 0);

        let finalized = hist.finalize();
        assert_eq!(finalized.median(), 0);
        assert_eq!(finalized.importance().bits(), u32::MAX as u64);
    }

    #[test]
    fn test_importance_excludes_bins_below_median() {
        let mut magnitudes = vec![1u8; 32];
        magnitudes.extend(vec![200u8; 32]);
        let finalized = histogram_from_magnitudes(&magnitudes).finalize();

        assert_eq!(finalized.median(), 200);
        // Bits 32..64 carry the large magnitudes.
        assert_eq!(finalized.importance().bits(), 0xFFFF_FFFF_0000_0000);
    }

    #[test]
    fn test_importance_zero_when_all_mass_below_median() {
        let magnitudes: Vec<u8> = (0..64).map(|k| (k % 10) as u8).collect();
        let hist = histogram_from_magnitudes(&magnitudes);
        assert!(hist.compute_importance(200).is_empty());
    }

    #[test]
    fn test_importance_is_submask_of_upper_bins() {
        let magnitudes: Vec<u8> = (0..64).map(|k| ((k * 37) % 256) as u8).collect();
        let finalized = histogram_from_magnitudes(&magnitudes).finalize();
        let upper = (finalized.median()..=u8::MAX)
            .fold(BitSet64::EMPTY, |acc, bin| acc | finalized.bin(bin));
        assert_eq!(finalized.importance() & upper, finalized.importance());
        // Each bit lives in exactly one bin here, so lower bins share nothing
        // with the mask.
        for bin in 0..finalized.median() {
            assert!((finalized.bin(bin) & finalized.importance()).is_empty());
        }
    }

    #[test]
    fn test_every_bin_full() {
        let mut hist = Histogram::new();
        for bin in 0..=u8::MAX {
            for bit in 0..64 {
                hist.insert(bin, bit);
            }
        }
        let finalized = hist.finalize();
        assert_eq!(finalized.median(), 0);
        assert_eq!(finalized.importance(), BitSet64::FULL);
    }
}
