//! Perceptual weights for wavelet coefficients.

use std::cmp;

use crate::haar::{NUM_PIXELS, NUM_PIXELS2};

pub const CHANNELS: usize = 3;
pub const NUM_BINS: usize = 6;

/// Which weight profile to score with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SketchMode {
    /// Scanned or photographic query images.
    Photo,
    /// Hand drawn or painted query images.
    Sketch,
}

impl SketchMode {
    fn row(self) -> usize {
        match self {
            SketchMode::Photo => 0,
            SketchMode::Sketch => 1,
        }
    }
}

impl Default for SketchMode {
    fn default() -> Self {
        SketchMode::Photo
    }
}

//                 Y      I      Q
const WEIGHTS: [[[f64; CHANNELS]; NUM_BINS]; 2] = [
    [
        [5.00, 19.21, 34.37],
        [0.83, 1.26, 0.36],
        [1.01, 0.44, 0.45],
        [0.52, 0.53, 0.14],
        [0.47, 0.28, 0.18],
        [0.30, 0.14, 0.27],
    ],
    [
        [4.04, 15.14, 22.62],
        [0.78, 0.92, 0.40],
        [0.46, 0.53, 0.63],
        [0.42, 0.26, 0.25],
        [0.41, 0.14, 0.15],
        [0.32, 0.07, 0.38],
    ],
];

/// Weight of a coefficient in `channel` whose position falls in `bin`.
#[inline]
pub fn weight(mode: SketchMode, bin: usize, channel: usize) -> f64 {
    WEIGHTS[mode.row()][bin][channel]
}

fn bin(i: usize, j: usize) -> usize {
    cmp::min(cmp::max(i, j), NUM_BINS - 1)
}

/// Precomputed importance class of every position in the transformed plane.
///
/// The 5x5 block nearest the DC term is split into classes 0..4 by
/// `max(row, col)`; everything else is class 5.
#[derive(Debug, Clone)]
pub struct WeightBins {
    bins: Vec<u8>,
}

impl WeightBins {
    pub fn new() -> WeightBins {
        let mut bins = vec![(NUM_BINS - 1) as u8; NUM_PIXELS2];
        for i in 0..NUM_BINS - 1 {
            for j in 0..NUM_BINS - 1 {
                bins[i * NUM_PIXELS + j] = bin(i, j) as u8;
            }
        }
        WeightBins { bins }
    }

    #[inline]
    pub fn classify(&self, position: usize) -> usize {
        self.bins[position] as usize
    }
}

impl Default for WeightBins {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_frequency_block_is_split() {
        let bins = WeightBins::new();
        assert_eq!(bins.classify(0), 0);
        assert_eq!(bins.classify(1), 1);
        assert_eq!(bins.classify(NUM_PIXELS), 1);
        assert_eq!(bins.classify(NUM_PIXELS + 1), 1);
        assert_eq!(bins.classify(2 * NUM_PIXELS + 4), 4);
        assert_eq!(bins.classify(4 * NUM_PIXELS + 4), 4);
    }

    #[test]
    fn test_everything_else_is_coarsest() {
        let bins = WeightBins::new();
        assert_eq!(bins.classify(5), 5);
        assert_eq!(bins.classify(5 * NUM_PIXELS), 5);
        assert_eq!(bins.classify(127), 5);
        assert_eq!(bins.classify(NUM_PIXELS2 - 1), 5);

        let fine = (0..NUM_PIXELS2).filter(|&p| bins.classify(p) < 5).count();
        assert_eq!(fine, 25);
    }

    #[test]
    fn test_weight_profiles_differ() {
        assert_eq!(weight(SketchMode::Photo, 0, 0), 5.00);
        assert_eq!(weight(SketchMode::Sketch, 0, 0), 4.04);
        assert_eq!(weight(SketchMode::Photo, 5, 2), 0.27);
        assert_eq!(weight(SketchMode::Sketch, 5, 1), 0.07);
    }
}
