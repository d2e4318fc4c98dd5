use crate::core::hash::{Axis, AxisHashResult, ImageFingerprint};
use serde::{Deserialize, Serialize};

/// Largest possible distance: 64 bits on each of two axes.
pub const MAX_DISTANCE: u32 = 128;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Hash disagreements counted only where either image marks the
    /// position as important.
    #[default]
    #[value(name = "idhash")]
    IdHash,
    /// Plain Hamming distance between the difference hashes.
    Classic,
}

impl DistanceMetric {
    pub fn distance(self, a: &ImageFingerprint, b: &ImageFingerprint) -> u32 {
        match self {
            DistanceMetric::IdHash => idhash_distance(a, b),
            DistanceMetric::Classic => classic_distance(a, b),
        }
    }
}

/// `popcount((d1 ^ d2) & (i1 | i2))` for a single axis.
pub fn axis_distance(a: AxisHashResult, b: AxisHashResult) -> u32 {
    ((a.hash ^ b.hash) & (a.importance | b.importance)).popcount()
}

/// Importance-weighted Hamming distance summed over both axes, in `0..=128`.
pub fn idhash_distance(a: &ImageFingerprint, b: &ImageFingerprint) -> u32 {
    axis_distance(a.axis(Axis::X), b.axis(Axis::X))
        + axis_distance(a.axis(Axis::Y), b.axis(Axis::Y))
}

/// Unweighted difference-hash distance: `popcount(d1x ^ d2x) + popcount(d1y ^ d2y)`.
pub fn classic_distance(a: &ImageFingerprint, b: &ImageFingerprint) -> u32 {
    (a.dx ^ b.dx).popcount() + (a.dy ^ b.dy).popcount()
}
