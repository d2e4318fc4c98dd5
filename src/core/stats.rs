use crate::core::distance::DistanceMetric;
use crate::core::hash::{DifferenceHasher, ImageFingerprint};
use crate::core::image::{GridLoader, ImageLoadError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Reported in place of a rate or ratio whose denominator is zero.
pub const SENTINEL: f64 = -1.0;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Trial count must be at least 1, got {0}")]
    InvalidTrialCount(usize),

    #[error("Image load error: {0}")]
    ImageLoad(#[from] ImageLoadError),
}

/// Summary of the distances measured over repeated trials of one image pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairStatistics {
    pub path_a: String,
    pub path_b: String,
    pub min: u32,
    pub max: u32,
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub rel_std_dev: f64,
    /// Raw per-trial distances; empty when they were not kept.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<u32>,
}

impl PairStatistics {
    /// Population statistics over `samples`. `rel_std_dev` is [`SENTINEL`]
    /// when the mean is zero.
    pub fn from_samples(
        path_a: impl Into<String>,
        path_b: impl Into<String>,
        samples: Vec<u32>,
    ) -> Result<Self, StatsError> {
        let (Some(&min), Some(&max)) = (samples.iter().min(), samples.iter().max()) else {
            return Err(StatsError::InvalidTrialCount(0));
        };

        let n = samples.len() as f64;
        let sum: u64 = samples.iter().map(|&s| s as u64).sum();
        let mean = sum as f64 / n;
        let variance = samples
            .iter()
            .map(|&s| {
                let r = s as f64 - mean;
                r * r
            })
            .sum::<f64>()
            / n;
        let std_dev = variance.sqrt();
        let rel_std_dev = if mean == 0.0 {
            SENTINEL
        } else {
            100.0 * std_dev / mean
        };

        Ok(Self {
            path_a: path_a.into(),
            path_b: path_b.into(),
            min,
            max,
            mean,
            variance,
            std_dev,
            rel_std_dev,
            samples,
        })
    }

    pub fn without_samples(mut self) -> Self {
        self.samples.clear();
        self
    }
}

/// Repeats fingerprinting and distance measurement for an image pair.
///
/// Images are decoded again on every trial so that any nondeterminism in the
/// decode path shows up in the spread of the samples.
pub struct TrialStatistics<L> {
    loader: L,
    hasher: DifferenceHasher,
    metric: DistanceMetric,
}

impl<L: GridLoader> TrialStatistics<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            hasher: DifferenceHasher::new(),
            metric: DistanceMetric::default(),
        }
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Decode, fingerprint and compare `path_a` and `path_b` exactly
    /// `trials` times. Any load failure aborts the pair.
    pub fn run(
        &self,
        path_a: &Path,
        path_b: &Path,
        trials: usize,
    ) -> Result<PairStatistics, StatsError> {
        if trials < 1 {
            return Err(StatsError::InvalidTrialCount(trials));
        }

        let mut samples = Vec::with_capacity(trials);
        for _ in 0..trials {
            let a = self.loader.fingerprint(&self.hasher, path_a)?;
            let b = self.loader.fingerprint(&self.hasher, path_b)?;
            samples.push(self.metric.distance(&a, &b));
        }
        log::debug!(
            "{} vs {}: {} trial(s), samples {:?}",
            path_a.display(),
            path_b.display(),
            trials,
            samples
        );

        PairStatistics::from_samples(
            path_a.to_string_lossy(),
            path_b.to_string_lossy(),
            samples,
        )
    }

    /// Pure variant over fingerprints that were already computed.
    pub fn run_fingerprints(
        &self,
        a: &ImageFingerprint,
        b: &ImageFingerprint,
        trials: usize,
    ) -> Result<PairStatistics, StatsError> {
        if trials < 1 {
            return Err(StatsError::InvalidTrialCount(trials));
        }
        let samples = (0..trials).map(|_| self.metric.distance(a, b)).collect();
        let label = |fp: &ImageFingerprint| {
            fp.path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        PairStatistics::from_samples(label(a), label(b), samples)
    }
}
