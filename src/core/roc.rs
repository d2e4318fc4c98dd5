// ROC analysis over duplicate / non-duplicate data files.
//
// A pair is classified as a duplicate when its mean distance is at most the
// threshold. The duplicates file supplies TP/FN, the non-duplicates file
// supplies FP/TN.

use crate::core::datafile::{DataFile, DataFileError};
use crate::core::stats::SENTINEL;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RocError {
    #[error("Data file error: {0}")]
    DataFile(#[from] DataFileError),

    #[error("Cannot derive a threshold range: both data files are empty")]
    EmptyData,

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode calibration record: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    pub threshold: u32,
    pub fpr: f64,
    pub tpr: f64,
}

impl RocPoint {
    /// Squared distance to the perfect classifier at (FPR=0, TPR=1).
    pub fn square_distance_to_optimal(&self) -> f64 {
        self.fpr * self.fpr + (1.0 - self.tpr) * (1.0 - self.tpr)
    }

    /// False when either rate is the sentinel.
    pub fn is_defined(&self) -> bool {
        self.fpr >= 0.0 && self.tpr >= 0.0
    }
}

/// Half-open range `[low, high)` of integer thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdRange {
    pub low: u32,
    pub high: u32,
}

impl ThresholdRange {
    pub fn new(low: u32, high: u32) -> Self {
        Self { low, high }
    }

    pub fn is_empty(&self) -> bool {
        self.low >= self.high
    }

    pub fn iter(&self) -> Range<u32> {
        self.low..self.high
    }

    /// Smallest range covering every mean: `[floor(min), ceil(max) + 1)`.
    pub fn covering(means: impl IntoIterator<Item = f64>) -> Option<Self> {
        let (min, max) = means
            .into_iter()
            .fold(None, |acc: Option<(f64, f64)>, m| match acc {
                None => Some((m, m)),
                Some((lo, hi)) => Some((lo.min(m), hi.max(m))),
            })?;
        Some(Self {
            low: min.max(0.0).floor() as u32,
            high: (max.max(0.0).ceil() as u32).saturating_add(1),
        })
    }
}

fn rate(hits: usize, misses: usize) -> f64 {
    let total = hits + misses;
    if total == 0 {
        SENTINEL
    } else {
        hits as f64 / total as f64
    }
}

/// Mean distances of both classes, held in memory for threshold sweeps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RocSamples {
    pub duplicates: Vec<f64>,
    pub non_duplicates: Vec<f64>,
}

impl RocSamples {
    pub fn new(duplicates: Vec<f64>, non_duplicates: Vec<f64>) -> Self {
        Self {
            duplicates,
            non_duplicates,
        }
    }

    pub fn point(&self, threshold: u32) -> RocPoint {
        let t = threshold as f64;
        let tp = self.duplicates.iter().filter(|&&m| m <= t).count();
        let fn_ = self.duplicates.len() - tp;
        let tn = self.non_duplicates.iter().filter(|&&m| m > t).count();
        let fp = self.non_duplicates.len() - tn;
        RocPoint {
            threshold,
            fpr: rate(fp, tn),
            tpr: rate(tp, fn_),
        }
    }

    pub fn curve(&self, range: ThresholdRange) -> Vec<RocPoint> {
        range.iter().map(|t| self.point(t)).collect()
    }

    /// Point in `range` closest to (0, 1); the lowest threshold wins ties.
    /// `None` for an empty range.
    pub fn optimal_threshold(&self, range: ThresholdRange) -> Option<RocPoint> {
        let mut best: Option<(RocPoint, f64)> = None;
        for threshold in range.iter() {
            let point = self.point(threshold);
            let d = point.square_distance_to_optimal();
            if best.is_none_or(|(_, best_d)| d < best_d) {
                best = Some((point, d));
            }
        }
        best.map(|(point, _)| point)
    }

    pub fn observed_range(&self) -> Option<ThresholdRange> {
        ThresholdRange::covering(
            self.duplicates
                .iter()
                .chain(self.non_duplicates.iter())
                .copied(),
        )
    }
}

/// Calibrates a duplicate threshold from a pair of data files.
pub struct RocCalibrator {
    duplicates: PathBuf,
    non_duplicates: PathBuf,
}

impl RocCalibrator {
    pub fn new(duplicates: impl Into<PathBuf>, non_duplicates: impl Into<PathBuf>) -> Self {
        Self {
            duplicates: duplicates.into(),
            non_duplicates: non_duplicates.into(),
        }
    }

    pub fn duplicates_path(&self) -> &Path {
        &self.duplicates
    }

    pub fn non_duplicates_path(&self) -> &Path {
        &self.non_duplicates
    }

    /// Read both data files from the start.
    pub fn load(&self) -> Result<RocSamples, RocError> {
        let duplicates = DataFile::read(&self.duplicates)?;
        let non_duplicates = DataFile::read(&self.non_duplicates)?;
        log::debug!(
            "Loaded {} duplicate and {} non-duplicate row(s)",
            duplicates.rows.len(),
            non_duplicates.rows.len()
        );
        Ok(RocSamples::new(
            duplicates.means().collect(),
            non_duplicates.means().collect(),
        ))
    }

    pub fn compute_point(&self, threshold: u32) -> Result<RocPoint, RocError> {
        Ok(self.load()?.point(threshold))
    }

    pub fn curve(&self, range: ThresholdRange) -> Result<Vec<RocPoint>, RocError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.load()?.curve(range))
    }

    pub fn optimal_threshold(&self, range: ThresholdRange) -> Result<Option<RocPoint>, RocError> {
        if range.is_empty() {
            return Ok(None);
        }
        let best = self.load()?.optimal_threshold(range);
        if let Some(point) = &best {
            log::info!(
                "Optimal threshold {} (fpr {:.4}, tpr {:.4})",
                point.threshold,
                point.fpr,
                point.tpr
            );
        }
        Ok(best)
    }

    /// Threshold range spanning the means observed in both files.
    pub fn derive_range(&self) -> Result<ThresholdRange, RocError> {
        self.load()?.observed_range().ok_or(RocError::EmptyData)
    }
}

/// Area under the curve by the trapezoid rule over the defined points,
/// anchored at (0,0) and (1,1). `None` when no point is defined.
pub fn auc(points: &[RocPoint]) -> Option<f64> {
    let mut coords: Vec<(f64, f64)> = points
        .iter()
        .filter(|p| p.is_defined())
        .map(|p| (p.fpr, p.tpr))
        .collect();
    if coords.is_empty() {
        return None;
    }
    coords.push((0.0, 0.0));
    coords.push((1.0, 1.0));
    coords.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    Some(
        coords
            .windows(2)
            .map(|w| (w[1].0 - w[0].0) * (w[0].1 + w[1].1) / 2.0)
            .sum(),
    )
}

/// Write a plot file: `# FPR TPR threshold`, then one point per line.
pub fn write_curve<W: Write>(out: &mut W, points: &[RocPoint]) -> io::Result<()> {
    writeln!(out, "# FPR TPR threshold")?;
    for point in points {
        writeln!(out, "{:.6} {:.6} {}", point.fpr, point.tpr, point.threshold)?;
    }
    Ok(())
}

/// One line of the calibration history (JSON lines).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub timestamp: String,
    pub duplicates: String,
    pub non_duplicates: String,
    pub range: ThresholdRange,
    pub threshold: u32,
    pub fpr: f64,
    pub tpr: f64,
    pub auc: Option<f64>,
}

impl CalibrationRecord {
    pub fn new(
        calibrator: &RocCalibrator,
        range: ThresholdRange,
        point: RocPoint,
        auc: Option<f64>,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            duplicates: calibrator.duplicates_path().to_string_lossy().into_owned(),
            non_duplicates: calibrator
                .non_duplicates_path()
                .to_string_lossy()
                .into_owned(),
            range,
            threshold: point.threshold,
            fpr: point.fpr,
            tpr: point.tpr,
            auc,
        }
    }

    pub fn append_to(&self, path: &Path) -> Result<(), RocError> {
        let io_err = |source| RocError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        };
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        writeln!(out, "{}", serde_json::to_string(self)?).map_err(io_err)?;
        Ok(())
    }
}
