use crate::core::bitset::BitSet64;
use crate::core::histogram::{FinalizedHistogram, Histogram};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Width and height of the pixel grid every image is reduced to.
pub const GRID_SIZE: usize = 8;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("Input pixel grid should be {GRID_SIZE}x{GRID_SIZE} but is {width}x{height}")]
    Shape { width: usize, height: usize },

    #[error("Pixel buffer holds {len} values, expected {expected} for a {width}x{height} grid")]
    BufferLength {
        len: usize,
        expected: usize,
        width: usize,
        height: usize,
    },
}

/// An 8x8 grid of grayscale intensities, stored row-major (`rows[y][x]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    rows: [[u8; GRID_SIZE]; GRID_SIZE],
}

impl PixelGrid {
    pub fn new(rows: [[u8; GRID_SIZE]; GRID_SIZE]) -> Self {
        Self { rows }
    }

    pub fn uniform(intensity: u8) -> Self {
        Self::new([[intensity; GRID_SIZE]; GRID_SIZE])
    }

    /// Build a grid from a flat row-major luma buffer, rejecting anything
    /// that is not exactly 8x8.
    pub fn from_luma(width: usize, height: usize, data: &[u8]) -> Result<Self, HashError> {
        if width != GRID_SIZE || height != GRID_SIZE {
            return Err(HashError::Shape { width, height });
        }
        let expected = width * height;
        if data.len() != expected {
            return Err(HashError::BufferLength {
                len: data.len(),
                expected,
                width,
                height,
            });
        }

        let mut rows = [[0u8; GRID_SIZE]; GRID_SIZE];
        for (row, chunk) in rows.iter_mut().zip(data.chunks_exact(GRID_SIZE)) {
            row.copy_from_slice(chunk);
        }
        Ok(Self { rows })
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.rows[y][x]
    }

    /// Intensity at flat index `x + 8*y`.
    pub fn at(&self, index: usize) -> u8 {
        self.rows[index / GRID_SIZE][index % GRID_SIZE]
    }

    pub fn transposed(&self) -> Self {
        let mut rows = [[0u8; GRID_SIZE]; GRID_SIZE];
        for (y, row) in rows.iter_mut().enumerate() {
            for (x, value) in row.iter_mut().enumerate() {
                *value = self.rows[x][y];
            }
        }
        Self { rows }
    }
}

/// Neighbor direction for a difference hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Horizontal neighbors along each row.
    X,
    /// Vertical neighbors along each column.
    Y,
}

impl Axis {
    /// Flat index of the neighbor of `index` along this axis. The last pixel
    /// of a row (column) wraps around to the first.
    pub fn next(self, index: usize) -> usize {
        let x = index % GRID_SIZE;
        let y = index / GRID_SIZE;
        match self {
            Axis::X => (x + 1) % GRID_SIZE + GRID_SIZE * y,
            Axis::Y => x + GRID_SIZE * ((y + 1) % GRID_SIZE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisHashResult {
    pub hash: BitSet64,
    pub importance: BitSet64,
}

impl From<&FinalizedHistogram> for AxisHashResult {
    fn from(hist: &FinalizedHistogram) -> Self {
        Self {
            hash: hist.hash(),
            importance: hist.importance(),
        }
    }
}

/// The x/y difference hashes and importance masks of one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFingerprint {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<PathBuf>,
    pub dx: BitSet64,
    pub dy: BitSet64,
    pub ix: BitSet64,
    pub iy: BitSet64,
}

impl ImageFingerprint {
    pub fn from_axes(x: AxisHashResult, y: AxisHashResult) -> Self {
        Self {
            path: None,
            dx: x.hash,
            dy: y.hash,
            ix: x.importance,
            iy: y.importance,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn axis(&self, axis: Axis) -> AxisHashResult {
        match axis {
            Axis::X => AxisHashResult {
                hash: self.dx,
                importance: self.ix,
            },
            Axis::Y => AxisHashResult {
                hash: self.dy,
                importance: self.iy,
            },
        }
    }
}

/// Formats as `<dx> <dy> <ix> <iy>`.
impl fmt::Display for ImageFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.dx, self.dy, self.ix, self.iy)
    }
}

/// Computes importance-weighted difference hashes from 8x8 pixel grids.
pub struct DifferenceHasher;

impl DifferenceHasher {
    pub fn new() -> Self {
        Self
    }

    /// Run one axis: record all 64 neighbor differences into a private
    /// histogram and finalize it.
    pub fn hash_axis(&self, grid: &PixelGrid, axis: Axis) -> FinalizedHistogram {
        let mut hist = Histogram::new();
        for index in 0..GRID_SIZE * GRID_SIZE {
            let current = grid.at(index) as i16;
            let next = grid.at(axis.next(index)) as i16;
            hist.record_difference(index, next - current);
        }
        hist.finalize()
    }

    /// Compute the fingerprint of `grid`. The two axes run as a fork/join
    /// pair over the shared, read-only grid.
    pub fn fingerprint(&self, grid: &PixelGrid) -> ImageFingerprint {
        let (x, y) = rayon::join(
            || self.hash_axis(grid, Axis::X),
            || self.hash_axis(grid, Axis::Y),
        );
        log::trace!("axis medians: x={} y={}", x.median(), y.median());
        ImageFingerprint::from_axes(AxisHashResult::from(&x), AxisHashResult::from(&y))
    }

    /// Validate a flat luma buffer as an 8x8 grid, then fingerprint it.
    pub fn fingerprint_pixels(
        &self,
        width: usize,
        height: usize,
        data: &[u8],
    ) -> Result<ImageFingerprint, HashError> {
        let grid = PixelGrid::from_luma(width, height, data)?;
        Ok(self.fingerprint(&grid))
    }
}

impl Default for DifferenceHasher {
    fn default() -> Self {
        Self::new()
    }
}
