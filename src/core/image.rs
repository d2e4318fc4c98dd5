use crate::core::hash::{DifferenceHasher, GRID_SIZE, HashError, ImageFingerprint, PixelGrid};
use image::imageops::FilterType;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageLoadError {
    #[error("Image not found: {path}")]
    Missing { path: String },

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Decoded grid for {path} is unusable: {source}")]
    Shape {
        path: String,
        #[source]
        source: HashError,
    },
}

impl ImageLoadError {
    pub fn path(&self) -> &str {
        match self {
            ImageLoadError::Missing { path }
            | ImageLoadError::Decode { path, .. }
            | ImageLoadError::Shape { path, .. } => path,
        }
    }
}

/// Resampling filter used when shrinking an image to the 8x8 grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    #[default]
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Source of 8x8 grayscale grids for image paths.
pub trait GridLoader: Send + Sync {
    fn load_grid(&self, path: &Path) -> Result<PixelGrid, ImageLoadError>;

    /// Load `path` and fingerprint it, tagging the result with the path.
    fn fingerprint(
        &self,
        hasher: &DifferenceHasher,
        path: &Path,
    ) -> Result<ImageFingerprint, ImageLoadError> {
        let grid = self.load_grid(path)?;
        Ok(hasher.fingerprint(&grid).with_path(path))
    }
}

/// Decodes images from disk with the `image` crate, forces them to 8x8 and
/// converts them to 8-bit grayscale.
pub struct ImageLoader {
    filter: ResizeFilter,
}

impl ImageLoader {
    pub fn new() -> Self {
        Self {
            filter: ResizeFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: ResizeFilter) -> Self {
        self.filter = filter;
        self
    }
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl GridLoader for ImageLoader {
    fn load_grid(&self, path: &Path) -> Result<PixelGrid, ImageLoadError> {
        let path_str = path.to_string_lossy().to_string();
        if !path.is_file() {
            return Err(ImageLoadError::Missing { path: path_str });
        }

        let img = image::open(path).map_err(|source| ImageLoadError::Decode {
            path: path_str.clone(),
            source,
        })?;

        let side = GRID_SIZE as u32;
        let luma = img.resize_exact(side, side, self.filter.into()).to_luma8();

        PixelGrid::from_luma(luma.width() as usize, luma.height() as usize, luma.as_raw())
            .map_err(|source| ImageLoadError::Shape {
                path: path_str,
                source,
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::distance::idhash_distance;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) fn create_test_image(
        path: &Path,
        width: u32,
        height: u32,
        seed: u32,
    ) -> Result<(), Box<dyn std::error::Error>> {
        use image::{ImageBuffer, Rgb};

        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x * 7 + y * 3 + seed * 31) % 256) as u8;
            let ripple = ((x ^ y).wrapping_mul(seed + 1) % 64) as u8;
            let value = intensity.wrapping_add(ripple);
            Rgb([value, value / 2, 255 - value])
        });

        img.save(path)?;
        Ok(())
    }

    #[test]
    fn test_load_grid_from_png() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sample.png");
        create_test_image(&path, 120, 80, 1).unwrap();

        let loader = ImageLoader::new();
        let grid = loader.load_grid(&path).unwrap();
        let fp = loader.fingerprint(&DifferenceHasher::new(), &path).unwrap();
        assert_eq!(fp.path.as_deref(), Some(path.as_path()));
        assert_eq!(DifferenceHasher::new().fingerprint(&grid).dx, fp.dx);
    }

    #[test]
    fn test_load_is_repeatable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sample.jpg");
        create_test_image(&path, 64, 64, 3).unwrap();

        let loader = ImageLoader::new().with_filter(ResizeFilter::Triangle);
        let first = loader.load_grid(&path).unwrap();
        let second = loader.load_grid(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_identical_images_have_zero_distance() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("1_a.png");
        let b = temp_dir.path().join("1_b.png");
        create_test_image(&a, 200, 150, 9).unwrap();
        fs::copy(&a, &b).unwrap();

        let hasher = DifferenceHasher::new();
        let loader = ImageLoader::new();
        let fp_a = loader.fingerprint(&hasher, &a).unwrap();
        let fp_b = loader.fingerprint(&hasher, &b).unwrap();
        assert_eq!(idhash_distance(&fp_a, &fp_b), 0);
    }

    #[test]
    fn test_missing_file() {
        let loader = ImageLoader::new();
        let result = loader.load_grid(Path::new("/non/existent/file.jpg"));
        match result {
            Err(ImageLoadError::Missing { path }) => assert!(path.ends_with("file.jpg")),
            other => panic!("expected Missing, got {other:?}"),
        }
    }

    #[test]
    fn test_undecodable_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("not_an_image.jpg");
        fs::write(&path, b"This is not an image file").unwrap();

        let result = ImageLoader::new().load_grid(&path);
        assert!(matches!(result, Err(ImageLoadError::Decode { .. })));
        assert!(result.unwrap_err().path().ends_with("not_an_image.jpg"));
    }
}
