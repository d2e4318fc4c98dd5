use crate::core::datafile::{self, DataFileError, DataFileWriter};
use crate::core::image::GridLoader;
use crate::core::stats::{StatsError, TrialStatistics};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const JPEG_EXTENSIONS: [&str; 4] = ["jpg", "JPG", "jpeg", "JPEG"];

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("Missing image for pair {index}: {path}")]
    MissingFile { index: usize, path: String },

    #[error("Pair {index} failed: {source}")]
    Pair {
        index: usize,
        #[source]
        source: StatsError,
    },

    #[error("Trial count must be at least 1, got {0}")]
    InvalidTrialCount(usize),

    #[error("Data file error: {0}")]
    DataFile(#[from] DataFileError),

    #[error("Directory traversal error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// What to do when an existing image in a pair cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadFailurePolicy {
    /// Abort the whole run.
    #[default]
    Abort,
    /// Log the pair and continue with the next one.
    Skip,
}

/// Paths of pair `index` under `dir`: `{index}_a.jpg` and `{index}_b.jpg`.
pub fn pair_paths(dir: &Path, index: usize) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{index}_a.jpg")),
        dir.join(format!("{index}_b.jpg")),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub written: usize,
    pub skipped: Vec<usize>,
}

/// Runs trial statistics over every numbered pair of a corpus directory and
/// streams one data-file row per pair.
pub struct CorpusEvaluator<L> {
    trials: TrialStatistics<L>,
    policy: LoadFailurePolicy,
    show_data: bool,
    progress: bool,
}

impl<L: GridLoader> CorpusEvaluator<L> {
    pub fn new(trials: TrialStatistics<L>) -> Self {
        Self {
            trials,
            policy: LoadFailurePolicy::default(),
            show_data: false,
            progress: false,
        }
    }

    pub fn with_policy(mut self, policy: LoadFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Append the raw per-trial distances to each row.
    pub fn with_show_data(mut self, show_data: bool) -> Self {
        self.show_data = show_data;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Evaluate pairs `1..=n_files` in `dir`, writing `data_file`.
    ///
    /// A missing image is always fatal. Rows already written stay on disk
    /// when the run aborts. A directory whose pair paths cannot be stored in
    /// a data file is refused before `data_file` is touched.
    pub fn evaluate(
        &self,
        dir: &Path,
        data_file: &Path,
        n_files: usize,
        n_trials: usize,
    ) -> Result<EvaluationSummary, CorpusError> {
        if n_trials < 1 {
            return Err(CorpusError::InvalidTrialCount(n_trials));
        }
        if n_files > 0 {
            let (path_a, path_b) = pair_paths(dir, 1);
            datafile::check_path(&path_a.to_string_lossy())?;
            datafile::check_path(&path_b.to_string_lossy())?;
        }

        log::info!(
            "Evaluating {} pair(s) in {} with {} trial(s) each",
            n_files,
            dir.display(),
            n_trials
        );

        let mut writer = DataFileWriter::create(data_file, n_files, n_trials)?;
        let progress = self.progress_bar(n_files);
        let mut summary = EvaluationSummary::default();

        for index in 1..=n_files {
            let (path_a, path_b) = pair_paths(dir, index);
            for path in [&path_a, &path_b] {
                if !path.is_file() {
                    progress.abandon_with_message(format!("pair {index} missing"));
                    return Err(CorpusError::MissingFile {
                        index,
                        path: path.to_string_lossy().to_string(),
                    });
                }
            }

            progress.set_message(format!("{index}_a / {index}_b"));
            match self.trials.run(&path_a, &path_b, n_trials) {
                Ok(stats) => {
                    writer.write_row(&stats, self.show_data)?;
                    summary.written += 1;
                }
                Err(StatsError::ImageLoad(err)) if self.policy == LoadFailurePolicy::Skip => {
                    log::warn!("Skipping pair {}: {}", index, err);
                    summary.skipped.push(index);
                }
                Err(source) => {
                    progress.abandon_with_message(format!("pair {index} failed"));
                    return Err(CorpusError::Pair { index, source });
                }
            }
            progress.inc(1);
        }

        progress.finish_with_message("done");
        writer.finish()?;
        log::info!(
            "Wrote {} row(s) to {}, skipped {}",
            summary.written,
            data_file.display(),
            summary.skipped.len()
        );
        Ok(summary)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    }
}

/// JPEG count and usable pair count of a corpus directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusCensus {
    pub jpegs: usize,
    /// Length of the unbroken run of complete pairs starting at 1.
    pub complete_pairs: usize,
}

pub fn census(dir: &Path) -> Result<CorpusCensus, CorpusError> {
    let mut jpegs = 0;
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        let is_jpeg = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| JPEG_EXTENSIONS.contains(&ext));
        if entry.file_type().is_file() && is_jpeg {
            jpegs += 1;
        }
    }

    let mut complete_pairs = 0;
    loop {
        let (a, b) = pair_paths(dir, complete_pairs + 1);
        if !(a.is_file() && b.is_file()) {
            break;
        }
        complete_pairs += 1;
    }

    Ok(CorpusCensus {
        jpegs,
        complete_pairs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::datafile::DataFile;
    use crate::core::image::ImageLoader;
    use crate::core::image::tests::create_test_image;
    use std::fs;
    use tempfile::TempDir;

    fn build_corpus(dir: &Path, pairs: usize) {
        for index in 1..=pairs {
            let (a, b) = pair_paths(dir, index);
            create_test_image(&a, 64, 48, index as u32).unwrap();
            fs::copy(&a, &b).unwrap();
        }
    }

    fn evaluator() -> CorpusEvaluator<ImageLoader> {
        CorpusEvaluator::new(TrialStatistics::new(ImageLoader::new()))
    }

    #[test]
    fn test_pair_paths() {
        let (a, b) = pair_paths(Path::new("/corpus"), 12);
        assert_eq!(a, PathBuf::from("/corpus/12_a.jpg"));
        assert_eq!(b, PathBuf::from("/corpus/12_b.jpg"));
    }

    #[test]
    fn test_evaluate_writes_all_rows() {
        let temp_dir = TempDir::new().unwrap();
        build_corpus(temp_dir.path(), 3);
        let data_path = temp_dir.path().join("duplicates.dat");

        let summary = evaluator()
            .with_show_data(true)
            .evaluate(temp_dir.path(), &data_path, 3, 2)
            .unwrap();
        assert_eq!(summary.written, 3);
        assert!(summary.skipped.is_empty());

        let data = DataFile::read(&data_path).unwrap();
        assert_eq!(data.header.files, 3);
        assert_eq!(data.header.trials, 2);
        assert_eq!(data.rows.len(), 3);
        for (i, row) in data.rows.iter().enumerate() {
            assert!(row.path_a.ends_with(&format!("{}_a.jpg", i + 1)));
            assert_eq!(row.mean, 0.0);
            assert_eq!(row.samples, vec![0, 0]);
        }
    }

    #[test]
    fn test_missing_file_aborts_and_keeps_partial_rows() {
        let temp_dir = TempDir::new().unwrap();
        build_corpus(temp_dir.path(), 3);
        fs::remove_file(pair_paths(temp_dir.path(), 2).1).unwrap();
        let data_path = temp_dir.path().join("partial.dat");

        let result = evaluator().evaluate(temp_dir.path(), &data_path, 3, 1);
        assert!(matches!(result, Err(CorpusError::MissingFile { index: 2, .. })));

        let data = DataFile::read(&data_path).unwrap();
        assert_eq!(data.rows.len(), 1);
    }

    #[test]
    fn test_missing_file_fatal_even_when_skipping() {
        let temp_dir = TempDir::new().unwrap();
        build_corpus(temp_dir.path(), 1);
        let data_path = temp_dir.path().join("out.dat");

        let result = evaluator()
            .with_policy(LoadFailurePolicy::Skip)
            .evaluate(temp_dir.path(), &data_path, 2, 1);
        assert!(matches!(result, Err(CorpusError::MissingFile { index: 2, .. })));
    }

    #[test]
    fn test_undecodable_pair_policy() {
        let temp_dir = TempDir::new().unwrap();
        build_corpus(temp_dir.path(), 3);
        fs::write(pair_paths(temp_dir.path(), 2).0, b"not a jpeg").unwrap();
        let data_path = temp_dir.path().join("out.dat");

        let result = evaluator().evaluate(temp_dir.path(), &data_path, 3, 1);
        assert!(matches!(
            result,
            Err(CorpusError::Pair {
                index: 2,
                source: StatsError::ImageLoad(_)
            })
        ));

        let summary = evaluator()
            .with_policy(LoadFailurePolicy::Skip)
            .evaluate(temp_dir.path(), &data_path, 3, 1)
            .unwrap();
        assert_eq!(summary.written, 2);
        assert_eq!(summary.skipped, vec![2]);
        assert_eq!(DataFile::read(&data_path).unwrap().rows.len(), 2);
    }

    #[test]
    fn test_zero_trials_rejected_before_writing() {
        let temp_dir = TempDir::new().unwrap();
        let data_path = temp_dir.path().join("never.dat");

        let result = evaluator().evaluate(temp_dir.path(), &data_path, 1, 0);
        assert!(matches!(result, Err(CorpusError::InvalidTrialCount(0))));
        assert!(!data_path.exists());
    }

    #[test]
    fn test_whitespace_dir_leaves_data_file_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let corpus_dir = temp_dir.path().join("my photos");
        fs::create_dir(&corpus_dir).unwrap();
        build_corpus(&corpus_dir, 1);
        let data_path = temp_dir.path().join("out.dat");
        fs::write(&data_path, "previous results").unwrap();

        let result = evaluator().evaluate(&corpus_dir, &data_path, 1, 3);
        assert!(matches!(
            result,
            Err(CorpusError::DataFile(DataFileError::Whitespace { .. }))
        ));
        assert_eq!(fs::read_to_string(&data_path).unwrap(), "previous results");
    }

    #[test]
    fn test_census() {
        let temp_dir = TempDir::new().unwrap();
        build_corpus(temp_dir.path(), 4);
        fs::remove_file(pair_paths(temp_dir.path(), 3).0).unwrap();
        fs::write(temp_dir.path().join("extra.JPEG"), b"x").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(temp_dir.path().join("nested.jpg")).unwrap();

        let result = census(temp_dir.path()).unwrap();
        assert_eq!(result.jpegs, 8);
        assert_eq!(result.complete_pairs, 2);
    }
}
