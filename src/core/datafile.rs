// Text data files produced by corpus runs and consumed by ROC calibration.
//
//   files: <n_files>
//   trials: <n_trials>
//   path_a path_b min max mean variance std_dev rel_std_dev
//   <path_a> <path_b> <min> <max> <mean> <variance> <std_dev> <rel_std_dev> [<d1> ... <dn>]
//
// Floating-point columns carry two decimals. Paths must not contain
// whitespace since columns are space-separated.

use crate::core::distance::MAX_DISTANCE;
use crate::core::stats::{PairStatistics, SENTINEL};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const COLUMN_HEADER: &str = "path_a path_b min max mean variance std_dev rel_std_dev";

const STAT_COLUMNS: usize = 8;

#[derive(Debug, Error)]
pub enum DataFileError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Malformed header in {path} at line {line}: {message}")]
    Header {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Malformed row in {path} at line {line}: {message}")]
    Row {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Path contains whitespace and cannot be stored in a data file: {path}")]
    Whitespace { path: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFileHeader {
    pub files: usize,
    pub trials: usize,
}

/// A fully parsed data file.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    pub header: DataFileHeader,
    pub rows: Vec<PairStatistics>,
}

impl DataFile {
    pub fn read(path: &Path) -> Result<Self, DataFileError> {
        let label = path.to_string_lossy().to_string();
        let file = File::open(path).map_err(|source| DataFileError::Io {
            path: label.clone(),
            source,
        })?;
        Self::from_reader(BufReader::new(file), &label)
    }

    /// Parse a data file from any buffered reader; `label` names the source
    /// in error messages.
    pub fn from_reader<R: BufRead>(reader: R, label: &str) -> Result<Self, DataFileError> {
        let header_err = |line: usize, message: String| DataFileError::Header {
            path: label.to_string(),
            line,
            message,
        };

        let mut lines = reader.lines().enumerate();
        let mut next_line = |line: usize, expected: &str| -> Result<String, DataFileError> {
            match lines.next() {
                Some((_, Ok(text))) => Ok(text),
                Some((_, Err(source))) => Err(DataFileError::Io {
                    path: label.to_string(),
                    source,
                }),
                None => Err(header_err(line, format!("missing {expected} line"))),
            }
        };

        let text = next_line(1, "files")?;
        let files = parse_header_field(&text, "files").map_err(|m| header_err(1, m))?;
        let text = next_line(2, "trials")?;
        let trials = parse_header_field(&text, "trials").map_err(|m| header_err(2, m))?;
        let text = next_line(3, "column header")?;
        if text.split_whitespace().collect::<Vec<_>>().join(" ") != COLUMN_HEADER {
            return Err(header_err(3, format!("expected column header, found {text:?}")));
        }

        let header = DataFileHeader { files, trials };
        let mut rows = Vec::new();
        for (i, line) in lines {
            let text = line.map_err(|source| DataFileError::Io {
                path: label.to_string(),
                source,
            })?;
            if text.trim().is_empty() {
                continue;
            }
            let row = parse_row(&text, trials).map_err(|message| DataFileError::Row {
                path: label.to_string(),
                line: i + 1,
                message,
            })?;
            rows.push(row);
        }

        if rows.len() != files {
            log::warn!(
                "{}: header records {} file pair(s) but {} row(s) were read",
                label,
                files,
                rows.len()
            );
        }

        Ok(Self { header, rows })
    }

    /// Mean distances of all rows, in file order.
    pub fn means(&self) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(|row| row.mean)
    }
}

fn parse_header_field(text: &str, key: &str) -> Result<usize, String> {
    let value = text
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(|| format!("expected \"{key}: <n>\", found {text:?}"))?;
    value
        .trim()
        .parse()
        .map_err(|e| format!("invalid {key} count {:?}: {e}", value.trim()))
}

/// Parse one data row. Raw samples, when present, must number exactly
/// `trials`.
pub fn parse_row(line: &str, trials: usize) -> Result<PairStatistics, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < STAT_COLUMNS {
        return Err(format!(
            "expected at least {STAT_COLUMNS} columns, found {}",
            fields.len()
        ));
    }

    let int = |i: usize, name: &str| -> Result<u32, String> {
        fields[i]
            .parse()
            .map_err(|e| format!("invalid {name} {:?}: {e}", fields[i]))
    };
    let float = |i: usize, name: &str| -> Result<f64, String> {
        fields[i]
            .parse()
            .map_err(|e| format!("invalid {name} {:?}: {e}", fields[i]))
    };

    let samples = fields[STAT_COLUMNS..]
        .iter()
        .map(|s| s.parse().map_err(|e| format!("invalid distance {s:?}: {e}")))
        .collect::<Result<Vec<u32>, String>>()?;
    if !samples.is_empty() && samples.len() != trials {
        return Err(format!(
            "expected {trials} raw distances, found {}",
            samples.len()
        ));
    }

    if let Some(s) = samples.iter().find(|&&s| s > MAX_DISTANCE) {
        return Err(format!("distance {s} exceeds {MAX_DISTANCE}"));
    }

    let max_distance = MAX_DISTANCE as f64;
    let stats = PairStatistics {
        path_a: fields[0].to_string(),
        path_b: fields[1].to_string(),
        min: int(2, "min")?,
        max: int(3, "max")?,
        mean: bounded(float(4, "mean")?, "mean", 0.0, max_distance)?,
        variance: bounded(
            float(5, "variance")?,
            "variance",
            0.0,
            max_distance * max_distance,
        )?,
        std_dev: bounded(float(6, "std_dev")?, "std_dev", 0.0, max_distance)?,
        rel_std_dev: bounded(float(7, "rel_std_dev")?, "rel_std_dev", SENTINEL, f64::MAX)?,
        samples,
    };
    if stats.min > stats.max || stats.max > MAX_DISTANCE {
        return Err(format!(
            "min {} and max {} must satisfy min <= max <= {MAX_DISTANCE}",
            stats.min, stats.max
        ));
    }
    Ok(stats)
}

/// Reject non-finite values and values outside `low..=high`.
fn bounded(value: f64, name: &str, low: f64, high: f64) -> Result<f64, String> {
    if value.is_finite() && (low..=high).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{name} {value} is outside {low}..={high}"))
    }
}

/// Fail unless `path` can be stored as a single data-file column.
pub fn check_path(path: &str) -> Result<(), DataFileError> {
    if path.is_empty() || path.chars().any(char::is_whitespace) {
        return Err(DataFileError::Whitespace {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Format one data row, optionally followed by the raw distances. Paths are
/// not checked here; [`DataFileWriter::write_row`] refuses unstorable ones.
pub fn format_row(stats: &PairStatistics, show_data: bool) -> String {
    let mut row = format!(
        "{} {} {} {} {:.2} {:.2} {:.2} {:.2}",
        stats.path_a,
        stats.path_b,
        stats.min,
        stats.max,
        stats.mean,
        stats.variance,
        stats.std_dev,
        stats.rel_std_dev
    );
    if show_data {
        for sample in &stats.samples {
            row.push(' ');
            row.push_str(&sample.to_string());
        }
    }
    row
}

/// Writes a data file one row at a time, flushing after each row so an
/// interrupted run leaves a readable file. The file is closed on drop.
pub struct DataFileWriter<W: Write> {
    out: W,
    label: String,
    header: DataFileHeader,
    rows: usize,
}

impl DataFileWriter<BufWriter<File>> {
    pub fn create(path: &Path, files: usize, trials: usize) -> Result<Self, DataFileError> {
        let file = File::create(path).map_err(|source| DataFileError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        })?;
        Self::new(BufWriter::new(file), path.to_path_buf(), files, trials)
    }
}

impl<W: Write> DataFileWriter<W> {
    /// Wrap `out` and write the three header lines.
    pub fn new(
        out: W,
        label: impl Into<PathBuf>,
        files: usize,
        trials: usize,
    ) -> Result<Self, DataFileError> {
        let mut writer = Self {
            out,
            label: label.into().to_string_lossy().to_string(),
            header: DataFileHeader { files, trials },
            rows: 0,
        };
        let header = format!("files: {files}\ntrials: {trials}\n{COLUMN_HEADER}\n");
        writer.write_all(header.as_bytes())?;
        Ok(writer)
    }

    pub fn header(&self) -> DataFileHeader {
        self.header
    }

    pub fn write_row(
        &mut self,
        stats: &PairStatistics,
        show_data: bool,
    ) -> Result<(), DataFileError> {
        check_path(&stats.path_a)?;
        check_path(&stats.path_b)?;
        let mut row = format_row(stats, show_data);
        row.push('\n');
        self.write_all(row.as_bytes())?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and return the number of rows written.
    pub fn finish(mut self) -> Result<usize, DataFileError> {
        self.out.flush().map_err(|source| DataFileError::Io {
            path: self.label.clone(),
            source,
        })?;
        Ok(self.rows)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), DataFileError> {
        self.out
            .write_all(bytes)
            .and_then(|_| self.out.flush())
            .map_err(|source| DataFileError::Io {
                path: self.label.clone(),
                source,
            })
    }
}
