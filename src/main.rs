use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use dialoguer::Confirm;
use idhash::core::corpus::{self, CorpusEvaluator, LoadFailurePolicy};
use idhash::core::datafile::{self, COLUMN_HEADER, DataFileWriter, format_row};
use idhash::core::distance::{DistanceMetric, MAX_DISTANCE};
use idhash::core::hash::DifferenceHasher;
use idhash::core::image::{GridLoader, ImageLoader, ResizeFilter};
use idhash::core::roc::{self, CalibrationRecord, RocCalibrator, ThresholdRange};
use idhash::core::stats::TrialStatistics;
use log::LevelFilter;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "idhash",
    version,
    about = "Importance-weighted difference hashing and duplicate threshold calibration"
)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Hide progress bars
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Copy)]
struct HashOptions {
    /// Distance metric
    #[arg(long, value_enum, default_value_t = DistanceMetric::IdHash)]
    metric: DistanceMetric,

    /// Resampling filter used to shrink images to 8x8
    #[arg(long, value_enum, default_value_t = ResizeFilter::Lanczos3)]
    filter: ResizeFilter,
}

impl HashOptions {
    fn trial_statistics(self) -> TrialStatistics<ImageLoader> {
        TrialStatistics::new(ImageLoader::new().with_filter(self.filter)).with_metric(self.metric)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the fingerprint of one image
    Hash {
        /// Image to hash
        image: PathBuf,
        /// Also draw the hash and importance masks as 8x8 grids
        #[arg(long)]
        grid: bool,
        /// Print JSON instead of text
        #[arg(long, conflicts_with = "grid")]
        json: bool,
        /// Resampling filter used to shrink the image to 8x8
        #[arg(long, value_enum, default_value_t = ResizeFilter::Lanczos3)]
        filter: ResizeFilter,
    },

    /// Distance between two images
    Distance {
        image_a: PathBuf,
        image_b: PathBuf,
        #[command(flatten)]
        options: HashOptions,
    },

    /// Hash an image pair repeatedly and summarize the distances
    Stats {
        image_a: PathBuf,
        image_b: PathBuf,
        /// Number of trials
        #[arg(short, long, default_value_t = 10)]
        trials: usize,
        /// Also write the row to this data file
        #[arg(long, value_name = "FILE")]
        data_file: Option<PathBuf>,
        /// Include the raw per-trial distances
        #[arg(long)]
        show_data: bool,
        /// Print JSON instead of a data row
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        options: HashOptions,
    },

    /// Evaluate every numbered pair `{i}_a.jpg` / `{i}_b.jpg` of a directory
    Evaluate {
        /// Directory holding the numbered pairs
        target_dir: PathBuf,
        /// Data file to write
        data_file: PathBuf,
        /// Number of pairs, counted from 1
        n_files: usize,
        /// Trials per pair
        n_trials: usize,
        /// Include the raw per-trial distances in each row
        #[arg(long)]
        show_data: bool,
        /// Log and skip pairs whose images cannot be decoded
        #[arg(long)]
        skip_unreadable: bool,
        /// Overwrite an existing data file without asking
        #[arg(short, long)]
        yes: bool,
        #[command(flatten)]
        options: HashOptions,
    },

    /// Count JPEGs and complete numbered pairs in a directory
    Census {
        /// Directory to inspect
        dir: PathBuf,
    },

    /// ROC analysis over duplicate and non-duplicate data files
    Roc {
        #[command(subcommand)]
        command: RocCmd,
    },
}

#[derive(Args, Debug)]
struct DataFiles {
    /// Duplicates data file (default: ~/idhash/duplicates.dat)
    duplicates: Option<PathBuf>,
    /// Non-duplicates data file (default: ~/idhash/non-duplicates.dat)
    non_duplicates: Option<PathBuf>,
}

impl DataFiles {
    fn calibrator(self) -> Result<RocCalibrator> {
        let duplicates = match self.duplicates {
            Some(path) => path,
            None => default_data_dir()?.join("duplicates.dat"),
        };
        let non_duplicates = match self.non_duplicates {
            Some(path) => path,
            None => default_data_dir()?.join("non-duplicates.dat"),
        };
        Ok(RocCalibrator::new(duplicates, non_duplicates))
    }
}

#[derive(Subcommand, Debug)]
enum RocCmd {
    /// FPR and TPR at a single threshold
    Point {
        threshold: u32,
        #[command(flatten)]
        files: DataFiles,
    },

    /// Write the ROC curve as a plot file
    Curve {
        #[command(flatten)]
        files: DataFiles,
        /// Half-open threshold range (default: derived from the data)
        #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"])]
        range: Option<Vec<u32>>,
        /// Plot file to write (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Find the threshold closest to the perfect classifier
    Threshold {
        #[command(flatten)]
        files: DataFiles,
        /// Half-open threshold range (default: derived from the data)
        #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"])]
        range: Option<Vec<u32>>,
        /// Append the result to this JSON-lines calibration history
        #[arg(long, value_name = "FILE")]
        record: Option<PathBuf>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Hash {
            image,
            grid,
            json,
            filter,
        } => {
            let loader = ImageLoader::new().with_filter(filter);
            let fp = loader
                .fingerprint(&DifferenceHasher::new(), &image)
                .with_context(|| format!("Failed to hash {}", image.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&fp)?);
            } else {
                println!("{} {}", image.display(), fp);
                if grid {
                    let masks = [("dx", fp.dx), ("dy", fp.dy), ("ix", fp.ix), ("iy", fp.iy)];
                    for (label, bits) in masks {
                        println!("\n{label}:");
                        print!("{}", bits.render_grid());
                    }
                }
            }
        }

        Commands::Distance {
            image_a,
            image_b,
            options,
        } => {
            let loader = ImageLoader::new().with_filter(options.filter);
            let hasher = DifferenceHasher::new();
            let a = loader.fingerprint(&hasher, &image_a)?;
            let b = loader.fingerprint(&hasher, &image_b)?;
            let distance = options.metric.distance(&a, &b);
            println!(
                "▶ {} ↔ {}: {} / {} ({:?})",
                image_a.display(),
                image_b.display(),
                distance,
                MAX_DISTANCE,
                options.metric
            );
        }

        Commands::Stats {
            image_a,
            image_b,
            trials,
            data_file,
            show_data,
            json,
            options,
        } => {
            if data_file.is_some() {
                for path in [&image_a, &image_b] {
                    datafile::check_path(&path.to_string_lossy())?;
                }
            }

            let mut stats = options
                .trial_statistics()
                .run(&image_a, &image_b, trials)
                .with_context(|| {
                    format!("Failed to evaluate {} and {}", image_a.display(), image_b.display())
                })?;
            if !show_data {
                stats = stats.without_samples();
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{COLUMN_HEADER}");
                println!("{}", format_row(&stats, show_data));
            }

            if let Some(path) = data_file {
                ensure_parent_dir(&path)?;
                let mut writer = DataFileWriter::create(&path, 1, trials)?;
                writer.write_row(&stats, show_data)?;
                writer.finish()?;
                println!("✅ Wrote {}", path.display());
            }
        }

        Commands::Evaluate {
            target_dir,
            data_file,
            n_files,
            n_trials,
            show_data,
            skip_unreadable,
            yes,
            options,
        } => {
            if data_file.exists() && !yes && !confirm_overwrite(&data_file)? {
                println!("Aborted; {} left unchanged.", data_file.display());
                return Ok(());
            }
            ensure_parent_dir(&data_file)?;

            let policy = if skip_unreadable {
                LoadFailurePolicy::Skip
            } else {
                LoadFailurePolicy::Abort
            };
            println!(
                "▶ Evaluating {} pair(s) in {} ({} trial(s) each)",
                n_files,
                target_dir.display(),
                n_trials
            );
            let summary = CorpusEvaluator::new(options.trial_statistics())
                .with_policy(policy)
                .with_show_data(show_data)
                .with_progress(!cli.quiet)
                .evaluate(&target_dir, &data_file, n_files, n_trials)
                .with_context(|| format!("Evaluation of {} failed", target_dir.display()))?;

            println!(
                "✅ Wrote {} row(s) to {}",
                summary.written,
                data_file.display()
            );
            if !summary.skipped.is_empty() {
                println!(
                    "⚠️  Skipped {} unreadable pair(s): {:?}",
                    summary.skipped.len(),
                    summary.skipped
                );
            }
        }

        Commands::Census { dir } => {
            let census = corpus::census(&dir)
                .with_context(|| format!("Failed to inspect {}", dir.display()))?;
            println!("▶ {}", dir.display());
            println!("   JPEG files:     {}", census.jpegs);
            println!("   complete pairs: {}", census.complete_pairs);
        }

        Commands::Roc { command } => match command {
            RocCmd::Point { threshold, files } => {
                let point = files.calibrator()?.compute_point(threshold)?;
                println!(
                    "threshold {}: fpr {:.6}, tpr {:.6}",
                    point.threshold, point.fpr, point.tpr
                );
            }

            RocCmd::Curve {
                files,
                range,
                output,
            } => {
                let calibrator = files.calibrator()?;
                let range = resolve_range(&calibrator, range)?;
                let points = calibrator.curve(range)?;

                match output {
                    Some(path) => {
                        ensure_parent_dir(&path)?;
                        let file = File::create(&path)
                            .with_context(|| format!("Failed to create {}", path.display()))?;
                        let mut out = BufWriter::new(file);
                        roc::write_curve(&mut out, &points)?;
                        out.flush()?;
                        println!(
                            "✅ Wrote {} point(s) for [{}, {}) to {}",
                            points.len(),
                            range.low,
                            range.high,
                            path.display()
                        );
                        if let Some(area) = roc::auc(&points) {
                            println!("   AUC {area:.4}");
                        }
                    }
                    None => {
                        let stdout = io::stdout();
                        roc::write_curve(&mut stdout.lock(), &points)?;
                    }
                }
            }

            RocCmd::Threshold {
                files,
                range,
                record,
                json,
            } => {
                let calibrator = files.calibrator()?;
                let range = resolve_range(&calibrator, range)?;
                let Some(best) = calibrator.optimal_threshold(range)? else {
                    println!("No thresholds in [{}, {})", range.low, range.high);
                    return Ok(());
                };
                let area = roc::auc(&calibrator.curve(range)?);
                let summary = CalibrationRecord::new(&calibrator, range, best, area);

                if json {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                } else {
                    println!("▶ Range [{}, {})", range.low, range.high);
                    println!(
                        "   🏆 Optimal threshold {} (fpr {:.6}, tpr {:.6})",
                        best.threshold, best.fpr, best.tpr
                    );
                    if let Some(area) = area {
                        println!("   AUC {area:.4}");
                    }
                }

                if let Some(path) = record {
                    ensure_parent_dir(&path)?;
                    summary.append_to(&path)?;
                    if !json {
                        println!("✅ Recorded calibration in {}", path.display());
                    }
                }
            }
        },
    }

    Ok(())
}

/// Install env_logger; `RUST_LOG` overrides the `-v` level.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// `~/idhash`, home of the default data files.
fn default_data_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join("idhash"))
        .context("Could not determine the home directory; pass the data files explicitly")
}

/// Use the explicit `--range LOW HIGH`, or derive one covering both files.
fn resolve_range(calibrator: &RocCalibrator, range: Option<Vec<u32>>) -> Result<ThresholdRange> {
    match range.as_deref() {
        Some(&[low, high]) => Ok(ThresholdRange::new(low, high)),
        Some(other) => anyhow::bail!("--range takes LOW and HIGH, got {:?}", other),
        None => {
            let derived = calibrator.derive_range()?;
            log::info!("Derived threshold range [{}, {})", derived.low, derived.high);
            Ok(derived)
        }
    }
}

fn confirm_overwrite(path: &Path) -> Result<bool> {
    Confirm::new()
        .with_prompt(format!("{} already exists. Overwrite?", path.display()))
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    Ok(())
}
