use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use imgroup::config::GroupingConfig;
use imgroup::core::cluster::Group;
use imgroup::core::histogram::ColorHistogram;
use imgroup::core::image::{FileDecoder, ImageSource};
use imgroup::core::pipeline::{self, ExtractionFailure};
use imgroup::core::similarity::ColorDistance;
use imgroup::discovery;
use imgroup::output::{self, GroupReport, TransferMode};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "imgroup", version, about = "Group images by color similarity")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Find groups of similar images
    Scan {
        /// Directories, image files or glob patterns
        #[arg(required = true, value_name = "INPUT")]
        inputs: Vec<String>,

        /// Glob pattern of paths to skip (repeatable)
        #[arg(short, long, value_name = "PATTERN")]
        exclude: Vec<String>,

        /// Copy grouped files into `<DIR>/group_0001`, ... and `<DIR>/remainder`
        #[arg(short, long, value_name = "DIR")]
        dest: Option<PathBuf>,

        /// Move files into `--dest` instead of copying
        #[arg(long = "move", requires = "dest")]
        move_files: bool,

        /// Only show where files would be placed
        #[arg(long, requires = "dest")]
        dry_run: bool,

        /// Write a JSON report to this file
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,

        /// Print the JSON report to stdout instead of the listing
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        tuning: TuningArgs,
    },

    /// Print the similarity score of two images
    Compare {
        #[arg(value_name = "A")]
        a: String,

        #[arg(value_name = "B")]
        b: String,

        #[command(flatten)]
        tuning: TuningArgs,
    },
}

/// Overrides on top of the loaded config file.
#[derive(Args, Debug)]
struct TuningArgs {
    /// Config file (default: `<config dir>/imgroup/config.json` if present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Minimum similarity in [0, 1] for joining a group
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Parallel decode workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Lattice points per color channel
    #[arg(long)]
    steps: Option<u16>,

    /// Maximum histogram bins kept per image
    #[arg(long)]
    top_k: Option<usize>,

    #[arg(long, value_enum)]
    distance: Option<ColorDistance>,

    /// Exponent sharpening per-color similarity
    #[arg(long)]
    power: Option<u32>,

    /// Downsize so neither side exceeds this many pixels
    #[arg(long, value_name = "PX")]
    max_dimension: Option<u32>,

    /// Decode at full resolution
    #[arg(long, conflicts_with = "max_dimension")]
    full_size: bool,
}

impl TuningArgs {
    fn resolve(&self) -> Result<GroupingConfig> {
        let mut config = GroupingConfig::load_or_default(self.config.as_deref())
            .context("Failed to load configuration")?;

        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(steps) = self.steps {
            config.steps = steps;
        }
        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
        if let Some(distance) = self.distance {
            config.distance = distance;
        }
        if let Some(power) = self.power {
            config.power = power;
        }
        if let Some(max_dimension) = self.max_dimension {
            config.max_dimension = Some(max_dimension);
        }
        if self.full_size {
            config.max_dimension = None;
        }

        config.validate().context("Invalid configuration")?;
        log::debug!("Effective config: {:?}", config);
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Scan {
            inputs,
            exclude,
            dest,
            move_files,
            dry_run,
            report,
            json,
            tuning,
        } => {
            let config = tuning.resolve()?;
            let mode = if move_files {
                TransferMode::Move
            } else {
                TransferMode::Copy
            };
            scan(
                &config,
                &inputs,
                &exclude,
                dest.as_deref(),
                mode,
                dry_run,
                report.as_deref(),
                json,
            )?;
        }

        Commands::Compare { a, b, tuning } => {
            let config = tuning.resolve()?;
            let score = compare(&config, &a, &b)?;
            println!("{:.6}", score);
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[allow(clippy::too_many_arguments)]
fn scan(
    config: &GroupingConfig,
    inputs: &[String],
    exclude: &[String],
    dest: Option<&Path>,
    mode: TransferMode,
    dry_run: bool,
    report_path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let sources = benchmark("discovery", || find_images(inputs, exclude))?;

    let (groups, failures) = if sources.is_empty() {
        if !json {
            println!("No images found.");
        }
        (config.clusterer()?.cluster(Vec::new())?, Vec::new())
    } else {
        if !json {
            println!("▶ Extracting color features from {} image(s)…", sources.len());
        }
        group(config, &sources)?
    };

    let report = GroupReport::new(config, &groups, &failures);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_groups(&groups);
        print_failures(&failures);
    }

    if let Some(dest) = dest {
        place(&groups, dest, mode, dry_run, json)?;
    }

    if let Some(path) = report_path {
        report
            .write_report(path)
            .with_context(|| format!("Failed to write report {:?}", path))?;
        if !json {
            println!("\n✅ Wrote report to {}", path.display());
        }
    }

    Ok(())
}

fn find_images(inputs: &[String], exclude: &[String]) -> Result<Vec<String>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning for images…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let sources = discovery::discover(inputs, exclude).context("Failed to discover images")?;

    spinner.finish_and_clear();
    Ok(sources)
}

fn group(config: &GroupingConfig, sources: &[String]) -> Result<(Vec<Group>, Vec<ExtractionFailure>)> {
    let progress = ProgressBar::new(sources.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    progress.set_message("extracting");

    let decoder = FileDecoder::new(config.max_dimension);
    let outcome = benchmark("feature extraction and clustering", || {
        pipeline::group_with_source(config, decoder, sources, Some(progress.clone()))
    });
    progress.finish_and_clear();
    let outcome = outcome.context("Grouping failed")?;

    Ok((outcome.groups, outcome.failures))
}

fn print_groups(groups: &[Group]) {
    let (remainder, grouped) = match groups.split_last() {
        Some((last, rest)) if last.is_remainder() => (Some(last), rest),
        _ => (None, groups),
    };

    if grouped.is_empty() {
        println!("No similar images found.");
    } else {
        println!("Found {} group(s):", grouped.len());
    }

    for (i, group) in grouped.iter().enumerate() {
        println!("\n✨ Group {}:", i + 1);
        for (j, member) in group.members.iter().enumerate() {
            let marker = if j == 0 { "🏆" } else { "  " };
            println!("   {} {:.4}  {}", marker, member.score, member.source_id);
        }
    }

    if let Some(remainder) = remainder.filter(|r| !r.is_empty()) {
        println!("\n📦 Remainder ({} image(s)):", remainder.len());
        for member in &remainder.members {
            println!("      {:.4}  {}", member.score, member.source_id);
        }
    }
}

fn print_failures(failures: &[ExtractionFailure]) {
    if failures.is_empty() {
        return;
    }
    println!("\n⚠️  Excluded {} file(s):", failures.len());
    for failure in failures {
        println!("   ✖ {}: {}", failure.source_id, failure.reason);
    }
}

fn place(groups: &[Group], dest: &Path, mode: TransferMode, dry_run: bool, json: bool) -> Result<()> {
    let verb = match mode {
        TransferMode::Copy => "COPY",
        TransferMode::Move => "MOVE",
    };

    if dry_run {
        let plan = output::plan_placements(groups, dest)?;
        for placed in &plan {
            let line = format!(
                "[dry-run] {} {} → {}",
                verb,
                placed.source.display(),
                placed.destination.display()
            );
            // stdout carries only the report in JSON mode
            if json {
                log::info!("{}", line);
            } else {
                println!("   📦 {}", line);
            }
        }
        if !json {
            println!("\n⚠️  Dry-run only; no files were changed.");
        }
        return Ok(());
    }

    let placed = output::materialize(groups, dest, mode)
        .with_context(|| format!("Failed to place groups under {:?}", dest))?;
    if !json {
        println!("\n✅ Placed {} file(s) under {}", placed.len(), dest.display());
    }
    Ok(())
}

fn compare(config: &GroupingConfig, a: &str, b: &str) -> Result<f64> {
    let decoder = FileDecoder::new(config.max_dimension);
    let extractor = config.extractor()?;
    let metric = config.metric();

    let histogram = |source: &str| -> Result<ColorHistogram> {
        let image = decoder
            .load(source)
            .with_context(|| format!("Failed to load {}", source))?;
        extractor
            .extract(&image)
            .with_context(|| format!("Failed to extract features from {}", source))
    };

    let (ha, hb) = (histogram(a)?, histogram(b)?);
    log::debug!("{}: {} bin(s), {}: {} bin(s)", a, ha.len(), b, hb.len());
    Ok(metric.score(&ha, &hb))
}

fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::info!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
