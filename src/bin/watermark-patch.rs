use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use watermark_patch_repair::pairing::{self, InputFile};
use watermark_patch_repair::{
    process_batch, BatchReport, ContainerReader, DetectorRegistry, DetectorSpec, DirContainer,
    Error, FileConfig, RepairConfig, RepairMode, Result, ZipReader, ZipSink,
};

#[derive(Parser)]
#[command(
    name = "watermark-patch",
    about = "Repair watermarked images with patches from clean low-resolution originals",
    version,
    after_help = "Pairs are matched by name: '<id>-wm.<ext>' is repaired from '<id>-orig.<ext>'.\n\
                  Use the 'pair' subcommand to produce these names from a loose set of files."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Repair every watermarked/original pair in a zip archive or directory
    Repair(RepairArgs),
    /// Pair loose files by time and size and name them '<id>-wm' / '<id>-orig'
    Pair(PairArgs),
}

#[derive(Args)]
struct RepairArgs {
    /// Input zip archive or directory
    input: PathBuf,

    /// Output zip archive (*.zip) or directory
    #[arg(short, long)]
    output: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Watermark style
    #[arg(short, long, value_enum)]
    mode: Option<RepairMode>,

    /// Detection confidence threshold (0.0-1.0)
    #[arg(short, long)]
    threshold: Option<f32>,

    /// Search region ratios: x0,y0,x1,y1
    #[arg(long, value_delimiter = ',')]
    search_region: Option<Vec<f32>>,

    /// Horizontal expansion ratio (boxed mode)
    #[arg(long)]
    width_expansion: Option<f32>,

    /// Vertical expansion ratio
    #[arg(long)]
    height_expansion: Option<f32>,

    /// Fixed margin around detections, in pixels
    #[arg(long)]
    base_margin: Option<u32>,

    /// External detector program (region PNG on stdin, JSON boxes on stdout)
    #[arg(long)]
    detector_command: Option<PathBuf>,

    /// Time limit in seconds for --detector-command
    #[arg(long, default_value = "60")]
    detector_timeout: u64,

    /// Write the report to this file instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,

    /// Arguments for --detector-command, given after `--`
    #[arg(last = true, requires = "detector_command")]
    detector_args: Vec<String>,
}

#[derive(Args)]
struct PairArgs {
    /// Files to pair
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output zip archive
    #[arg(short, long)]
    output: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose && cli.quiet {
        eprintln!("Error: Cannot specify both --verbose and --quiet");
        process::exit(1);
    }
    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Repair(args) => run_repair(args, cli.quiet),
        Commands::Pair(args) => run_pair(args, cli.quiet).map(|()| true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_filter = if verbose {
        "watermark_patch_repair=debug"
    } else if quiet {
        "watermark_patch_repair=error"
    } else {
        "watermark_patch_repair=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Fold command-line overrides into the file configuration.
fn merge_overrides(mut file: FileConfig, args: &RepairArgs) -> Result<FileConfig> {
    if let Some(threshold) = args.threshold {
        file.confidence_threshold = Some(threshold);
    }
    if let Some(ratios) = &args.search_region {
        let ratios: [f32; 4] = ratios.as_slice().try_into().map_err(|_| {
            Error::InvalidConfig(format!(
                "--search-region needs 4 values (x0,y0,x1,y1), got {}",
                ratios.len()
            ))
        })?;
        file.search_region = Some(ratios);
    }
    if let Some(ratio) = args.width_expansion {
        file.width_expansion = Some(ratio);
    }
    if let Some(ratio) = args.height_expansion {
        file.height_expansion = Some(ratio);
    }
    if let Some(margin) = args.base_margin {
        file.base_margin = Some(margin);
    }
    if let Some(program) = &args.detector_command {
        if program.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("--detector-command is empty".to_string()));
        }
        let mode = args.mode.or(file.mode).unwrap_or(RepairMode::Boxed);
        file.detectors.insert(
            mode,
            DetectorSpec::Command {
                program: program.clone(),
                args: args.detector_args.clone(),
                timeout_secs: args.detector_timeout,
            },
        );
    }
    Ok(file)
}

fn run_repair(args: &RepairArgs, quiet: bool) -> Result<bool> {
    let file = match &args.config {
        Some(path) => FileConfig::load_from_path(path)?,
        None => FileConfig::default(),
    };
    let file = merge_overrides(file, args)?;
    let config = file.to_repair_config(args.mode)?;
    let detectors = DetectorRegistry::from_specs(&file.detectors);

    if !quiet {
        eprintln!("{}", banner(&config, args));
        eprintln!();
    }

    let mut reader: Box<dyn ContainerReader> = if args.input.is_dir() {
        Box::new(DirContainer::new(&args.input))
    } else {
        Box::new(ZipReader::new(fs::File::open(&args.input)?)?)
    };
    let progress = |msg: &str| {
        if !quiet {
            eprintln!("{msg}");
        }
    };

    let report = if is_zip(&args.output) {
        let sink = ZipSink::new(Cursor::new(Vec::new()));
        let (sink, report) =
            process_batch(reader.as_mut(), sink, &config, &detectors, &progress)?;
        fs::write(&args.output, sink.finish()?.into_inner())?;
        report
    } else {
        let out = DirContainer::new(&args.output);
        process_batch(reader.as_mut(), out, &config, &detectors, &progress)?.1
    };

    emit_report(&report, args.report.as_deref(), quiet)?;
    Ok(report.failure_count() == 0)
}

/// Startup line; the timeout is shown only when it applies.
fn banner(config: &RepairConfig, args: &RepairArgs) -> String {
    let mut line = format!(
        "Repairing in {} mode (threshold: {:.0}%",
        config.mode,
        config.confidence_threshold * 100.0
    );
    if args.detector_command.is_some() {
        line.push_str(&format!(
            ", detector timeout: {:?}",
            Duration::from_secs(args.detector_timeout)
        ));
    }
    line.push(')');
    line
}

fn emit_report(report: &BatchReport, path: Option<&Path>, quiet: bool) -> Result<()> {
    match path {
        Some(path) => fs::write(path, format!("{report}\n"))?,
        None => println!("{report}"),
    }
    if !quiet {
        eprintln!();
        eprint!("[Summary] Repaired: {}", report.success_count());
        if report.failure_count() > 0 {
            eprint!(", Failed: {}", report.failure_count());
        }
        eprintln!(" (Total: {})", report.lines.len());
    }
    Ok(())
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn run_pair(args: &PairArgs, quiet: bool) -> Result<()> {
    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string());
        files.push(InputFile {
            name,
            data: fs::read(path)?,
            modified: fs::metadata(path).and_then(|m| m.modified()).ok(),
        });
    }

    let mut sink = ZipSink::new(Cursor::new(Vec::new()));
    let report = pairing::rename_pairs(files, &mut sink)?;
    fs::write(&args.output, sink.finish()?.into_inner())?;

    if !quiet {
        for line in report {
            println!("{line}");
        }
    }
    Ok(())
}
