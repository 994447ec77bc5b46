//! Rollstitch CLI — continuous back-adjusted futures series.
//!
//! Commands:
//! - `build`: detect rollovers, write the rollover log, write the continuous series
//! - `apply`: write the continuous series from an existing rollover log
//! - `levels`: shift a level file into continuous price space
//! - `aggregate`: merge second bars into minute bars
//! - `synth`: write a synthetic multi-contract source file

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use rollstitch_core::data::{SyntheticSpec, TimeRange};
use rollstitch_core::domain::Product;
use rollstitch_runner::{
    init_logging, run_aggregate, run_apply, run_build, run_build_in_memory, run_levels, run_synth,
    write_json, BuildConfig, BuildOptions, BuildPaths, BuildReport, LevelFileSpec, LevelsPaths,
    ProductLayout, Resolution,
};

#[derive(Parser)]
#[command(
    name = "rollstitch",
    about = "Rollstitch — back-adjusted continuous futures series"
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by `build` and `apply`.
#[derive(Args)]
struct BuildArgs {
    /// Product: es or nq. Defaults to the config file's product, else es.
    #[arg(long)]
    product: Option<Product>,

    /// Source resolution: minute (1m) or second (1s).
    #[arg(long)]
    resolution: Option<Resolution>,

    /// TOML build config. Flags above must agree with it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory holding ohlcv/<product>/.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// First day to include (YYYY-MM-DD, inclusive).
    #[arg(long)]
    start: Option<String>,

    /// Last day to include (YYYY-MM-DD, inclusive).
    #[arg(long)]
    end: Option<String>,

    /// Skip the continuity check of the written output.
    #[arg(long, default_value_t = false)]
    skip_verify: bool,

    /// Source bar file. Defaults to the product layout.
    #[arg(long)]
    source: Option<PathBuf>,

    /// Rollover log file. Defaults to the product layout.
    #[arg(long)]
    rollover_log: Option<PathBuf>,

    /// Continuous output file. Defaults to the product layout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write the job report as JSON to this path.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect rollovers, write the rollover log and the continuous series.
    Build {
        #[command(flatten)]
        args: BuildArgs,

        /// Load the whole source into memory, skipping malformed rows.
        #[arg(long, default_value_t = false)]
        in_memory: bool,
    },
    /// Write the continuous series from an existing rollover log.
    Apply {
        #[command(flatten)]
        args: BuildArgs,
    },
    /// Shift a level file into the continuous series' price space.
    Levels {
        /// Product: es or nq.
        #[arg(long, default_value = "es")]
        product: Product,

        /// Data directory holding ohlcv/ and liquidity/.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Level file. Defaults to the product layout.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Rollover log file. Defaults to the product layout.
        #[arg(long)]
        rollover_log: Option<PathBuf>,

        /// Adjusted output file. Defaults to the product layout.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Timestamp column (epoch milliseconds or ISO text).
        #[arg(long, default_value = "unix_timestamp")]
        timestamp_column: String,

        /// Level columns, comma separated. Detected from the first row if omitted.
        #[arg(long, value_delimiter = ',')]
        levels: Option<Vec<String>>,

        /// Columns never treated as levels during detection.
        #[arg(long, value_delimiter = ',', default_value = "sentiment")]
        exclude: Vec<String>,

        /// Fixed decimals for adjusted levels. Match the build config.
        #[arg(long)]
        price_decimals: Option<usize>,

        /// Write the job report as JSON to this path.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Merge second bars into minute bars.
    Aggregate {
        /// Product: es or nq.
        #[arg(long, default_value = "es")]
        product: Product,

        /// Data directory holding ohlcv/<product>/.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Second-bar input. Defaults to the product's 1s file.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Minute-bar output. Defaults to the product's 1m file.
        #[arg(long)]
        output: Option<PathBuf>,

        /// First day to include (YYYY-MM-DD, inclusive).
        #[arg(long)]
        start: Option<String>,

        /// Last day to include (YYYY-MM-DD, inclusive).
        #[arg(long)]
        end: Option<String>,

        /// Write the job report as JSON to this path.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Write a deterministic synthetic multi-contract bar file.
    Synth {
        /// Output bar file.
        #[arg(long)]
        output: PathBuf,

        /// Product: es or nq.
        #[arg(long, default_value = "es")]
        product: Product,

        /// First calendar day (YYYY-MM-DD).
        #[arg(long, default_value = "2024-01-02")]
        start: String,

        /// Number of quarterly contracts in the chain.
        #[arg(long, default_value_t = 3)]
        contracts: usize,

        /// Calendar days each contract trades.
        #[arg(long, default_value_t = 30)]
        days_per_contract: u32,

        /// Calendar days neighbouring contracts trade together.
        #[arg(long, default_value_t = 6)]
        overlap_days: u32,

        /// Minutes between bars.
        #[arg(long, default_value_t = 60)]
        bar_minutes: u32,

        /// Price premium of each contract over the previous one.
        #[arg(long, default_value_t = 12.5)]
        carry: f64,

        /// RNG seed.
        #[arg(long, default_value_t = 7)]
        seed: u64,

        /// Write the job report as JSON to this path.
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Commands::Build { args, in_memory } => run_build_cmd(args, in_memory),
        Commands::Apply { args } => run_apply_cmd(args),
        Commands::Levels {
            product,
            data_dir,
            input,
            rollover_log,
            output,
            timestamp_column,
            levels,
            exclude,
            price_decimals,
            report,
        } => {
            let layout = ProductLayout::new(&data_dir, product);
            let paths = LevelsPaths {
                input: input.unwrap_or_else(|| layout.levels()),
                rollover_log: rollover_log.unwrap_or_else(|| layout.rollover_log()),
                output: output.unwrap_or_else(|| layout.levels_adjusted()),
            };
            let spec = LevelFileSpec {
                timestamp_column,
                level_columns: levels,
                exclude,
                price_decimals,
            };
            run_levels_cmd(&spec, &paths, report.as_deref())
        }
        Commands::Aggregate {
            product,
            data_dir,
            input,
            output,
            start,
            end,
            report,
        } => {
            let layout = ProductLayout::new(&data_dir, product);
            let input = input.unwrap_or_else(|| layout.source(Resolution::Second));
            let output = output.unwrap_or_else(|| layout.source(Resolution::Minute));
            let range = parse_range(start.as_deref(), end.as_deref())?;
            let result = run_aggregate(&input, &output, &range)
                .with_context(|| format!("aggregation of {} failed", input.display()))?;
            println!(
                "Aggregated {} rows into {} minute bars ({} merged, {} spread rows skipped)",
                result.scan.rows_read,
                result.bars_written,
                result.merged_rows,
                result.scan.spread_rows
            );
            println!("Output: {}", result.output.display());
            if let Some(path) = report {
                write_json(&path, &result)?;
            }
            Ok(())
        }
        Commands::Synth {
            output,
            product,
            start,
            contracts,
            days_per_contract,
            overlap_days,
            bar_minutes,
            carry,
            seed,
            report,
        } => {
            if contracts == 0 {
                bail!("--contracts must be at least 1");
            }
            if bar_minutes == 0 || bar_minutes > 24 * 60 {
                bail!("--bar-minutes must be between 1 and 1440");
            }
            let spec = SyntheticSpec {
                product,
                start: parse_date(&start)?,
                contracts,
                days_per_contract,
                overlap_days,
                bar_minutes,
                carry,
                seed,
                ..SyntheticSpec::default()
            };
            let result = run_synth(&spec, &output)?;
            println!(
                "Wrote {} bars for {} to {}",
                result.bars_written,
                result.contracts.join(", "),
                result.output.display()
            );
            if let Some(path) = report {
                write_json(&path, &result)?;
            }
            Ok(())
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

fn parse_range(start: Option<&str>, end: Option<&str>) -> Result<TimeRange> {
    let start = start.map(parse_date).transpose()?;
    let end = end.map(parse_date).transpose()?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            bail!("--start {s} is after --end {e}");
        }
    }
    Ok(TimeRange::from_dates(start, end))
}

/// Effective config plus resolved file paths for `build` / `apply`.
fn resolve_build(args: &BuildArgs) -> Result<(BuildConfig, BuildPaths, BuildOptions)> {
    let config = match &args.config {
        Some(path) => {
            let config = BuildConfig::from_file(path)?;
            if args.product.map_or(false, |p| p != config.product) {
                bail!("--product disagrees with product in {}", path.display());
            }
            if args.resolution.map_or(false, |r| r != config.resolution) {
                bail!("--resolution disagrees with resolution in {}", path.display());
            }
            config
        }
        None => BuildConfig::for_resolution(
            args.product.unwrap_or(Product::Es),
            args.resolution.unwrap_or_default(),
        ),
    };

    let layout = ProductLayout::new(&args.data_dir, config.product);
    let paths = BuildPaths {
        source: args
            .source
            .clone()
            .unwrap_or_else(|| layout.source(config.resolution)),
        rollover_log: args
            .rollover_log
            .clone()
            .unwrap_or_else(|| layout.rollover_log()),
        output: args
            .output
            .clone()
            .unwrap_or_else(|| layout.continuous(config.resolution)),
    };
    let options = BuildOptions {
        range: parse_range(args.start.as_deref(), args.end.as_deref())?,
        skip_verify: args.skip_verify,
    };
    Ok((config, paths, options))
}

fn run_build_cmd(args: BuildArgs, in_memory: bool) -> Result<()> {
    let (config, paths, options) = resolve_build(&args)?;
    let report = if in_memory {
        run_build_in_memory(&config, &paths, &options)
    } else {
        run_build(&config, &paths, &options)
    }
    .with_context(|| format!("build from {} failed", paths.source.display()))?;

    print_summary(&report);
    if let Some(path) = &args.report {
        write_json(path, &report)?;
    }
    Ok(())
}

fn run_apply_cmd(args: BuildArgs) -> Result<()> {
    let (config, paths, options) = resolve_build(&args)?;
    let report = run_apply(&config, &paths, &options).with_context(|| {
        format!(
            "applying {} to {} failed",
            paths.rollover_log.display(),
            paths.source.display()
        )
    })?;

    print_summary(&report);
    if let Some(path) = &args.report {
        write_json(path, &report)?;
    }
    Ok(())
}

fn run_levels_cmd(spec: &LevelFileSpec, paths: &LevelsPaths, report: Option<&Path>) -> Result<()> {
    let result = run_levels(spec, paths)
        .with_context(|| format!("level adjustment of {} failed", paths.input.display()))?;

    println!();
    println!("=== Level Adjustment ===");
    println!("Input:          {}", result.input.display());
    println!("Output:         {}", result.output.display());
    println!("Rollovers:      {}", result.rollovers);
    println!("Oldest adjust:  {:+.2} pts", result.total_adjustment);
    println!("Level columns:  {}", result.level_columns.join(", "));
    println!("Records:        {}", result.records);
    println!("Values shifted: {}", result.values_adjusted);
    if result.non_numeric_cells > 0 {
        println!("WARNING: {} non-numeric level cells passed through", result.non_numeric_cells);
    }
    println!();

    if let Some(path) = report {
        write_json(path, &result)?;
    }
    Ok(())
}

fn print_summary(report: &BuildReport) {
    let scan = &report.dominance_scan;
    println!();
    println!("=== Continuous Build ({:?}) ===", report.mode);
    println!("Product:        {} ({:?})", report.config.product, report.config.resolution);
    println!("Source:         {}", report.source.display());
    println!("Output:         {}", report.output.display());
    println!("Rollover log:   {}", report.rollover_log.display());
    println!();
    println!("--- Rows ---");
    if let Some(load) = &report.load {
        println!("Malformed:      {} (skipped)", load.read.malformed);
        println!("Duplicates:     {}", load.canonicalize.duplicates_dropped);
        if load.insane_bars > 0 {
            println!("Insane OHLC:    {}", load.insane_bars);
        }
    }
    println!("Read:           {}", scan.rows_read);
    println!("Spread rows:    {}", scan.spread_rows);
    println!("Out of range:   {}", scan.out_of_range);
    println!("Non-primary:    {}", report.adjust.non_primary_dropped);
    println!("Repeated ts:    {}", report.adjust.duplicates_dropped);
    println!("Written:        {}", report.adjust.bars_out);
    println!();
    println!("--- Rollovers ({}) ---", report.rollovers.len());
    for event in &report.rollovers {
        let (spread, overlap) = event
            .spread
            .map_or((f64::NAN, 0), |s| (s.spread, s.overlap_bars));
        let note = if overlap == 0 { "  (no overlap)" } else { "" };
        println!(
            "{}  {:<6} -> {:<6} {:>+9.2}  overlap {:>6}{note}",
            event.switch_ts.format("%Y-%m-%d %H:%M"),
            event.from_contract,
            event.to_contract,
            spread,
            overlap
        );
    }
    println!("Oldest adjust:  {:+.2} pts", report.total_adjustment);
    if report.flicker_buckets > 0 {
        println!("Flicker:        {} bucket(s) ignored", report.flicker_buckets);
    }
    match &report.verification {
        Some(v) => {
            println!();
            println!("--- Verification ---");
            println!("Transitions:    {} ({} flagged)", v.transitions.len(), v.flagged_transitions());
            println!("Large moves:    {} (> {} pts)", v.large_move_count, v.threshold);
            if !v.is_clean() {
                println!("WARNING: {} continuity warning(s)", v.warning_count());
            }
        }
        None => println!("Verification:   skipped"),
    }
    println!("Elapsed:        {:.1}s", report.elapsed_secs);
    println!();
}
