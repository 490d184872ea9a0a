use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use bdns_harvester::dashboard::Dashboard;
use bdns_harvester::domain::BdnsId;
use bdns_harvester::error::HarvestError;
use bdns_harvester::export::export_to_path;
use bdns_harvester::progress;
use bdns_harvester::query::{self, Filters};
use bdns_harvester::registry::BdnsHttpClient;
use bdns_harvester::scraper::{
    DEFAULT_MAX_CONSECUTIVE_NOT_FOUND, DEFAULT_MAX_DELAY, DEFAULT_START, ScrapeConfig,
    ScrapeSummary, Scraper, resume_cursor,
};
use bdns_harvester::store::PartitionStore;

#[derive(Parser)]
#[command(name = "bdns-hv")]
#[command(about = "Harvest and explore convocatorias from the Spanish BDNS registry")]
#[command(version, author)]
struct Cli {
    /// Directory holding the year partitions.
    #[arg(long, global = true, default_value = "data")]
    data_dir: Utf8PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Scan the id space starting from a fixed identifier")]
    Fetch(FetchArgs),
    #[command(about = "Continue the scan one past the highest stored identifier")]
    Resume(ResumeArgs),
    #[command(about = "Report per-year coverage, gaps and the resume cursor")]
    Progress(ProgressArgs),
    #[command(about = "Drop full-row duplicates from the partitions")]
    Dedupe(DedupeArgs),
    #[command(about = "Export a filtered subset as CSV")]
    Export(ExportArgs),
    #[command(about = "Browse the dataset interactively")]
    Dashboard,
}

#[derive(Args)]
struct FetchArgs {
    /// First identifier to attempt.
    #[arg(long, default_value_t = DEFAULT_START)]
    start: u64,

    #[command(flatten)]
    scan: ScanArgs,
}

#[derive(Args)]
struct ResumeArgs {
    #[command(flatten)]
    scan: ScanArgs,
}

#[derive(Args, Clone)]
struct ScanArgs {
    /// Consecutive not-found responses that end the scan.
    #[arg(long, default_value_t = DEFAULT_MAX_CONSECUTIVE_NOT_FOUND)]
    threshold: u32,

    /// Sleep a random interval after each fetched record.
    #[arg(long)]
    delay: bool,

    /// Upper bound for the random delay, in seconds.
    #[arg(long, default_value_t = DEFAULT_MAX_DELAY.as_secs_f64())]
    max_delay: f64,

    /// Flush buffered rows to the partitions every N records.
    #[arg(long, default_value_t = 100)]
    flush_every: usize,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ProgressArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct DedupeArgs {
    /// Restrict to one partition year; all partitions otherwise.
    #[arg(long)]
    year: Option<i32>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ExportArgs {
    #[arg(long, default_value = "bdns_filtrados.csv")]
    output: Utf8PathBuf,

    /// Restrict to the given years.
    #[arg(long)]
    year: Vec<i32>,

    /// Case-insensitive substring match on the description.
    #[arg(long)]
    search: Option<String>,

    /// Exact region name.
    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    budget_min: Option<f64>,

    #[arg(long)]
    budget_max: Option<f64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::DataUnavailable(_) | HarvestError::PartitionMissing(_) => 2,
        HarvestError::RegistryHttp(_) | HarvestError::RegistryStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = PartitionStore::new(cli.data_dir);

    match cli.command {
        Commands::Fetch(args) => {
            run_scan(store, BdnsId::new(args.start), args.scan)
        }
        Commands::Resume(args) => {
            let ids = store.bdns_ids().into_diagnostic()?;
            let start = match resume_cursor(ids) {
                Some(id) => {
                    println!("resuming from BDNS {id}");
                    id
                }
                None => {
                    println!("no existing data, starting from BDNS {DEFAULT_START}");
                    BdnsId::new(DEFAULT_START)
                }
            };
            run_scan(store, start, args.scan)
        }
        Commands::Progress(args) => run_progress(store, args),
        Commands::Dedupe(args) => run_dedupe(store, args),
        Commands::Export(args) => run_export(store, args),
        Commands::Dashboard => run_dashboard(store),
    }
}

fn run_scan(store: PartitionStore, start: BdnsId, args: ScanArgs) -> miette::Result<()> {
    let config = ScrapeConfig {
        start,
        max_consecutive_not_found: args.threshold,
        use_delay: args.delay,
        max_delay: Duration::from_secs_f64(args.max_delay.max(0.0)),
        flush_every: args.flush_every.max(1),
    };
    let client = BdnsHttpClient::new().into_diagnostic()?;
    let scraper = Scraper::new(config, client);
    let summary = scraper.run(&store).into_diagnostic()?;

    if args.json {
        print_json(&summary)?;
    } else {
        print_scan_summary(&summary, store.data_dir());
    }
    Ok(())
}

fn print_scan_summary(summary: &ScrapeSummary, data_dir: &camino::Utf8Path) {
    println!("scan summary");
    println!("  requests:            {}", summary.requests);
    println!("  records fetched:     {}", summary.records);
    println!("  rows written:        {}", summary.rows_written);
    println!("  not found:           {}", summary.not_found);
    println!("  transient failures:  {}", summary.transient);
    println!("  malformed records:   {}", summary.malformed);
    if let Some(last) = summary.last_id {
        println!("  last id attempted:   {last}");
    }
    println!("  data directory:      {data_dir}");
}

fn run_progress(store: PartitionStore, args: ProgressArgs) -> miette::Result<()> {
    let report = progress::report(&store).into_diagnostic()?;
    if args.json {
        return print_json(&report);
    }
    if report.partitions.is_empty() {
        println!("no data partitions found under {}", store.data_dir());
        return Ok(());
    }
    for partition in &report.partitions {
        println!(
            "bdns_{}.parquet: {} rows, {} unique BDNS, range {}-{}",
            partition.year, partition.rows, partition.unique_ids, partition.min_id, partition.max_id
        );
    }
    println!(
        "total: {} rows, {} unique BDNS, range {}-{}",
        report.total_rows,
        report.unique_ids,
        report.min_id.unwrap_or(0),
        report.max_id.unwrap_or(0)
    );
    if let Some(resume_from) = report.resume_from {
        println!("resume scraping from: {resume_from}");
    }
    if report.gaps.is_empty() {
        println!("no gaps, all identifiers are consecutive");
    } else {
        let missing: u64 = report.gaps.iter().map(|gap| gap.missing()).sum();
        println!("{} gap(s), {} identifiers missing:", report.gaps.len(), missing);
        for gap in report.gaps.iter().take(10) {
            println!("  {} to {} ({} missing)", gap.from, gap.to, gap.missing());
        }
        if report.gaps.len() > 10 {
            println!("  ... and {} more", report.gaps.len() - 10);
        }
    }
    Ok(())
}

fn run_dedupe(store: PartitionStore, args: DedupeArgs) -> miette::Result<()> {
    let years = match args.year {
        Some(year) => vec![year],
        None => store.list_years().into_diagnostic()?,
    };
    if years.is_empty() {
        println!("no data partitions found under {}", store.data_dir());
        return Ok(());
    }
    let mut reports = Vec::new();
    for year in years {
        reports.push(store.deduplicate(year).into_diagnostic()?);
    }
    if args.json {
        return print_json(&reports);
    }
    for report in &reports {
        let removed = report.rows_before - report.rows_after;
        if removed > 0 {
            println!(
                "bdns_{}.parquet: removed {} duplicate rows ({} left)",
                report.year, removed, report.rows_after
            );
        } else {
            println!("bdns_{}.parquet: already clean", report.year);
        }
    }
    Ok(())
}

fn run_export(store: PartitionStore, args: ExportArgs) -> miette::Result<()> {
    let years = if args.year.is_empty() {
        None
    } else {
        Some(args.year.as_slice())
    };
    let rows = store.load(years).into_diagnostic()?;
    let filters = Filters {
        description: args.search,
        regions: args.region.into_iter().collect(),
        budget_min: args.budget_min,
        budget_max: args.budget_max,
        ..Filters::default()
    };
    let subset = query::apply(&rows, &filters);
    export_to_path(&args.output, &subset).into_diagnostic()?;
    println!("{} rows exported to {}", subset.len(), args.output);
    Ok(())
}

fn run_dashboard(store: PartitionStore) -> miette::Result<()> {
    match store.load(None) {
        Ok(rows) => Dashboard::new(rows).run(),
        Err(HarvestError::DataUnavailable(dir)) => {
            println!("no data available yet: no partitions under {dir}");
            println!("run `bdns-hv fetch` first");
            Ok(())
        }
        Err(err) => Err(err).into_diagnostic(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> miette::Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{json}");
    Ok(())
}
