use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use county_provider_map::prelude::*;
use county_provider_map::export::export_session;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cpmap")]
#[command(about = "County provider map CLI - join, aggregate and export provider counts per county", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show summary statistics for a dataset
    Stats(StatsArgs),
    /// Print per-county counts under a filter
    Aggregate(AggregateArgs),
    /// Print the normalized-name index built from the boundaries
    Index(DataArgs),
    /// Export the filtered view to JSON, CSV or GeoJSON
    Export(ExportArgs),
}

#[derive(Args)]
struct DataArgs {
    /// Directory containing the boundary, provider and rate files
    #[arg(short, long, env = "COUNTYMAP_DATA_DIR")]
    data_dir: Option<PathBuf>,
    /// County boundary GeoJSON
    #[arg(long)]
    boundaries: Option<PathBuf>,
    /// Provider CSV
    #[arg(long)]
    providers: Option<PathBuf>,
    /// Rate table as NAME=PATH (repeatable)
    #[arg(long = "rates", value_parser = parse_rate_table)]
    rates: Vec<(String, PathBuf)>,
    /// County centroid CSV
    #[arg(long)]
    centroids: Option<PathBuf>,
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// County-name matching strategy
    #[arg(long, value_enum)]
    match_strategy: Option<MatchStrategyOpt>,
    /// Skip malformed rows instead of failing
    #[arg(long)]
    skip_invalid: bool,
}

#[derive(Args)]
struct StatsArgs {
    #[command(flatten)]
    data: DataArgs,
    /// Also list unmatched county names
    #[arg(long)]
    unmatched: bool,
}

#[derive(Args)]
struct FilterArgs {
    /// Provider type code (e.g. NP)
    #[arg(long)]
    provider_type: Option<String>,
    /// County name, code or identifier
    #[arg(long)]
    county: Option<String>,
    /// Metric: provider_count or a rate field name
    #[arg(long, default_value = "provider_count")]
    metric: String,
    /// County selection narrows the map geometry only
    #[arg(long)]
    geometry_only: bool,
}

#[derive(Args)]
struct AggregateArgs {
    #[command(flatten)]
    data: DataArgs,
    #[command(flatten)]
    filter: FilterArgs,
    /// Limit number of counties printed
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Args)]
struct ExportArgs {
    #[command(flatten)]
    data: DataArgs,
    #[command(flatten)]
    filter: FilterArgs,
    /// Output file path
    #[arg(short, long)]
    output: PathBuf,
    /// Export format
    #[arg(long, value_enum, default_value_t = ExportFormatOpt::Json)]
    format: ExportFormatOpt,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum ExportFormatOpt {
    Json,
    Csv,
    Geojson,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum MatchStrategyOpt {
    Exact,
    StripCountySuffix,
}

fn parse_rate_table(value: &str) -> std::result::Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok((name.to_string(), PathBuf::from(path))),
        _ => Err(format!("expected NAME=PATH, got '{}'", value)),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Stats(args) => cmd_stats(args),
        Commands::Aggregate(args) => cmd_aggregate(args),
        Commands::Index(args) => cmd_index(args),
        Commands::Export(args) => cmd_export(args),
    }
}

fn load(args: &DataArgs, geometry_only: bool) -> anyhow::Result<MapDataset> {
    let mut cfg = match &args.config {
        Some(path) => MapConfig::from_file(path).map_err(|e| anyhow::anyhow!(e.user_message()))?,
        None => MapConfig::load(),
    };
    if let Some(strategy) = args.match_strategy {
        cfg.match_strategy = match strategy {
            MatchStrategyOpt::Exact => MatchStrategy::Exact,
            MatchStrategyOpt::StripCountySuffix => MatchStrategy::StripCountySuffix,
        };
    }
    if args.skip_invalid {
        cfg.skip_invalid_records = true;
    }
    if geometry_only {
        cfg.county_filter_mode = CountyFilterMode::GeometryOnly;
    }

    let mut builder = match &args.data_dir {
        Some(dir) => MapDatasetBuilder::from_directory(dir).map_err(|e| anyhow::anyhow!(e.user_message()))?,
        None => MapDatasetBuilder::new(),
    };
    if let Some(path) = &args.boundaries {
        builder = builder.boundaries(path);
    }
    if let Some(path) = &args.providers {
        builder = builder.providers(path);
    }
    for (name, path) in &args.rates {
        builder = builder.rate_table(name.clone(), path);
    }
    if let Some(path) = &args.centroids {
        builder = builder.centroids(path);
    }

    builder
        .config(cfg)
        .build()
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .context("loading dataset")
}

fn build_filter(dataset: &MapDataset, args: &FilterArgs) -> anyhow::Result<FilterState> {
    let mut filter = FilterState::all();
    if let Some(code) = &args.provider_type {
        filter = filter.with_provider_type(code.clone());
    }
    if let Some(county) = &args.county {
        match dataset.county(county) {
            Some(id) => filter = filter.with_county(id),
            None => bail!("unknown county '{}'", county),
        }
    }
    let metric = args.metric.parse::<Metric>().unwrap_or_default();
    Ok(filter.with_metric(metric))
}

fn cmd_stats(args: StatsArgs) -> anyhow::Result<()> {
    let dataset = load(&args.data, false)?;
    let Some(analytics) = dataset.analytics() else {
        bail!("dataset has no name index");
    };

    analytics.dataset_stats().print_summary();

    println!("\nProviders by type:");
    for (code, count) in analytics.provider_count_by_type() {
        let label = if code.is_empty() { "(none)" } else { code.as_str() };
        println!("  {:<12} {}", label, count);
    }

    if args.unmatched {
        println!("\nUnmatched county names:");
        for (name, count) in analytics.unmatched_names() {
            println!("  {:<24} {}", name, count);
        }
    }
    Ok(())
}

fn cmd_aggregate(args: AggregateArgs) -> anyhow::Result<()> {
    let mut dataset = load(&args.data, args.filter.geometry_only)?;
    let filter = build_filter(&dataset, &args.filter)?;
    dataset.apply(filter)?;

    let snapshot = dataset.snapshot()?;
    let index = dataset.index();
    let options = dataset.session().options();
    let table = &snapshot.aggregation.table;
    let visible: Vec<CountyIdentifier> = snapshot
        .features
        .iter()
        .filter_map(|f| f.identifier(&options.state_prefix, options.code_width).ok())
        .collect();

    let mut rows: Vec<(&CountyIdentifier, u64)> = table.ranked().into_iter().filter(|(id, _)| visible.contains(*id)).collect();
    rows.truncate(args.limit);

    for (id, count) in rows {
        let name = index.and_then(|i| i.display_name(id)).unwrap_or("");
        let value = snapshot.values.get(id).map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string());
        println!("{} | {:<16} | {:>6} | {:>10} | {}", id, name, count, value, snapshot.fill_color(id).unwrap_or(""));
    }

    let d = snapshot.aggregation.diagnostics;
    println!(
        "Processed: {}  Matched: {}  Unmatched: {} (empty {}, unknown {})",
        d.processed, d.matched, d.unmatched, d.empty_name, d.unknown_name
    );
    if let Some(count) = snapshot.selected_count {
        println!("Selected county count: {}", count);
    }
    Ok(())
}

fn cmd_index(args: DataArgs) -> anyhow::Result<()> {
    let dataset = load(&args, false)?;
    let Some(index) = dataset.index() else {
        bail!("dataset has no name index");
    };
    for (key, id) in index.iter() {
        println!("{:<24} {}", key.as_str(), id);
    }
    println!("Entries: {}", index.len());
    Ok(())
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let mut dataset = load(&args.data, args.filter.geometry_only)?;
    let filter = build_filter(&dataset, &args.filter)?;
    dataset.apply(filter)?;

    let format = match args.format {
        ExportFormatOpt::Json => ExportFormat::Json,
        ExportFormatOpt::Csv => ExportFormat::Csv,
        ExportFormatOpt::Geojson => ExportFormat::GeoJson,
    };
    export_session(dataset.session(), &args.output, format).map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("Exported to {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate_table() {
        let (name, path) = parse_rate_table("fp_rates=data/fp.csv").unwrap();
        assert_eq!(name, "fp_rates");
        assert_eq!(path, PathBuf::from("data/fp.csv"));
        assert!(parse_rate_table("fp_rates").is_err());
        assert!(parse_rate_table("=data/fp.csv").is_err());
    }

    #[test]
    fn test_cli_parses_repeated_rates() {
        let cli = Cli::try_parse_from([
            "cpmap", "aggregate", "--data-dir", "data", "--rates", "fp=fp.csv", "--rates", "np=np.csv",
            "--provider-type", "NP",
        ])
        .unwrap();
        match cli.command {
            Commands::Aggregate(args) => {
                assert_eq!(args.data.rates.len(), 2);
                assert_eq!(args.data.rates[1].0, "np");
                assert_eq!(args.filter.provider_type.as_deref(), Some("NP"));
            }
            _ => panic!("expected aggregate"),
        }
    }
}
