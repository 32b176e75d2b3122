use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use keyscan_cli::{
    export_to_csv, export_to_json, init_logging, CliReporter, ConnectionArgs, ScanArgs,
};
use keyscan_core::{
    normalize_request, FailurePolicy, ParallelScanCoordinator, ScanConfig, ScanRequest,
    ScanSelector,
};
use keyscan_http::ScanResource;

#[derive(Parser)]
#[command(
    name = "scan-accounts",
    about = "Scan accounts by attribute in parallel across the entire key space",
    after_help = "Example:\n  scan-accounts --name country --value '\"US\"' --output results.csv"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,
    /// Attribute name to search for
    #[arg(long)]
    name: String,
    /// JSON value to search for (in quotes for strings)
    #[arg(long)]
    value: String,
    /// Optional product context for the scan
    #[arg(long)]
    product: Option<String>,
    /// Comma-separated list of attribute names to return
    #[arg(long, value_delimiter = ',')]
    attribute_names: Vec<String>,
    #[command(flatten)]
    scan: ScanArgs,
    /// Keep results from healthy partitions when others fail
    #[arg(long)]
    best_effort: bool,
    /// Output file path (CSV format); prints JSON to stdout when omitted
    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.scan.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let request = normalize_request(ScanRequest {
        selector: ScanSelector::Attribute {
            name: cli.name,
            value: cli.value,
        },
        product: cli.product,
        attribute_names: cli.attribute_names,
        partitions: cli.scan.partitions,
        page_size: cli.scan.count,
        key_space: None,
    })?;
    if let ScanSelector::Attribute { value, .. } = &request.filter.selector {
        log::info!("Value is JSON: {value}");
    }

    let client = cli.connection.client(ScanResource::Accounts)?;
    let reporter = Arc::new(CliReporter::new("scan_accounts", &cli.scan));
    let coordinator = ParallelScanCoordinator::new(ScanConfig::from_request(&request))
        .with_reporter(reporter.clone());
    let policy = if cli.best_effort {
        FailurePolicy::BestEffort
    } else {
        FailurePolicy::FailFast
    };

    let scan = coordinator.scan_with_policy(&client, &request.filter, policy);
    reporter.finish();
    let result = scan.context("account scan failed")?;

    for failure in result.failures() {
        log::warn!(
            "Partition {} [{}, {}] returned no results: {}",
            failure.partition.partition_id,
            failure.partition.start,
            failure.partition.end,
            failure.error
        );
    }

    match &cli.output {
        Some(path) if result.is_empty() => {
            log::debug!("Skipping {}", path.display());
            println!("No results to save");
        }
        Some(path) => {
            export_to_csv(result.records(), path)?;
            println!("Results saved to {}", path.display());
        }
        None => export_to_json(result.records(), io::stdout().lock())?,
    }

    let summary = format!("Found {} matching accounts", result.len());
    if cli.output.is_some() {
        println!("{summary}");
    } else {
        eprintln!("{summary}");
    }
    if !result.is_complete() {
        anyhow::bail!(
            "{} of {} partitions failed; results are incomplete",
            result.failures().len(),
            result.failures().len() + result.partitions().len()
        );
    }
    Ok(())
}
