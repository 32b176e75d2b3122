use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::builder::RangedU64ValueParser;
use clap::Parser;
use keyscan_cli::{init_logging, CliReporter, ConnectionArgs, ScanArgs};
use keyscan_core::consolidation::{DEFAULT_BATCH_PAUSE_MS, DEFAULT_BATCH_SIZE};
use keyscan_core::{
    group_records, normalize_request, ConsolidationConfig, Consolidator,
    ParallelScanCoordinator, ScanConfig, ScanRequest, ScanSelector,
};
use keyscan_http::ScanResource;

const LICENSE_PROJECTION: [&str; 4] = ["key", "userKeys", "accountKey", "enabled"];

#[derive(Parser)]
#[command(
    name = "consolidate-licenses",
    about = "Merge duplicated licenses of each account into a single license"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,
    /// Role granted by the licenses to consolidate
    #[arg(long, default_value = "ROLE_EXT_ADMIN")]
    role: String,
    #[command(flatten)]
    scan: ScanArgs,
    /// Accounts processed per batch
    #[arg(
        long,
        default_value_t = DEFAULT_BATCH_SIZE,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    batch_size: usize,
    /// Pause between batches in milliseconds
    #[arg(long, default_value_t = DEFAULT_BATCH_PAUSE_MS)]
    batch_pause_ms: u64,
    /// Log the planned moves and deletions without changing anything
    #[arg(long)]
    dry_run: bool,
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
    if cli.connection.client_secret.is_none() {
        anyhow::bail!("--client-secret (or ACCOUNT_SERVICE_CLIENT_SECRET) is required");
    }

    let request = normalize_request(ScanRequest {
        selector: ScanSelector::Role { role: cli.role },
        product: None,
        attribute_names: LICENSE_PROJECTION.iter().map(|name| name.to_string()).collect(),
        partitions: cli.scan.partitions,
        page_size: cli.scan.count,
        key_space: None,
    })?;

    let client = cli.connection.client(ScanResource::Licenses)?;
    let reporter = Arc::new(CliReporter::new("consolidate_licenses", &cli.scan));
    let coordinator = ParallelScanCoordinator::new(ScanConfig::from_request(&request))
        .with_reporter(reporter.clone());

    let scan = coordinator.scan(&client, &request.filter);
    reporter.finish();
    let licenses = scan.context("license scan failed")?;
    log::info!("Fetched {} licenses", licenses.len());

    let config = ConsolidationConfig {
        batch_size: cli.batch_size,
        batch_pause_ms: cli.batch_pause_ms,
        dry_run: cli.dry_run,
        ..ConsolidationConfig::default()
    };
    let groups = group_records(licenses.records(), &config);
    if groups.skipped_disabled > 0 || groups.ungrouped > 0 {
        log::info!(
            "Ignored {} disabled licenses and {} licenses without an account",
            groups.skipped_disabled,
            groups.ungrouped
        );
    }

    let report = Consolidator::new(config).run(&groups, &client);

    println!(
        "Accounts: {}, consolidated: {}, users moved: {}, licenses deleted: {}, failures: {}",
        report.groups_seen,
        report.groups_consolidated,
        report.members_moved,
        report.duplicates_deleted,
        report.move_failures + report.delete_failures
    );
    if report.has_failures() {
        log::warn!("Some licenses could not be consolidated; re-run to retry them");
    }
    Ok(())
}
