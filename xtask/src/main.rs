use std::path::Path;
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the keyscan workspace",
    long_about = "A unified CLI for running scans, benchmarks,\n\
                  and CI checks in the keyscan workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run `scan-accounts` with the given arguments
    Scan {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run `consolidate-licenses` with the given arguments
    Consolidate {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run tests for one crate or the whole workspace
    Test {
        #[arg(value_enum)]
        package: Option<Package>,
    },
    /// Run Criterion benchmarks
    Bench,
    /// Compare benchmarks: stash changes, create baseline, restore, compare
    BenchCompare,
    /// Run CI checks (fmt, clippy, tests, benchmarks)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Run benchmarks
    Bench,
    /// Run check + bench
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum Package {
    Core,
    Http,
    Cli,
}

impl Package {
    const ALL: [Package; 3] = [Package::Core, Package::Http, Package::Cli];

    fn crate_name(self) -> &'static str {
        match self {
            Self::Core => "keyscan_core",
            Self::Http => "keyscan_http",
            Self::Cli => "keyscan_cli",
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn command_status(program: &str, args: &[&str]) -> ExitStatus {
    eprintln!("+ {program} {}", args.join(" "));
    match Command::new(program).args(args).status() {
        Ok(status) => status,
        Err(error) => {
            eprintln!("failed to execute {program}: {error}");
            exit(1);
        }
    }
}

fn run_cargo(args: &[&str]) {
    let status = command_status("cargo", args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_git(args: &[&str]) {
    let status = command_status("git", args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_binary(bin: &str, args: &[String]) {
    let mut cargo_args = vec!["run", "-p", "keyscan_cli", "--release", "--bin", bin, "--"];
    cargo_args.extend(args.iter().map(String::as_str));
    run_cargo(&cargo_args);
}

fn test_package(package: Package) {
    step(&format!("Test {}", package.crate_name()));
    run_cargo(&["test", "-p", package.crate_name()]);
}

fn bench(extra: &[&str]) {
    let mut args = vec!["bench", "--package", "keyscan_core", "--bench", "scan_throughput"];
    if !extra.is_empty() {
        args.push("--");
        args.extend_from_slice(extra);
    }
    run_cargo(&args);
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    for package in Package::ALL {
        test_package(package);
    }
}

fn ci_bench() {
    step("Run benchmarks");
    bench(&[]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { args } => run_binary("scan-accounts", &args),
        Commands::Consolidate { args } => run_binary("consolidate-licenses", &args),
        Commands::Test { package } => match package {
            Some(package) => test_package(package),
            None => Package::ALL.into_iter().for_each(test_package),
        },
        Commands::Bench => bench(&[]),
        Commands::BenchCompare => {
            let baseline_dir = Path::new("target/criterion");
            if baseline_dir.exists() {
                step("Removing existing benchmark data");
                if let Err(error) = std::fs::remove_dir_all(baseline_dir) {
                    eprintln!("failed to remove target/criterion: {error}");
                    exit(1);
                }
            }

            step("Stashing current changes");
            run_git(&[
                "stash",
                "push",
                "-m",
                "Temporary stash for benchmark comparison",
            ]);

            step("Running benchmark to create baseline");
            bench(&["--save-baseline", "main"]);

            step("Reapplying changes");
            run_git(&["stash", "pop"]);

            step("Running benchmark comparing against baseline");
            bench(&["--baseline", "main"]);

            eprintln!("\nDone! Check the output above to see performance comparison.");
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Bench => ci_bench(),
                CiJob::All => {
                    ci_check();
                    ci_bench();
                }
            }
            eprintln!("\nCI job passed.");
        }
    }
}
