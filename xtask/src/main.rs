use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for tickspace")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fmt, clippy and the test suite
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates, warnings denied
    Clippy,
    /// Run all tests
    Test,
    /// Run the tracking and partition property tests with more cases
    Props {
        /// Cases per property
        #[arg(long, default_value = "2048")]
        cases: u32,
    },
    /// Run the tracking timing bench in release mode
    Bench,
    /// Run a short simulated server through the CLI, once per strategy
    Smoke,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            run_fmt()?;
            run_clippy()?;
            run_tests()?;
        }
        Commands::Fmt => run_fmt()?,
        Commands::Clippy => run_clippy()?,
        Commands::Test => run_tests()?,
        Commands::Props { cases } => run_props(cases)?,
        Commands::Bench => run_bench()?,
        Commands::Smoke => run_smoke()?,
    }

    Ok(())
}

fn cargo(label: &str, args: &[&str], env: &[(&str, String)]) -> Result<()> {
    println!("==> Running cargo {label}");
    let mut command = Command::new("cargo");
    command.args(args);
    for (key, value) in env {
        command.env(key, value);
    }
    if !command.status()?.success() {
        anyhow::bail!("cargo {label} failed");
    }
    Ok(())
}

fn run_fmt() -> Result<()> {
    cargo("fmt --check", &["fmt", "--all", "--", "--check"], &[])
}

fn run_clippy() -> Result<()> {
    cargo(
        "clippy",
        &[
            "clippy",
            "--workspace",
            "--all-targets",
            "--",
            "-D",
            "warnings",
        ],
        &[],
    )
}

fn run_tests() -> Result<()> {
    cargo("test", &["test", "--workspace"], &[])
}

fn run_props(cases: u32) -> Result<()> {
    let env = [("PROPTEST_CASES", cases.to_string())];
    cargo(
        "test (tracking properties)",
        &["test", "-p", "tickspace-tracking", "--test", "proptest_tracking"],
        &env,
    )?;
    cargo(
        "test (partition properties)",
        &["test", "-p", "tickspace-scheduler", "--test", "proptest_partitions"],
        &env,
    )
}

fn run_bench() -> Result<()> {
    cargo(
        "bench (tracking)",
        &["bench", "-p", "tickspace-tracking", "--bench", "bench_tracking"],
        &[],
    )
}

fn run_smoke() -> Result<()> {
    let dir = std::env::temp_dir().join("tickspace-smoke");
    std::fs::create_dir_all(&dir)?;
    for strategy in ["per_world", "chunk_group"] {
        let path = dir.join(format!("{strategy}.yaml"));
        std::fs::write(
            &path,
            format!("partition_strategy: {strategy}\nview_distance_chunks: 4\n"),
        )?;
        let path = path.to_string_lossy().into_owned();
        cargo(
            &format!("run ({strategy})"),
            &[
                "run",
                "-p",
                "tickspace-cli",
                "--",
                "run",
                "--ticks",
                "700",
                "--config",
                &path,
            ],
            &[],
        )?;
    }
    Ok(())
}
