use anyhow::{Context, Result};
use clap::Parser;
use std::process::Command;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Run the workspace tests with a configurable number of property cases
    Test {
        #[arg(long, default_value = "256")]
        cases: u32,
        #[arg(long)]
        release: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::Test { cases, release } => run_tests(cases, release)?,
    }

    Ok(())
}

fn run_tests(cases: u32, release: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("test")
        .arg("--package")
        .arg("perfscrub-common")
        .arg("--package")
        .arg("perfscrub")
        .env("PROPTEST_CASES", cases.to_string());
    if release {
        cmd.arg("--release");
    }

    let status = cmd.status().context("Failed to run cargo test")?;

    if !status.success() {
        anyhow::bail!("Tests failed");
    }

    println!("Tests passed ({cases} property cases)");
    Ok(())
}
