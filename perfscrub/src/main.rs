//! # perfscrub - Main Entry Point
//!
//! Reads decoded perf records as JSON lines, resolves and (by default)
//! remaps them, and writes the rewritten records back out.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};

use perfscrub::cli::Args;
use perfscrub::domain::{ReplayError, ResolveError};
use perfscrub::replay::{read_events, replay, write_events, write_json_lines};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_DATAERR: i32 = 65;
const EXIT_THRESHOLD: i32 = 3;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ReplayError>() {
        Some(ReplayError::Resolve(ResolveError::BelowThreshold { .. })) => EXIT_THRESHOLD,
        Some(ReplayError::ParseFailed { .. }) => EXIT_DATAERR,
        _ => EXIT_ERROR,
    }
}

fn open_output(path: Option<&std::path::Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

fn run() -> Result<()> {
    let args = Args::parse();
    let options = args.resolver_options();

    let events = match args.input {
        Some(ref path) => {
            let file =
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
            read_events(BufReader::new(file))?
        }
        None => read_events(io::stdin().lock())?,
    };
    info!("Read {} events", events.len());

    let outcome = replay(events, options)?;

    write_events(open_output(args.output.as_deref())?, &outcome.events)
        .context("Failed to write events")?;

    if let Some(ref path) = args.resolved {
        write_json_lines(open_output(Some(path))?, &outcome.resolved)
            .context("Failed to write resolved samples")?;
    }

    if !args.quiet {
        eprintln!("{}", outcome.stats);
        if !outcome.unsampled_mmaps.is_empty() {
            eprintln!("unsampled mmaps: {}", outcome.unsampled_mmaps.len());
        }
    }

    Ok(())
}
