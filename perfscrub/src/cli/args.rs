//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::mapping::system_page_size;
use crate::resolver::ResolverOptions;

#[derive(Parser)]
#[command(
    name = "perfscrub",
    about = "Resolve and anonymize addresses in decoded perf records",
    after_help = "\
EXAMPLES:
    perfscrub --input events.jsonl --output scrubbed.jsonl
    perfscrub --input events.jsonl --no-remap --resolved samples.jsonl
    perfscrub < events.jsonl > scrubbed.jsonl"
)]
pub struct Args {
    /// JSON-lines event file (stdin if omitted)
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Write rewritten events here (stdout if omitted)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Write one resolved record per sample here
    #[arg(long, value_name = "FILE")]
    pub resolved: Option<PathBuf>,

    /// Keep real addresses instead of remapping into synthetic space
    #[arg(long)]
    pub no_remap: bool,

    /// Minimum percentage of samples that must map for success
    #[arg(long, default_value = "95.0")]
    pub threshold: f64,

    /// Page alignment for synthetic ranges (0 disables, default: system page size)
    #[arg(long, value_name = "BYTES")]
    pub page_alignment: Option<u64>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Resolver configuration selected by these arguments
    #[must_use]
    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            do_remap: !self.no_remap,
            sample_mapping_percentage_threshold: self.threshold,
            page_alignment: self.page_alignment.unwrap_or_else(system_page_size),
        }
    }
}
