//! JSON-lines replay of decoded perf records
//!
//! Each input line is one [`PerfEvent`] tagged by `type`:
//!
//! ```text
//! {"type":"mmap","pid":42,"tid":42,"start":4194304,"len":4096,"pgoff":0,"filename":"/bin/app"}
//! {"type":"sample","pid":42,"tid":42,"ip":4194320,"callchain":[4194320]}
//! ```
//!
//! Events are processed in file order; the rewritten events and a resolved
//! record per sample are returned for writing back out.

use log::info;
use perfscrub_common::PerfEvent;
use serde::Serialize;
use std::io::{BufRead, Write};

use crate::domain::ReplayError;
use crate::resolver::{
    DsoAndOffset, EventProcessor, ParseStats, ResolvedSample, ResolverOptions, SampleResolver,
};

/// A module-relative location with the DSO name spelled out
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedLocation {
    pub dso: String,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedBranch {
    pub from: NamedLocation,
    pub to: NamedLocation,
    pub predicted: bool,
}

/// Serializable form of a [`ResolvedSample`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRecord {
    pub pid: u32,
    pub tid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub ip: Option<NamedLocation>,
    pub callchain: Vec<NamedLocation>,
    pub branch_stack: Vec<NamedBranch>,
    pub fully_mapped: bool,
}

impl ResolvedRecord {
    fn from_sample(sample: &ResolvedSample, resolver: &SampleResolver) -> Self {
        let name = |location: &DsoAndOffset| NamedLocation {
            dso: resolver.dsos().name(location.dso).unwrap_or("<unknown>").to_string(),
            offset: location.offset,
        };

        Self {
            pid: sample.thread.pid.0,
            tid: sample.thread.tid.0,
            command: sample
                .command
                .and_then(|id| resolver.comms().name(id))
                .map(ToString::to_string),
            ip: sample.ip.as_ref().map(name),
            callchain: sample.callchain.iter().map(name).collect(),
            branch_stack: sample
                .branch_stack
                .iter()
                .map(|b| NamedBranch { from: name(&b.from), to: name(&b.to), predicted: b.predicted })
                .collect(),
            fully_mapped: sample.fully_mapped,
        }
    }
}

/// Result of a successful replay
#[derive(Debug)]
pub struct ReplayOutcome {
    /// Input events, rewritten to synthetic addresses in remap mode
    pub events: Vec<PerfEvent>,
    /// One record per sample, in input order
    pub resolved: Vec<ResolvedRecord>,
    pub stats: ParseStats,
    /// Sequence numbers of mmaps that no sample hit
    pub unsampled_mmaps: Vec<u64>,
}

/// Parse JSON-lines events, skipping blank lines
///
/// # Errors
/// Returns an error on I/O failure or a malformed line (with its 1-based number)
pub fn read_events<R: BufRead>(reader: R) -> Result<Vec<PerfEvent>, ReplayError> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line)
            .map_err(|source| ReplayError::ParseFailed { line: idx + 1, source })?;
        events.push(event);
    }
    Ok(events)
}

/// Write items as JSON lines
///
/// # Errors
/// Returns an error if serialization or the writer fails
pub fn write_json_lines<W: Write, T: Serialize>(mut writer: W, items: &[T]) -> Result<(), ReplayError> {
    for item in items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Write events as JSON lines
///
/// # Errors
/// Returns an error if serialization or the writer fails
pub fn write_events<W: Write>(writer: W, events: &[PerfEvent]) -> Result<(), ReplayError> {
    write_json_lines(writer, events)
}

/// Run every event through an [`EventProcessor`] and check the threshold
///
/// # Errors
/// Returns an error on the first fatal mmap failure, or if too few samples
/// were mapped
pub fn replay(mut events: Vec<PerfEvent>, options: ResolverOptions) -> Result<ReplayOutcome, ReplayError> {
    let mut processor = EventProcessor::new(options);
    let mut samples = Vec::new();

    for event in &mut events {
        if let Some(sample) = processor.process_event(event)? {
            samples.push(sample);
        }
    }
    processor.finish()?;

    let resolver = processor.resolver();
    let resolved = samples.iter().map(|s| ResolvedRecord::from_sample(s, resolver)).collect();
    let unsampled_mmaps = resolver.unsampled_mmap_ids();
    info!(
        "Replay done: {} DSOs, {} address spaces, {} unsampled mmaps",
        resolver.dsos().len(),
        resolver.registry().len(),
        unsampled_mmaps.len()
    );

    Ok(ReplayOutcome { events, resolved, stats: processor.stats.clone(), unsampled_mmaps })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_events_skips_blank_lines() {
        let input = "\n{\"type\":\"exit\",\"pid\":1,\"ppid\":0,\"tid\":1,\"ptid\":0}\n\n";
        let events = read_events(input.as_bytes()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pid(), 1);
    }

    #[test]
    fn test_read_events_reports_line_number() {
        let input = "{\"type\":\"exit\",\"pid\":1,\"ppid\":0,\"tid\":1,\"ptid\":0}\nnot json\n";
        let err = read_events(input.as_bytes()).unwrap_err();
        assert!(matches!(err, ReplayError::ParseFailed { line: 2, .. }));
    }

    #[test]
    fn test_sample_defaults_optional_lists() {
        let input = "{\"type\":\"sample\",\"pid\":1,\"tid\":2,\"ip\":16}";
        let events = read_events(input.as_bytes()).unwrap();
        let PerfEvent::Sample(sample) = &events[0] else {
            panic!("expected a sample");
        };
        assert!(sample.callchain.is_empty());
        assert!(sample.branch_stack.is_empty());
    }
}
