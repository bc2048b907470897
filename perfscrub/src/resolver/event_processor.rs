//! # Event Processing
//!
//! Routes decoded records to the [`SampleResolver`] in capture order.
//!
//! ## Event Routing
//!
//! - `Mmap` → register the mapping (fatal on failure)
//! - `Fork` → inherit comm and address space
//! - `Comm` → bind the command name
//! - `Exit` → counted only
//! - `Sample` → resolve IP, call chain and branch stack
//!
//! Every record consumes one sequence number. An mmap's sequence number is
//! its id in the address mappers, so the kernel mmap perf writes first gets
//! id 0.

use log::{debug, info};
use perfscrub_common::PerfEvent;

use super::{ParseStats, ResolvedSample, ResolverOptions, SampleResolver};
use crate::domain::ResolveError;

/// Encapsulates event processing state
pub struct EventProcessor {
    resolver: SampleResolver,
    pub stats: ParseStats,
    next_id: u64,
}

impl EventProcessor {
    #[must_use]
    pub fn new(options: ResolverOptions) -> Self {
        let stats = ParseStats { did_remap: options.do_remap, ..ParseStats::default() };
        Self { resolver: SampleResolver::new(options), stats, next_id: 0 }
    }

    /// Process a single event, rewriting it in place in remap mode
    ///
    /// Returns the resolution for sample records.
    ///
    /// # Errors
    /// Returns an error if an mmap cannot be registered; the parse must stop.
    pub fn process_event(
        &mut self,
        event: &mut PerfEvent,
    ) -> Result<Option<ResolvedSample>, ResolveError> {
        let id = self.next_id;
        self.next_id += 1;

        match event {
            PerfEvent::Mmap(mmap) => {
                self.stats.num_mmap_events += 1;
                self.resolver.map_mmap_event(mmap, id)?;
            }
            PerfEvent::Fork(fork) => {
                self.stats.num_fork_events += 1;
                self.resolver.map_fork_event(fork);
            }
            PerfEvent::Exit(_) => {
                self.stats.num_exit_events += 1;
            }
            PerfEvent::Comm(comm) => {
                self.stats.num_comm_events += 1;
                self.resolver.map_comm_event(comm);
            }
            PerfEvent::Sample(sample) => {
                self.stats.num_sample_events += 1;
                let resolved = self.resolver.map_sample_event(sample);
                if resolved.fully_mapped {
                    self.stats.num_sample_events_mapped += 1;
                } else {
                    debug!("Sample #{id} at 0x{:x} not fully mapped", sample.ip);
                }
                return Ok(Some(resolved));
            }
        }

        Ok(None)
    }

    /// Check the run against the mapped-sample threshold
    ///
    /// # Errors
    /// Returns [`ResolveError::BelowThreshold`] if too few samples mapped
    pub fn finish(&self) -> Result<(), ResolveError> {
        info!("Parsed {} events: {}", self.next_id, self.stats);
        self.stats.check_threshold(self.resolver.options().sample_mapping_percentage_threshold)
    }

    #[must_use]
    pub fn resolver(&self) -> &SampleResolver {
        &self.resolver
    }

    /// Number of events processed so far
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfscrub_common::{CommEvent, ForkEvent, MmapEvent, SampleEvent};

    fn options() -> ResolverOptions {
        ResolverOptions { do_remap: true, sample_mapping_percentage_threshold: 50.0, page_alignment: 0x1000 }
    }

    fn sample(ip: u64) -> PerfEvent {
        PerfEvent::Sample(SampleEvent { pid: 3, tid: 3, ip, callchain: vec![], branch_stack: vec![] })
    }

    #[test]
    fn test_counts_by_type() {
        let mut processor = EventProcessor::new(options());
        let mut events = vec![
            PerfEvent::Comm(CommEvent { pid: 3, tid: 3, comm: "app".to_string() }),
            PerfEvent::Mmap(MmapEvent {
                pid: 3,
                tid: 3,
                start: 0x40_0000,
                len: 0x1000,
                pgoff: 0,
                filename: "/bin/app".to_string(),
                is_kernel: false,
            }),
            PerfEvent::Fork(ForkEvent { pid: 4, ppid: 3, tid: 4, ptid: 3 }),
            sample(0x40_0010),
            sample(0x99_0000),
            PerfEvent::Exit(ForkEvent { pid: 4, ppid: 3, tid: 4, ptid: 3 }),
        ];
        for event in &mut events {
            processor.process_event(event).unwrap();
        }

        let stats = &processor.stats;
        assert_eq!(stats.num_comm_events, 1);
        assert_eq!(stats.num_mmap_events, 1);
        assert_eq!(stats.num_fork_events, 1);
        assert_eq!(stats.num_exit_events, 1);
        assert_eq!(stats.num_sample_events, 2);
        assert_eq!(stats.num_sample_events_mapped, 1);
        assert!(stats.did_remap);
        assert_eq!(processor.event_count(), 6);
        assert!(processor.finish().is_ok());

        // The mmap was the second event
        assert!(processor.resolver().mmap_record(1).is_some());
    }

    #[test]
    fn test_below_threshold_fails_finish() {
        let mut processor = EventProcessor::new(options());
        for ip in [0x10, 0x20, 0x30] {
            processor.process_event(&mut sample(ip)).unwrap();
        }
        assert!(matches!(processor.finish(), Err(ResolveError::BelowThreshold { total: 3, .. })));
    }

    #[test]
    fn test_invalid_mmap_is_fatal() {
        let mut processor = EventProcessor::new(options());
        let mut event = PerfEvent::Mmap(MmapEvent {
            pid: 3,
            tid: 3,
            start: 0x40_0000,
            len: 0,
            pgoff: 0,
            filename: "/bin/app".to_string(),
            is_kernel: false,
        });
        assert!(matches!(processor.process_event(&mut event), Err(ResolveError::MmapFailed { .. })));
    }
}
