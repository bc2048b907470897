//! Sample resolution
//!
//! This module ties decoded perf records to the address mappers:
//! - Sample, call chain and branch stack resolution
//! - DSO and command name interning
//! - Event dispatch in capture order
//! - Parse statistics and the mapped-sample threshold

pub mod event_processor;
pub mod intern;
pub mod sample_resolver;
pub mod stats;

pub use event_processor::EventProcessor;
pub use intern::{CommTable, DsoInfo, DsoTable};
pub use sample_resolver::{
    DsoAndOffset, MappedCallchain, MmapRecord, Resolved, ResolvedBranch, ResolvedSample,
    ResolverOptions, SampleResolver,
};
pub use stats::ParseStats;
