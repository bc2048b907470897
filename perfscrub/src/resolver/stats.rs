// Percentages intentionally lose precision
#![allow(clippy::cast_precision_loss)]

use serde::Serialize;
use std::fmt;

use crate::domain::ResolveError;

/// Counters collected while replaying a capture
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub num_mmap_events: u64,
    pub num_fork_events: u64,
    pub num_exit_events: u64,
    pub num_comm_events: u64,
    pub num_sample_events: u64,
    /// Samples whose IP, call chain and branch stack all resolved
    pub num_sample_events_mapped: u64,
    pub did_remap: bool,
}

impl ParseStats {
    /// Percentage of samples fully mapped, 100 when there were none
    #[must_use]
    pub fn mapped_percentage(&self) -> f64 {
        if self.num_sample_events == 0 {
            return 100.0;
        }
        self.num_sample_events_mapped as f64 * 100.0 / self.num_sample_events as f64
    }

    /// Fail if fewer than `threshold` percent of samples were mapped
    ///
    /// # Errors
    /// Returns [`ResolveError::BelowThreshold`] when the mapped fraction is too low
    pub fn check_threshold(&self, threshold: f64) -> Result<(), ResolveError> {
        let required = self.num_sample_events as f64 * threshold / 100.0;
        if (self.num_sample_events_mapped as f64) < required {
            return Err(ResolveError::BelowThreshold {
                mapped: self.num_sample_events_mapped,
                total: self.num_sample_events,
                threshold,
            });
        }
        Ok(())
    }
}

impl fmt::Display for ParseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "samples: {} ({} mapped, {:.1}%), mmaps: {}, forks: {}, exits: {}, comms: {}, remap: {}",
            self.num_sample_events,
            self.num_sample_events_mapped,
            self.mapped_percentage(),
            self.num_mmap_events,
            self.num_fork_events,
            self.num_exit_events,
            self.num_comm_events,
            if self.did_remap { "yes" } else { "no" }
        )
    }
}
