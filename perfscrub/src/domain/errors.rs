//! Error types for mapping, resolution and replay
//!
//! Each layer has its own enum: [`MapError`] for one allocator call,
//! [`ResolveError`] for a failed record (wrapping the `MapError` as its
//! source), and [`ReplayError`] for the JSON-lines front end.

use super::types::Pid;
use thiserror::Error;

/// Failures of a single `AddressMapper::map_with_id` call
///
/// All of these are fatal for the mmap being processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    #[error("Invalid range: addr=0x{real_addr:x} size=0x{size:x}")]
    InvalidRange { real_addr: u64, size: u64 },

    #[error("Range 0x{real_addr:x}+0x{size:x} collides with an existing mapping")]
    Collision { real_addr: u64, size: u64 },

    #[error(
        "Splitting 0x{old_addr:x}+0x{old_size:x} at 0x{real_addr:x}+0x{size:x} \
         would move a page-aligned boundary"
    )]
    AlignmentViolation { real_addr: u64, size: u64, old_addr: u64, old_size: u64 },

    #[error("No free synthetic space for 0x{size:x} bytes at addr=0x{real_addr:x}")]
    SpaceExhausted { real_addr: u64, size: u64 },
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Failed to map mmap event #{id} for {pid} ({filename})")]
    MmapFailed {
        id: u64,
        pid: Pid,
        filename: String,
        #[source]
        source: MapError,
    },

    #[error("No mapping for 0x{addr:x} in {pid} right after mapping it")]
    MissingMapping { pid: Pid, addr: u64 },

    #[error("Remapped address 0x{mapped:x} has a different page offset than 0x{real:x}")]
    RemapAlignment { real: u64, mapped: u64 },

    #[error("Only {mapped} of {total} samples mapped (threshold {threshold}%)")]
    BelowThreshold { mapped: u64, total: u64, threshold: f64 },
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to parse event on line {line}: {source}")]
    ParseFailed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_error_display() {
        let err = MapError::InvalidRange { real_addr: 0x1000, size: 0 };
        assert_eq!(err.to_string(), "Invalid range: addr=0x1000 size=0x0");
    }

    #[test]
    fn test_mmap_failed_error() {
        let err = ResolveError::MmapFailed {
            id: 3,
            pid: Pid(42),
            filename: "/usr/lib/libc.so.6".to_string(),
            source: MapError::Collision { real_addr: 0x1000, size: 0x1000 },
        };
        assert!(err.to_string().contains("#3"));
        assert!(err.to_string().contains("PID:42"));
        assert!(err.to_string().contains("/usr/lib/libc.so.6"));
    }

    #[test]
    fn test_below_threshold_error() {
        let err = ResolveError::BelowThreshold { mapped: 3, total: 10, threshold: 95.0 };
        assert_eq!(err.to_string(), "Only 3 of 10 samples mapped (threshold 95%)");
    }
}
