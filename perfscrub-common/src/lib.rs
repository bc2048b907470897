//! # Decoded Perf Event Records
//!
//! Defines the record types handed from a perf.data decoder to the remapping
//! engine. Records are already byte-order normalized; this crate only fixes
//! their shape so producers and the engine agree on it.
//!
//! ## Key Types
//!
//! - [`MmapEvent`] - A region of a process's address space backed by a file
//! - [`ForkEvent`] - Process or thread creation (also used for exit records)
//! - [`CommEvent`] - Command name change for a thread
//! - [`SampleEvent`] - One CPU sample with optional call chain and branch stack
//! - [`PerfEvent`] - Tagged union of all of the above
//!
//! Enable the `serde` feature to (de)serialize records.

// ============================================================================
// Constants
// ============================================================================

/// Pseudo process ID used by perf for kernel mappings (`(u32)-1`)
///
/// Kernel mmap records carry this pid. It is also the default parent for a
/// process whose fork was never observed, so new processes inherit the
/// kernel's address space.
pub const KERNEL_PID: u32 = u32::MAX;

/// Lower bound of the call chain context markers (`PERF_CONTEXT_MAX`)
///
/// Call chain entries at or above this value are not addresses: they mark a
/// switch between kernel, user, guest and hypervisor frames
/// (`PERF_CONTEXT_KERNEL = -128`, `PERF_CONTEXT_USER = -512`, ...).
pub const PERF_CONTEXT_MAX: u64 = u64::MAX - 4095 + 1;

/// Page size used for mmap alignment when the system page size is unknown
pub const MMAP_PAGE_ALIGNMENT: u64 = 4096;

/// Sequence number of the kernel's own text mapping
///
/// perf emits the kernel mmap first, so it always gets id 0.
pub const KERNEL_MMAP_ID: u64 = 0;

// ============================================================================
// Records
// ============================================================================

/// A file-backed (or anonymous) mapping in one process's address space
///
/// Emitted by perf for `PERF_RECORD_MMAP` and `PERF_RECORD_MMAP2`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MmapEvent {
    /// Process ID owning the mapping ([`KERNEL_PID`] for the kernel)
    pub pid: u32,

    /// Thread ID that performed the mapping
    pub tid: u32,

    /// First virtual address of the mapping
    pub start: u64,

    /// Length of the mapping in bytes
    pub len: u64,

    /// File offset that corresponds to `start` (`pgoff`)
    ///
    /// For the kernel mapping this may hold the relocated kernel text
    /// address, which is sensitive.
    pub pgoff: u64,

    /// Backing file name (`[kernel.kallsyms]_text`, `/usr/lib/libc.so.6`, ...)
    pub filename: String,

    /// Set when perf flagged the record as a kernel mapping
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_kernel: bool,
}

/// Process/thread creation or termination
///
/// `PERF_RECORD_FORK` and `PERF_RECORD_EXIT` share this layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ForkEvent {
    pub pid: u32,
    pub ppid: u32,
    pub tid: u32,
    pub ptid: u32,
}

/// Command name assignment (`PERF_RECORD_COMM`)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommEvent {
    pub pid: u32,
    pub tid: u32,

    /// New command name (`comm`), at most 16 bytes in the kernel
    #[cfg_attr(feature = "serde", serde(default))]
    pub comm: String,
}

/// One last-branch-record entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BranchEntry {
    pub from_ip: u64,
    pub to_ip: u64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub mispredicted: bool,
}

impl BranchEntry {
    /// Returns true for the zero padding perf appends after the last entry
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.from_ip == 0 && self.to_ip == 0 && !self.mispredicted
    }
}

/// A CPU sample (`PERF_RECORD_SAMPLE`)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleEvent {
    pub pid: u32,
    pub tid: u32,

    /// Sampled instruction pointer
    pub ip: u64,

    /// Call chain, innermost frame first, with embedded context markers
    #[cfg_attr(feature = "serde", serde(default))]
    pub callchain: Vec<u64>,

    /// Last branch records, most recent first
    #[cfg_attr(feature = "serde", serde(default))]
    pub branch_stack: Vec<BranchEntry>,
}

/// Any record the engine consumes
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum PerfEvent {
    Mmap(MmapEvent),
    Fork(ForkEvent),
    Exit(ForkEvent),
    Comm(CommEvent),
    Sample(SampleEvent),
}

impl PerfEvent {
    /// Process ID the record belongs to
    #[must_use]
    pub fn pid(&self) -> u32 {
        match self {
            PerfEvent::Mmap(e) => e.pid,
            PerfEvent::Fork(e) | PerfEvent::Exit(e) => e.pid,
            PerfEvent::Comm(e) => e.pid,
            PerfEvent::Sample(e) => e.pid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_markers_are_above_max() {
        // PERF_CONTEXT_KERNEL and PERF_CONTEXT_USER as the kernel encodes them
        let kernel = (-128i64) as u64;
        let user = (-512i64) as u64;
        assert!(kernel >= PERF_CONTEXT_MAX);
        assert!(user >= PERF_CONTEXT_MAX);
        assert!(0x7fff_ffff_f000 < PERF_CONTEXT_MAX);
        assert_eq!(PERF_CONTEXT_MAX, (-4095i64) as u64);
    }

    #[test]
    fn test_null_branch_entry() {
        assert!(BranchEntry::default().is_null());
        assert!(!BranchEntry { from_ip: 0x10, to_ip: 0, mispredicted: false }.is_null());
    }
}
