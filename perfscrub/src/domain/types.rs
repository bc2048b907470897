//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a TID where a
//! PID is expected, or a DSO handle where a comm handle is expected.

use perfscrub_common::KERNEL_PID;
use std::fmt;

/// Process ID
///
/// [`Pid::KERNEL`] is perf's pseudo-pid for kernel mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl Pid {
    pub const KERNEL: Pid = Pid(KERNEL_PID);

    #[must_use]
    pub fn is_kernel(self) -> bool {
        self == Self::KERNEL
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_kernel() {
            write!(f, "PID:kernel")
        } else {
            write!(f, "PID:{}", self.0)
        }
    }
}

/// Thread ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// A (process, thread) pair
///
/// Threads of one process share an address space but may carry different
/// command names, so comm bookkeeping and DSO thread sets key on both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PidTid {
    pub pid: Pid,
    pub tid: Tid,
}

impl PidTid {
    #[must_use]
    pub fn new(pid: u32, tid: u32) -> Self {
        Self { pid: Pid(pid), tid: Tid(tid) }
    }
}

impl fmt::Display for PidTid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pid, self.tid)
    }
}

/// Handle to an interned DSO (backing file) name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DsoId(pub usize);

/// Handle to an interned command name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommId(pub usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_display() {
        assert_eq!(Pid(1234).to_string(), "PID:1234");
        assert_eq!(Pid::KERNEL.to_string(), "PID:kernel");
        assert_eq!(PidTid::new(10, 11).to_string(), "PID:10/TID:11");
    }

    #[test]
    fn test_kernel_pid_matches_perf() {
        assert!(Pid(u32::MAX).is_kernel());
        assert!(!Pid(0).is_kernel());
    }
}
