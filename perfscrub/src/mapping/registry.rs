//! Per-process address spaces and fork-time inheritance

use log::debug;
use perfscrub_common::MMAP_PAGE_ALIGNMENT;
use std::collections::HashMap;

use super::AddressMapper;
use crate::domain::Pid;

/// Page size of the running system, falling back to 4 KiB
#[must_use]
#[allow(unsafe_code)] // sysconf() requires unsafe
pub fn system_page_size() -> u64 {
    // SAFETY: sysconf has no preconditions and only reads system configuration
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size).ok().filter(|s| s.is_power_of_two()).unwrap_or(MMAP_PAGE_ALIGNMENT)
}

/// Owns one [`AddressMapper`] per observed process plus one for the kernel
#[derive(Debug)]
pub struct ProcessAddressSpaceRegistry {
    mappers: HashMap<Pid, AddressMapper>,
    kernel: Option<AddressMapper>,
    /// Alignment given to mappers created from scratch
    page_alignment: u64,
}

impl ProcessAddressSpaceRegistry {
    /// Create an empty registry
    ///
    /// `page_alignment` is normalized the way
    /// [`AddressMapper::set_page_alignment`] does: non powers of two disable it.
    #[must_use]
    pub fn new(page_alignment: u64) -> Self {
        let page_alignment = if page_alignment.is_power_of_two() { page_alignment } else { 0 };
        Self { mappers: HashMap::new(), kernel: None, page_alignment }
    }

    #[must_use]
    pub fn page_alignment(&self) -> u64 {
        self.page_alignment
    }

    /// Return the mapper for `pid`, creating it if needed
    ///
    /// A new process starts with a snapshot of `ppid`'s address space, or of
    /// the kernel's if `ppid` was never seen. The copy is deep: later changes
    /// to the parent never reach the child. The boolean is true when a
    /// mapper was created by this call.
    pub fn get_or_create(&mut self, pid: Pid, ppid: Pid) -> (&mut AddressMapper, bool) {
        if pid.is_kernel() {
            let created = self.kernel.is_none();
            let alignment = self.page_alignment;
            let mapper =
                self.kernel.get_or_insert_with(|| AddressMapper::with_page_alignment(alignment));
            return (mapper, created);
        }

        let created = !self.mappers.contains_key(&pid);
        let seed = created.then(|| self.seed_for(pid, ppid));
        let alignment = self.page_alignment;
        let mapper = self
            .mappers
            .entry(pid)
            .or_insert_with(|| seed.unwrap_or_else(|| AddressMapper::with_page_alignment(alignment)));

        (mapper, created)
    }

    fn seed_for(&self, pid: Pid, ppid: Pid) -> AddressMapper {
        if let Some(parent) = self.mappers.get(&ppid) {
            debug!("Seeding {pid} from parent {ppid} ({} ranges)", parent.len());
            return parent.clone();
        }
        if let Some(kernel) = &self.kernel {
            debug!("Seeding {pid} from the kernel address space ({} ranges)", kernel.len());
            return kernel.clone();
        }

        debug!("Creating empty address space for {pid}");
        AddressMapper::with_page_alignment(self.page_alignment)
    }

    /// Mapper for `pid` if one exists
    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&AddressMapper> {
        if pid.is_kernel() {
            self.kernel.as_ref()
        } else {
            self.mappers.get(&pid)
        }
    }

    #[must_use]
    pub fn kernel(&self) -> Option<&AddressMapper> {
        self.kernel.as_ref()
    }

    /// Number of process mappers, not counting the kernel's
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

impl Default for ProcessAddressSpaceRegistry {
    fn default() -> Self {
        Self::new(system_page_size())
    }
}
