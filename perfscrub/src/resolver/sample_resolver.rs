//! Resolve perf records against per-process address spaces
//!
//! [`SampleResolver`] feeds mmap/fork/comm records into the
//! [`ProcessAddressSpaceRegistry`] and answers, for every sampled address,
//! which DSO and offset it belongs to. In remap mode it also rewrites the
//! records in place so that only synthetic addresses leave this module.

use log::{debug, error, warn};
use perfscrub_common::{
    BranchEntry, CommEvent, ForkEvent, MmapEvent, SampleEvent, KERNEL_MMAP_ID,
    MMAP_PAGE_ALIGNMENT, PERF_CONTEXT_MAX,
};
use std::collections::HashMap;

use super::intern::{CommTable, DsoTable};
use crate::domain::{CommId, DsoId, Pid, PidTid, ResolveError};
use crate::mapping::{system_page_size, ProcessAddressSpaceRegistry};

/// Resolver configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverOptions {
    /// Rewrite addresses into synthetic space
    pub do_remap: bool,
    /// Minimum percentage of fully mapped samples for a run to succeed
    pub sample_mapping_percentage_threshold: f64,
    /// Page alignment for new address spaces (power of two, 0 disables)
    pub page_alignment: u64,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            do_remap: true,
            sample_mapping_percentage_threshold: 95.0,
            page_alignment: system_page_size(),
        }
    }
}

/// A module-relative location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsoAndOffset {
    pub dso: DsoId,
    pub offset: u64,
}

/// Result of resolving one address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    /// Synthetic address in remap mode, the original address otherwise
    pub address: u64,
    pub location: DsoAndOffset,
}

/// Bookkeeping for one mmap record, keyed by its id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmapRecord {
    pub pid: Pid,
    pub dso: DsoId,
    /// Geometry as registered with the mapper (after kernel renormalization)
    pub start: u64,
    pub len: u64,
    pub pgoff: u64,
    /// Addresses resolved into this mmap
    pub samples_in_region: u64,
}

/// Resolved call chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedCallchain {
    /// One entry per resolved address, in call chain order
    pub entries: Vec<DsoAndOffset>,
    /// False if any address failed to resolve
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBranch {
    pub from: DsoAndOffset,
    pub to: DsoAndOffset,
    pub predicted: bool,
}

/// Everything learned from one sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSample {
    pub thread: PidTid,
    pub command: Option<CommId>,
    pub ip: Option<DsoAndOffset>,
    pub callchain: Vec<DsoAndOffset>,
    pub branch_stack: Vec<ResolvedBranch>,
    /// IP, call chain and branch stack all resolved
    pub fully_mapped: bool,
}

pub struct SampleResolver {
    options: ResolverOptions,
    registry: ProcessAddressSpaceRegistry,
    dsos: DsoTable,
    comms: CommTable,
    mmaps: HashMap<u64, MmapRecord>,
}

impl SampleResolver {
    #[must_use]
    pub fn new(options: ResolverOptions) -> Self {
        let registry = ProcessAddressSpaceRegistry::new(options.page_alignment);
        Self {
            options,
            registry,
            dsos: DsoTable::new(),
            comms: CommTable::new(),
            mmaps: HashMap::new(),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    #[must_use]
    pub fn registry(&self) -> &ProcessAddressSpaceRegistry {
        &self.registry
    }

    #[must_use]
    pub fn dsos(&self) -> &DsoTable {
        &self.dsos
    }

    #[must_use]
    pub fn comms(&self) -> &CommTable {
        &self.comms
    }

    #[must_use]
    pub fn mmap_record(&self, id: u64) -> Option<&MmapRecord> {
        self.mmaps.get(&id)
    }

    /// Ids of mmaps no sample ever resolved into, ascending
    #[must_use]
    pub fn unsampled_mmap_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .mmaps
            .iter()
            .filter(|(_, record)| record.samples_in_region == 0)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Page size remapped addresses must keep their offset within
    ///
    /// The mmap page size stands in when allocator alignment is disabled.
    fn offset_check_alignment(&self) -> u64 {
        match self.registry.page_alignment() {
            0 => MMAP_PAGE_ALIGNMENT,
            alignment => alignment,
        }
    }

    /// Register an mmap record under `id`
    ///
    /// Any existing mapping it overlaps in the same process is replaced. In
    /// remap mode `event` is rewritten to its synthetic geometry.
    ///
    /// # Errors
    /// Returns an error if the mapper rejects the range or the synthetic start
    /// does not keep the real start's page offset. Either is fatal for the
    /// whole parse.
    pub fn map_mmap_event(&mut self, event: &mut MmapEvent, id: u64) -> Result<(), ResolveError> {
        let pid = Pid(event.pid);
        let dso = self.dsos.intern(&event.filename, event.is_kernel);

        let mut start = event.start;
        let mut len = event.len;
        let mut pgoff = event.pgoff;

        // The kernel mmap can start before the real text; samples only ever
        // land past pgoff. Its pgoff is the relocated load address and is
        // always cleared.
        if id == KERNEL_MMAP_ID {
            if start < pgoff && pgoff - start < len {
                debug!("Renormalizing kernel mmap 0x{start:x}+0x{len:x} to start at 0x{pgoff:x}");
                len -= pgoff - start;
                start = pgoff;
            }
            pgoff = 0;
        }

        let alignment = self.offset_check_alignment();
        let (mapper, _) = self.registry.get_or_create(pid, Pid::KERNEL);
        if let Err(source) = mapper.map_with_id(start, len, id, pgoff, true) {
            error!(
                "Failed to map mmap #{id} {} 0x{start:x}+0x{len:x} for {pid}: {source}",
                event.filename
            );
            mapper.dump_to_log();
            return Err(ResolveError::MmapFailed {
                id,
                pid,
                filename: event.filename.clone(),
                source,
            });
        }

        let mapped_start = if self.options.do_remap {
            let Some((mapped, _)) = mapper.get_mapped_address_and_handle(start) else {
                return Err(ResolveError::MissingMapping { pid, addr: start });
            };
            if !same_page_offset(alignment, start, mapped) {
                error!("Remapped mmap start 0x{mapped:x} does not keep the page offset of 0x{start:x}");
                return Err(ResolveError::RemapAlignment { real: start, mapped });
            }
            Some(mapped)
        } else {
            None
        };

        self.mmaps.insert(
            id,
            MmapRecord { pid, dso, start, len, pgoff, samples_in_region: 0 },
        );

        if let Some(mapped) = mapped_start {
            event.start = mapped;
            event.len = len;
            event.pgoff = pgoff;
        }

        Ok(())
    }

    /// Resolve `ip` within the address space of `thread`'s process
    ///
    /// Returns `None` when no mapping contains the address, or in remap mode
    /// when its synthetic address would not keep the page offset. A hit is
    /// recorded against the DSO and the mmap it resolved into.
    pub fn map_ip(&mut self, ip: u64, thread: PidTid) -> Option<Resolved> {
        let alignment = self.offset_check_alignment();

        // Samples can precede any mmap of their process (e.g. the idle task)
        let (mapper, _) = self.registry.get_or_create(thread.pid, Pid::KERNEL);
        let (mapped, handle) = mapper.get_mapped_address_and_handle(ip)?;
        let (id, offset) = mapper.get_mapped_id_and_offset(ip, handle)?;

        let Some(record) = self.mmaps.get_mut(&id) else {
            warn!("Address 0x{ip:x} resolved to unknown mmap #{id}");
            return None;
        };
        record.samples_in_region += 1;
        let dso = record.dso;
        if let Some(info) = self.dsos.get_mut(dso) {
            info.hit = true;
            info.threads.insert(thread);
        }

        let address = if self.options.do_remap {
            if !same_page_offset(alignment, ip, mapped) {
                warn!("Remapped address 0x{mapped:x} does not keep the page offset of 0x{ip:x}");
                return None;
            }
            mapped
        } else {
            ip
        };

        Some(Resolved { address, location: DsoAndOffset { dso, offset } })
    }

    /// Resolve a sample's IP, call chain and branch stack
    ///
    /// In remap mode every resolved address in `event` is rewritten.
    pub fn map_sample_event(&mut self, event: &mut SampleEvent) -> ResolvedSample {
        let thread = PidTid::new(event.pid, event.tid);
        let original_ip = event.ip;
        let mut fully_mapped = true;

        let ip = match self.map_ip(original_ip, thread) {
            Some(resolved) => {
                event.ip = resolved.address;
                Some(resolved.location)
            }
            None => {
                fully_mapped = false;
                None
            }
        };

        let mut callchain = Vec::new();
        if !event.callchain.is_empty() {
            let mapped = self.map_callchain(&mut event.callchain, event.ip, original_ip, thread);
            fully_mapped &= mapped.complete;
            callchain = mapped.entries;
        }

        let mut branch_stack = Vec::new();
        if !event.branch_stack.is_empty() {
            match self.map_branch_stack(&mut event.branch_stack, thread) {
                Some(branches) => branch_stack = branches,
                None => fully_mapped = false,
            }
        }

        ResolvedSample {
            thread,
            command: self.comms.command_id(thread),
            ip,
            callchain,
            branch_stack,
            fully_mapped,
        }
    }

    /// Resolve every address of a call chain
    ///
    /// Context markers are left untouched. An entry equal to `original_ip` is
    /// overwritten with `ip` (the already-resolved sample IP) and adds no
    /// entry. The result holds the resolved prefix: after the first
    /// unresolved address the chain is incomplete and no further entries are
    /// collected, though later addresses are still rewritten.
    pub fn map_callchain(
        &mut self,
        callchain: &mut [u64],
        ip: u64,
        original_ip: u64,
        thread: PidTid,
    ) -> MappedCallchain {
        let mut mapped = MappedCallchain { entries: Vec::with_capacity(callchain.len()), complete: true };

        for entry in callchain.iter_mut() {
            if *entry >= PERF_CONTEXT_MAX {
                continue;
            }
            if *entry == original_ip {
                *entry = ip;
                continue;
            }

            match self.map_ip(*entry, thread) {
                Some(resolved) => {
                    *entry = resolved.address;
                    if mapped.complete {
                        mapped.entries.push(resolved.location);
                    }
                }
                None => mapped.complete = false,
            }
        }

        mapped
    }

    /// Resolve a branch stack, all or nothing
    ///
    /// Trailing null entries are ignored. Returns `None` if a non-null entry
    /// follows a null one or any `from`/`to` address fails to resolve.
    pub fn map_branch_stack(
        &mut self,
        branch_stack: &mut [BranchEntry],
        thread: PidTid,
    ) -> Option<Vec<ResolvedBranch>> {
        let trimmed = branch_stack.iter().take_while(|entry| !entry.is_null()).count();
        if let Some(stray) = branch_stack[trimmed..].iter().find(|entry| !entry.is_null()) {
            warn!(
                "Non-null branch entry 0x{:x} -> 0x{:x} after null entry",
                stray.from_ip, stray.to_ip
            );
            return None;
        }

        let mut resolved = Vec::with_capacity(trimmed);
        for entry in &mut branch_stack[..trimmed] {
            let from = self.map_ip(entry.from_ip, thread)?;
            entry.from_ip = from.address;
            let to = self.map_ip(entry.to_ip, thread)?;
            entry.to_ip = to.address;

            resolved.push(ResolvedBranch {
                from: from.location,
                to: to.location,
                predicted: !entry.mispredicted,
            });
        }

        Some(resolved)
    }

    /// Apply a fork record
    ///
    /// The child thread inherits the parent's command. A fork within one
    /// process (a new thread) leaves the address space alone; otherwise the
    /// child gets a snapshot of the parent's.
    pub fn map_fork_event(&mut self, event: &ForkEvent) {
        let parent = PidTid::new(event.ppid, event.ptid);
        let child = PidTid::new(event.pid, event.tid);
        if parent != child {
            self.comms.inherit(child, parent);
        }

        if event.pid == event.ppid {
            return;
        }
        let (_, created) = self.registry.get_or_create(Pid(event.pid), Pid(event.ppid));
        if !created {
            debug!("Fork into existing address space of {}", Pid(event.pid));
        }
    }

    /// Apply a comm record
    pub fn map_comm_event(&mut self, event: &CommEvent) {
        self.registry.get_or_create(Pid(event.pid), Pid::KERNEL);
        self.comms.assign(PidTid::new(event.pid, event.tid), &event.comm);
    }
}

fn same_page_offset(alignment: u64, a: u64, b: u64) -> bool {
    a % alignment == b % alignment
}
