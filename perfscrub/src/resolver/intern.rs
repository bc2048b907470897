//! Intern tables for DSO and command names
//!
//! Names are stored once and referred to by integer handles, so resolved
//! samples stay small and never hold references into a growing table.

use std::collections::{BTreeSet, HashMap};

use crate::domain::{CommId, DsoId, PidTid};

/// What is known about one backing file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsoInfo {
    pub name: String,
    pub is_kernel: bool,
    /// Set once any sample resolves into this DSO
    pub hit: bool,
    /// Threads whose samples resolved into this DSO
    pub threads: BTreeSet<PidTid>,
}

#[derive(Debug, Default)]
pub struct DsoTable {
    dsos: Vec<DsoInfo>,
    by_name: HashMap<String, DsoId>,
}

impl DsoTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `name`, adding it on first sight
    ///
    /// A DSO is flagged kernel if any of its mmaps was.
    pub fn intern(&mut self, name: &str, is_kernel: bool) -> DsoId {
        if let Some(&id) = self.by_name.get(name) {
            self.dsos[id.0].is_kernel |= is_kernel;
            return id;
        }

        let id = DsoId(self.dsos.len());
        self.dsos.push(DsoInfo {
            name: name.to_string(),
            is_kernel,
            hit: false,
            threads: BTreeSet::new(),
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    #[must_use]
    pub fn get(&self, id: DsoId) -> Option<&DsoInfo> {
        self.dsos.get(id.0)
    }

    pub fn get_mut(&mut self, id: DsoId) -> Option<&mut DsoInfo> {
        self.dsos.get_mut(id.0)
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<DsoId> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn name(&self, id: DsoId) -> Option<&str> {
        self.get(id).map(|dso| dso.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (DsoId, &DsoInfo)> + '_ {
        self.dsos.iter().enumerate().map(|(i, dso)| (DsoId(i), dso))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.dsos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dsos.is_empty()
    }
}

/// Command names and which thread currently carries which
#[derive(Debug, Default)]
pub struct CommTable {
    names: Vec<String>,
    by_name: HashMap<String, CommId>,
    by_thread: HashMap<PidTid, CommId>,
}

impl CommTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> CommId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = CommId(self.names.len());
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Bind `thread` to `name`, replacing any previous command
    pub fn assign(&mut self, thread: PidTid, name: &str) -> CommId {
        let id = self.intern(name);
        self.by_thread.insert(thread, id);
        id
    }

    /// Give `child` the command of `parent`; false if the parent has none
    pub fn inherit(&mut self, child: PidTid, parent: PidTid) -> bool {
        match self.by_thread.get(&parent).copied() {
            Some(id) => {
                self.by_thread.insert(child, id);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn command_id(&self, thread: PidTid) -> Option<CommId> {
        self.by_thread.get(&thread).copied()
    }

    #[must_use]
    pub fn command_for(&self, thread: PidTid) -> Option<&str> {
        self.command_id(thread).and_then(|id| self.name(id))
    }

    #[must_use]
    pub fn name(&self, id: CommId) -> Option<&str> {
        self.names.get(id.0).map(String::as_str)
    }

    /// Number of distinct command names
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dso_intern_is_stable() {
        let mut table = DsoTable::new();
        let libc = table.intern("/usr/lib/libc.so.6", false);
        let kernel = table.intern("[kernel.kallsyms]_text", true);

        assert_eq!(libc, DsoId(0));
        assert_eq!(kernel, DsoId(1));
        assert_eq!(table.intern("/usr/lib/libc.so.6", false), libc);
        assert_eq!(table.len(), 2);
        assert_eq!(table.name(kernel), Some("[kernel.kallsyms]_text"));
        assert!(table.get(kernel).unwrap().is_kernel);
        assert!(!table.get(libc).unwrap().hit);
    }

    #[test]
    fn test_dso_kernel_flag_is_sticky() {
        let mut table = DsoTable::new();
        let id = table.intern("[vdso]", false);
        table.intern("[vdso]", true);
        table.intern("[vdso]", false);
        assert!(table.get(id).unwrap().is_kernel);
    }

    #[test]
    fn test_comm_assign_and_inherit() {
        let mut table = CommTable::new();
        let parent = PidTid::new(10, 10);
        let child = PidTid::new(11, 11);

        assert!(!table.inherit(child, parent));
        table.assign(parent, "bash");
        assert!(table.inherit(child, parent));
        assert_eq!(table.command_for(child), Some("bash"));

        table.assign(child, "ls");
        assert_eq!(table.command_for(child), Some("ls"));
        assert_eq!(table.command_for(parent), Some("bash"));
        assert_eq!(table.len(), 2);
        assert_eq!(table.name(CommId(0)), Some("bash"));
        assert_eq!(table.name(CommId(1)), Some("ls"));
        assert_eq!(table.name(CommId(2)), None);
    }
}
