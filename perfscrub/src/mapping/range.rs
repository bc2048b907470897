//! A single real → synthetic interval mapping

/// One interval of a process's real address space and where it lives in
/// synthetic space
///
/// `mapped_addr` and `unmapped_space_after` are owned by the
/// [`AddressMapper`](super::AddressMapper); callers only ever read them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRange {
    pub real_addr: u64,
    pub size: u64,
    pub mapped_addr: u64,
    /// Caller token, normally the sequence number of the originating mmap
    pub id: u64,
    /// File offset corresponding to `real_addr`
    pub offset_base: u64,
    /// Free synthetic bytes between this range's end and the next range
    pub unmapped_space_after: u64,
}

impl MappedRange {
    /// Create an unplaced range
    #[must_use]
    pub fn new(real_addr: u64, size: u64, id: u64, offset_base: u64) -> Self {
        Self { real_addr, size, mapped_addr: 0, id, offset_base, unmapped_space_after: 0 }
    }

    /// Exclusive end of the real interval
    #[must_use]
    pub fn end(&self) -> u64 {
        self.real_addr + self.size
    }

    /// Exclusive end of the synthetic interval
    #[must_use]
    pub fn mapped_end(&self) -> u64 {
        self.mapped_addr + self.size
    }

    /// Check if a real address falls within this range
    #[must_use]
    pub fn contains_address(&self, addr: u64) -> bool {
        addr >= self.real_addr && addr < self.end()
    }

    #[must_use]
    pub fn intersects(&self, other: &MappedRange) -> bool {
        self.real_addr < other.end() && other.real_addr < self.end()
    }

    /// True when `other` lies entirely inside this range
    #[must_use]
    pub fn covers(&self, other: &MappedRange) -> bool {
        self.real_addr <= other.real_addr && other.end() <= self.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_address() {
        let range = MappedRange::new(0x1000, 0x1000, 1, 0);

        assert!(range.contains_address(0x1000));
        assert!(range.contains_address(0x1FFF));
        assert!(!range.contains_address(0x0FFF));
        assert!(!range.contains_address(0x2000));
    }

    #[test]
    fn test_intersects_is_half_open() {
        let a = MappedRange::new(0x1000, 0x1000, 1, 0);
        let touching = MappedRange::new(0x2000, 0x1000, 2, 0);
        let overlapping = MappedRange::new(0x1800, 0x1000, 3, 0);

        assert!(!a.intersects(&touching));
        assert!(!touching.intersects(&a));
        assert!(a.intersects(&overlapping));
        assert!(overlapping.intersects(&a));
    }

    #[test]
    fn test_covers() {
        let outer = MappedRange::new(0x1000, 0x3000, 1, 0);
        let inner = MappedRange::new(0x2000, 0x1000, 2, 0);
        let straddling = MappedRange::new(0x3800, 0x1000, 3, 0);

        assert!(outer.covers(&inner));
        assert!(outer.covers(&outer));
        assert!(!inner.covers(&outer));
        assert!(!outer.covers(&straddling));
    }

    #[test]
    fn test_range_ending_at_top_of_address_space() {
        let top = MappedRange::new(u64::MAX - 0x1000, 0x1000, 1, 0);
        assert_eq!(top.end(), u64::MAX);
        assert!(top.contains_address(u64::MAX - 1));
        assert!(!top.contains_address(u64::MAX));
    }
}
