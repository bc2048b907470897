//! Interval allocator for one address space
//!
//! Ranges live in an arena of slots. Two derived orderings index the arena:
//! one by real start address (point lookups and collision search) and one by
//! synthetic start address (first-fit placement and free-space bookkeeping).
//! Both indices hold slot numbers rather than references, so a `clone()` is a
//! complete, independent copy of the address space.

use log::{debug, warn};
use std::collections::BTreeMap;

use super::range::MappedRange;
use crate::domain::MapError;

/// Opaque reference to the range found by
/// [`AddressMapper::get_mapped_address_and_handle`]
///
/// A handle is only valid until the mapper is next mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeHandle {
    slot: usize,
    generation: u64,
}

/// Maps the real address ranges of one process onto a packed synthetic space
#[derive(Debug, Clone, Default)]
pub struct AddressMapper {
    slots: Vec<Option<MappedRange>>,
    free_slots: Vec<usize>,
    /// `real_addr` → slot
    by_real: BTreeMap<u64, usize>,
    /// `mapped_addr` → slot
    by_mapped: BTreeMap<u64, usize>,
    /// 0 when alignment is disabled, otherwise a power of two
    page_alignment: u64,
    /// Bumped on every mutation to invalidate outstanding handles
    generation: u64,
}

/// A free synthetic gap chosen for a new range
struct Gap {
    predecessor: usize,
    mapped_addr: u64,
    unmapped_space_after: u64,
}

impl AddressMapper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty mapper with page alignment already configured
    #[must_use]
    pub fn with_page_alignment(alignment: u64) -> Self {
        let mut mapper = Self::new();
        mapper.set_page_alignment(alignment);
        mapper
    }

    /// Enable page alignment mode
    ///
    /// Alignment is enabled iff `alignment` is a power of two; any other
    /// value (including 0) disables it. Must be set before the first mapping.
    pub fn set_page_alignment(&mut self, alignment: u64) {
        if !self.is_empty() {
            warn!("Ignoring page alignment change on a mapper with {} ranges", self.len());
            return;
        }
        self.page_alignment = if alignment.is_power_of_two() { alignment } else { 0 };
    }

    /// Configured page alignment, 0 if disabled
    #[must_use]
    pub fn page_alignment(&self) -> u64 {
        self.page_alignment
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_real.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_real.is_empty()
    }

    /// Live ranges in synthetic address order
    pub fn ranges(&self) -> impl Iterator<Item = &MappedRange> + '_ {
        self.by_mapped.values().map(|&slot| self.range_at(slot))
    }

    /// Live ranges in real address order
    pub fn ranges_by_real_addr(&self) -> impl Iterator<Item = &MappedRange> + '_ {
        self.by_real.values().map(|&slot| self.range_at(slot))
    }

    /// Map `[real_addr, real_addr + size)` to a free synthetic location
    ///
    /// With `remove_existing`, ranges that overlap the new one are evicted;
    /// a single strictly larger range that covers it is split so that its
    /// uncovered head and tail stay mapped with their original id.
    ///
    /// # Errors
    /// - [`MapError::InvalidRange`] for a zero size or an end past `u64::MAX`
    /// - [`MapError::Collision`] on overlap without `remove_existing`
    /// - [`MapError::AlignmentViolation`] if a split would cut a covering
    ///   range off a page boundary
    /// - [`MapError::SpaceExhausted`] if no synthetic gap is large enough
    pub fn map_with_id(
        &mut self,
        real_addr: u64,
        size: u64,
        id: u64,
        offset_base: u64,
        remove_existing: bool,
    ) -> Result<(), MapError> {
        if size == 0 || real_addr.checked_add(size).is_none() {
            return Err(MapError::InvalidRange { real_addr, size });
        }

        let range = MappedRange::new(real_addr, size, id, offset_base);
        let colliding = self.intersecting_slots(&range);

        if !colliding.is_empty() {
            if !remove_existing {
                return Err(MapError::Collision { real_addr, size });
            }

            if let [slot] = colliding[..] {
                let old = *self.range_at(slot);
                if old.covers(&range) && old.size > range.size {
                    return self.split(slot, old, range);
                }
            }

            for slot in colliding {
                self.unmap(slot);
            }
        }

        self.place(range)
    }

    /// Find the synthetic address of `real_addr`
    ///
    /// Returns the synthetic address and a handle for a follow-up
    /// [`get_mapped_id_and_offset`](Self::get_mapped_id_and_offset) call, or
    /// `None` if no live range contains the address.
    #[must_use]
    pub fn get_mapped_address_and_handle(&self, real_addr: u64) -> Option<(u64, RangeHandle)> {
        let (_, &slot) = self.by_real.range(..=real_addr).next_back()?;
        let range = self.range_at(slot);
        if !range.contains_address(real_addr) {
            return None;
        }

        let mapped = range.mapped_addr + (real_addr - range.real_addr);
        Some((mapped, RangeHandle { slot, generation: self.generation }))
    }

    /// Return `(id, offset)` for `real_addr` within the range behind `handle`
    ///
    /// `None` if the handle is stale or does not cover `real_addr`.
    #[must_use]
    pub fn get_mapped_id_and_offset(&self, real_addr: u64, handle: RangeHandle) -> Option<(u64, u64)> {
        if handle.generation != self.generation {
            return None;
        }
        let range = self.slots.get(handle.slot)?.as_ref()?;
        if !range.contains_address(real_addr) {
            return None;
        }

        Some((range.id, (real_addr - range.real_addr).wrapping_add(range.offset_base)))
    }

    /// Distance between the first and last occupied synthetic byte
    ///
    /// 0 for an empty mapper; use [`is_empty`](Self::is_empty) to tell that
    /// apart from a mapping that spans the whole space.
    #[must_use]
    pub fn max_mapped_length(&self) -> u64 {
        let (Some((&min, _)), Some((_, &last))) =
            (self.by_mapped.first_key_value(), self.by_mapped.last_key_value())
        else {
            return 0;
        };
        self.range_at(last).mapped_end().wrapping_sub(min)
    }

    /// Log every live range at debug level
    pub fn dump_to_log(&self) {
        debug!("Address mapper with {} ranges (page alignment {}):", self.len(), self.page_alignment);
        for range in self.ranges() {
            debug!(
                "  real 0x{:x}-0x{:x} -> mapped 0x{:x}-0x{:x} id={} offset_base=0x{:x} free_after=0x{:x}",
                range.real_addr,
                range.end(),
                range.mapped_addr,
                range.mapped_end(),
                range.id,
                range.offset_base,
                range.unmapped_space_after
            );
        }
    }

    // Interval algebra

    fn intersecting_slots(&self, range: &MappedRange) -> Vec<usize> {
        let mut slots = Vec::new();

        // Only the immediate predecessor can reach into the new range from below
        if let Some((_, &slot)) = self.by_real.range(..range.real_addr).next_back() {
            if self.range_at(slot).intersects(range) {
                slots.push(slot);
            }
        }
        slots.extend(self.by_real.range(range.real_addr..range.end()).map(|(_, &slot)| slot));

        slots
    }

    /// Replace the covering range `old` by up to three pieces around `new`
    fn split(&mut self, slot: usize, old: MappedRange, new: MappedRange) -> Result<(), MapError> {
        let gap_before = new.real_addr - old.real_addr;
        let gap_after = old.end() - new.end();

        // Validated up front so a rejected split leaves the mapper untouched
        if self.page_alignment != 0
            && (gap_before % self.page_alignment != 0
                || (gap_before + new.size) % self.page_alignment != 0)
        {
            return Err(MapError::AlignmentViolation {
                real_addr: new.real_addr,
                size: new.size,
                old_addr: old.real_addr,
                old_size: old.size,
            });
        }

        debug!(
            "Splitting 0x{:x}+0x{:x} (id {}) around 0x{:x}+0x{:x} (id {})",
            old.real_addr, old.size, old.id, new.real_addr, new.size, new.id
        );
        self.unmap(slot);

        if gap_before > 0 {
            self.map_with_id(old.real_addr, gap_before, old.id, old.offset_base, false)?;
        }
        self.map_with_id(new.real_addr, new.size, new.id, new.offset_base, false)?;
        if gap_after > 0 {
            self.map_with_id(
                new.end(),
                gap_after,
                old.id,
                old.offset_base.wrapping_add(gap_before + new.size),
                false,
            )?;
        }

        Ok(())
    }

    /// First-fit placement of a range that collides with nothing
    fn place(&mut self, mut range: MappedRange) -> Result<(), MapError> {
        let exhausted = MapError::SpaceExhausted { real_addr: range.real_addr, size: range.size };
        let page_offset = self.page_offset(range.real_addr);
        let needed = range.size.checked_add(page_offset).ok_or(exhausted.clone())?;

        match self.by_mapped.first_key_value().map(|(&addr, _)| addr) {
            None => {
                range.mapped_addr = page_offset;
                range.unmapped_space_after = u64::MAX - needed;
            }
            Some(first) if first >= needed => {
                range.mapped_addr = page_offset;
                range.unmapped_space_after = first - needed;
            }
            Some(_) => {
                let Some(gap) = self.find_gap(range.size, page_offset) else {
                    self.dump_to_log();
                    return Err(exhausted);
                };
                let predecessor = self.range_at_mut(gap.predecessor);
                predecessor.unmapped_space_after = gap.mapped_addr - predecessor.mapped_end();
                range.mapped_addr = gap.mapped_addr;
                range.unmapped_space_after = gap.unmapped_space_after;
            }
        }

        self.insert(range);
        Ok(())
    }

    /// Scan synthetic space for the first gap that fits `size` bytes
    fn find_gap(&self, size: u64, page_offset: u64) -> Option<Gap> {
        self.by_mapped.values().find_map(|&slot| {
            let existing = self.range_at(slot);
            let free_start = existing.mapped_end();
            let free_end = free_start + existing.unmapped_space_after;

            let start = self.aligned_start(free_start, page_offset)?;
            let end = start.checked_add(size)?;
            (end <= free_end).then(|| Gap {
                predecessor: slot,
                mapped_addr: start,
                unmapped_space_after: free_end - end,
            })
        })
    }

    /// Lowest address `>= floor` whose page offset is `page_offset`
    fn aligned_start(&self, floor: u64, page_offset: u64) -> Option<u64> {
        if self.page_alignment == 0 {
            return Some(floor);
        }
        let candidate = (floor & !(self.page_alignment - 1)).checked_add(page_offset)?;
        if candidate >= floor {
            Some(candidate)
        } else {
            candidate.checked_add(self.page_alignment)
        }
    }

    fn page_offset(&self, addr: u64) -> u64 {
        if self.page_alignment == 0 {
            0
        } else {
            addr & (self.page_alignment - 1)
        }
    }

    // Arena bookkeeping

    fn insert(&mut self, range: MappedRange) {
        let slot = if let Some(slot) = self.free_slots.pop() {
            self.slots[slot] = Some(range);
            slot
        } else {
            self.slots.push(Some(range));
            self.slots.len() - 1
        };
        self.by_real.insert(range.real_addr, slot);
        self.by_mapped.insert(range.mapped_addr, slot);
        self.generation += 1;
    }

    /// Remove a range, crediting its synthetic space to its predecessor
    fn unmap(&mut self, slot: usize) {
        let Some(range) = self.slots[slot].take() else {
            return;
        };
        self.by_real.remove(&range.real_addr);
        self.by_mapped.remove(&range.mapped_addr);
        self.free_slots.push(slot);
        self.generation += 1;

        if let Some((_, &prev)) = self.by_mapped.range(..range.mapped_addr).next_back() {
            let freed = range.size + range.unmapped_space_after;
            self.range_at_mut(prev).unmapped_space_after += freed;
        }
    }

    fn range_at(&self, slot: usize) -> &MappedRange {
        self.slots[slot].as_ref().expect("index refers to a live slot")
    }

    fn range_at_mut(&mut self, slot: usize) -> &mut MappedRange {
        self.slots[slot].as_mut().expect("index refers to a live slot")
    }
}
