//! # Synthetic Address-Space Remapping
//!
//! Perf captures record real virtual addresses. Kernel addresses in particular
//! reveal the KASLR slide, and user addresses reveal where ASLR placed every
//! library. This module replays a process's mmap history and assigns every
//! mapped range a new home in a compact **synthetic** address space, so that
//! sampled addresses can be rewritten without losing which module and offset
//! they belong to.
//!
//! ## Real vs. Synthetic Space
//!
//! ```text
//! real space                              synthetic space
//! 0x55f3a2b4c000 ┌──────────┐             0x0000 ┌──────────┐
//!                │ a.out    │ ──────────────────▶│ a.out    │
//! 0x55f3a2b5f000 └──────────┘             0x13000├──────────┤
//!                    ...                         │ libc     │
//! 0x7f8b3c1a0000 ┌──────────┐ ──────────────────▶│          │
//!                │ libc     │             0x1d3000└──────────┘
//! 0x7f8b3c360000 └──────────┘                    (free to u64::MAX)
//! ```
//!
//! Ranges are packed first-fit from address 0. With page alignment enabled,
//! a range's synthetic start keeps the real start's offset within its page,
//! so page-granular tooling still sees consistent layouts.
//!
//! ## Replaying mmap History
//!
//! A new mmap over existing mappings models `munmap` followed by `mmap`:
//!
//! ```text
//! before:   [────────── libfoo (id 1) ──────────]
//! mmap:                [── anon (id 2) ──]
//! after:    [ id 1 ]   [──── id 2 ───────]  [ id 1, offset advanced ]
//! ```
//!
//! A range only partially overlapped is evicted entirely.
//!
//! ## Module Structure
//!
//! - **`range`**: [`MappedRange`], one real → synthetic interval
//! - **`address_mapper`**: [`AddressMapper`], the interval allocator
//! - **`registry`**: [`ProcessAddressSpaceRegistry`], one mapper per process
//!   with fork-time inheritance

pub mod address_mapper;
pub mod range;
pub mod registry;

pub use address_mapper::{AddressMapper, RangeHandle};
pub use range::MappedRange;
pub use registry::{system_page_size, ProcessAddressSpaceRegistry};
