//! # perfscrub - Perf Record Address Resolution and Anonymization
//!
//! perfscrub replays the mmap/fork/comm/sample history of a Linux perf
//! capture, resolves every sampled instruction address to the DSO and offset
//! it belongs to, and optionally rewrites all addresses into a synthetic
//! address space. The synthetic layout keeps module boundaries and page
//! offsets intact while hiding where ASLR (and KASLR) really placed things.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              perf.data decoder (external)                       │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ decoded records (perfscrub-common)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   perfscrub (This Crate)                        │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │    Replay    │──▶│    Event     │──▶│   Sample     │         │
//! │  │ (JSON lines) │   │  Processor   │   │  Resolver    │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │                                               │                 │
//! │                                               ▼                 │
//! │                     ┌──────────────────────────────────┐        │
//! │                     │ ProcessAddressSpaceRegistry      │        │
//! │                     │   pid → AddressMapper (intervals)│        │
//! │                     └──────────────────────────────────┘        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`mapping`]: Interval allocator and per-process address spaces
//!   - `address_mapper`: real → synthetic placement, splitting, lookup
//!   - `registry`: one mapper per pid, fork-time snapshots
//!
//! - [`resolver`]: Record processing
//!   - `sample_resolver`: mmap registration, IP/call chain/branch resolution
//!   - `event_processor`: dispatch in capture order, statistics, threshold
//!   - `intern`: DSO and command name tables
//!
//! - [`replay`]: JSON-lines input/output for decoded records
//!
//! - [`cli`]: Command-line argument parsing and configuration
//!
//! - [`domain`]: Core domain types (Pid, Tid, `DsoId`) and errors
//!
//! ## Typical Usage
//!
//! ```bash
//! # Anonymize a decoded capture
//! perfscrub --input events.jsonl --output scrubbed.jsonl
//!
//! # Resolve without remapping, dumping per-sample locations
//! perfscrub --input events.jsonl --no-remap --resolved samples.jsonl
//! ```
//!
//! ## Key Concepts
//!
//! - **DSO**: The executable, library or kernel image backing a mapping
//! - **Synthetic space**: Compacted address space starting at 0
//! - **Page alignment**: Synthetic addresses keep the real page offset
//! - **Fork inheritance**: A child starts with a copy of its parent's mappings

pub mod cli;
pub mod domain;
pub mod mapping;
pub mod replay;
pub mod resolver;
