//! Domain model for perfscrub
//!
//! Process and thread ids, intern handles for DSO and command names, and the
//! error types shared across the crate.

pub mod errors;
pub mod types;

pub use types::{CommId, DsoId, Pid, PidTid, Tid};

pub use errors::{MapError, ReplayError, ResolveError};
