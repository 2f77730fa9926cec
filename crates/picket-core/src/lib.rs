//! Core library of the picket daemon: the process snapshots and the
//! time-bounded event cache used to attribute outbound connections to the
//! process that opened them.
//!
//! Event ingesters push [`Process`] values into the [`event_cache::EventCache`];
//! the connection-decision pipeline looks them up by PID and refreshes them
//! when the cache signals that its copy went stale (PID reuse, missing
//! checksums, missing ancestry).

pub mod event_cache;
pub mod process;

pub use event_cache::{EventCache, EventItem};
pub use proc_common::Pid;
pub use process::{Process, ProcessEvent, TreeEntry};
