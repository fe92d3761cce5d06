#![forbid(unsafe_code)]

//! ZFS host integration.
//!
//! `connection` mirrors a host's namespace through the `zfs` CLI and
//! `pipeline` supervises send/receive replication between two connections.
//! `command` and `target` isolate argument vectors and process execution so
//! both stay testable against fake binaries.

pub mod command;
mod connection;
mod pipeline;
mod target;

pub use connection::{Connection, DatasetCache};
pub use pipeline::{meter_command, Stage, StageOutcome, Transfer, TransferReport};
pub use target::Target;
