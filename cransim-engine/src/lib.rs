//! # cransim-engine
//!
//! Wires the replay pipeline to the outside world: the subscriber-facing
//! TCP server, local archive upkeep and the process runtime.

pub mod connection;
pub mod error;
pub mod maintenance;
pub mod runtime;

pub use connection::ConnectionManager;
pub use error::{EngineError, MaintenanceError};
pub use maintenance::{ArchiveFetcher, ArchiveMaintainer, CommandFetcher, SyncReport};
pub use runtime::{run_server, run_sync};
