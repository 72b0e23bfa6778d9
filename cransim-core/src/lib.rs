//! # cransim-core
//!
//! Replays a day-partitioned archive at its original cadence, shifted into
//! the past by a fixed offset, and fans every record out to live subscribers.
//!
//! ### Pipeline:
//! - `clock`: virtual clock mapping wall time onto archive time
//! - `archive`: forward-only scanner over gzip day files
//! - `player`: paces records against the virtual clock
//! - `hub`: single-owner broadcast actor with drop-on-full fan-out

pub mod archive;
pub mod clock;
pub mod error;
pub mod hub;
pub mod player;

pub mod prelude {
    pub use crate::archive::*;
    pub use crate::clock::*;
    pub use crate::error::*;
    pub use crate::hub::*;
    pub use crate::player::*;
}

pub use error::{ArchiveError, HubError, TimestampError};
