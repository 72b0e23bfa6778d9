//! Subscriber-facing TCP server parameters.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Listener and per-connection delivery settings.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to.
    #[serde(default = "default_bind")]
    #[validate(custom(function = validation::validate_bind_addr))]
    pub bind: String,

    /// Lines buffered per subscriber before new lines are dropped for it.
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub queue_capacity: usize,

    /// Deadline for a single socket write (seconds).
    #[serde(default = "default_write_timeout_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub write_timeout_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0:6789".into()
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_write_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            queue_capacity: default_queue_capacity(),
            write_timeout_secs: default_write_timeout_secs(),
        }
    }
}
