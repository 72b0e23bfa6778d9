//! Broadcast hub sizing.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// Hub control loop configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct HubConfig {
    /// Bound of the register/unregister/publish command queue.
    #[serde(default = "default_command_capacity")]
    #[validate(range(min = 1, max = 1_048_576))]
    pub command_capacity: usize,
}

fn default_command_capacity() -> usize {
    1024
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
        }
    }
}
