//! Custom validation functions for configuration.
//!
//! Provides shared validation logic used across multiple configuration modules.

use std::net::SocketAddr;

use validator::ValidationError;

/// Validate that a listener address parses as `ip:port`.
pub fn validate_bind_addr(addr: &str) -> Result<(), ValidationError> {
    addr.parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_bind_addr"))
}

/// Validate that a fetch command template names its destination.
pub fn validate_fetch_command(template: &str) -> Result<(), ValidationError> {
    if template.trim().is_empty() {
        return Err(ValidationError::new("empty_fetch_command"));
    }
    if !template.contains("{dest}") {
        return Err(ValidationError::new("fetch_command_missing_dest"));
    }
    Ok(())
}

/// Validate that a directory setting is not blank.
pub fn validate_dir(dir: &str) -> Result<(), ValidationError> {
    if dir.trim().is_empty() {
        Err(ValidationError::new("empty_directory"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_requires_port() {
        assert!(validate_bind_addr("0.0.0.0:6789").is_ok());
        assert!(validate_bind_addr("[::1]:6789").is_ok());
        assert!(validate_bind_addr("localhost").is_err());
    }

    #[test]
    fn fetch_command_needs_destination() {
        assert!(validate_fetch_command("curl -sf https://host/{year}/{date}.csv.gz -o {dest}").is_ok());
        assert!(validate_fetch_command("curl https://host/{date}.csv.gz").is_err());
        assert!(validate_fetch_command("   ").is_err());
    }
}
