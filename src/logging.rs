//! Diagnostic output for the command-line tools

use tracing_subscriber::EnvFilter;

use crate::{MooringError, Result};

/// Default filter for a `-v` count: 0 warn, 1 info, 2 debug, 3+ trace.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "mooring=warn",
        1 => "mooring=info",
        2 => "mooring=debug",
        _ => "mooring=trace",
    }
}

/// Install a stderr fmt subscriber. `RUST_LOG` takes precedence over `verbosity`.
pub fn init(verbosity: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| MooringError::Config { reason: format!("logging already initialised: {}", e) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(default_directive(0), "mooring=warn");
        assert_eq!(default_directive(2), "mooring=debug");
        assert_eq!(default_directive(9), "mooring=trace");
    }
}
