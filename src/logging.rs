//! Logging initialisation for the command-line tools.

use tracing_subscriber::{fmt, EnvFilter};

/// Map a `-v` count to a default log level.
pub fn level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install a stderr `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `verbosity`. Calling it twice is harmless.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level(verbosity)));

    if fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
    {
        tracing::debug!("Logging initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_verbosity() {
        assert_eq!(level(0), "info");
        assert_eq!(level(1), "debug");
        assert_eq!(level(5), "trace");
    }

    #[test]
    fn test_init_twice() {
        init(0);
        init(2);
    }
}
