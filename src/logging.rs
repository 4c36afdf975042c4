//! Tracing subscriber setup for hosts and the CLI

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` directives are honored; `default_level` applies when it is
/// unset. Returns `false` if a global subscriber was already installed.
pub fn init(default_level: Level) -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        init(Level::DEBUG);
        assert!(!init(Level::INFO));
    }
}
