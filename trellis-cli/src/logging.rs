// Logging setup
// tracing subscriber on stderr, filtered by TRELLIS_LOG or RUST_LOG

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable checked before `RUST_LOG`
pub const LOG_ENV: &str = "TRELLIS_LOG";

/// Install the global subscriber. An explicit filter in the environment
/// wins over `-v`.
pub fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // Progress goes to stdout; keep logs out of it
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
