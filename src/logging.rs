//! Logging setup shared across binaries.

use tracing::Level;

/// Install the fmt subscriber. Safe to call more than once; later calls are ignored.
pub fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

/// Whether `--verbose`/`-v` was passed.
pub fn verbose_from_args(args: &[String]) -> bool {
    args.iter().any(|a| a == "--verbose" || a == "-v")
}
