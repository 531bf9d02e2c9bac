//! Logging setup for binaries and tests embedding the cache.
//!
//! The crate itself only emits through the `log` facade; this helper wires
//! up `env_logger` for hosts that have no logger of their own. Level
//! selection priority:
//!
//! 1. `RUST_LOG` environment variable (if set)
//! 2. `quiet` (errors only)
//! 3. `verbose` count (0 = info, 1 = debug, 2+ = trace)

use env_logger::Builder;
use log::LevelFilter;
use std::env;

/// Initialize the logging subsystem.
///
/// Safe to call more than once; later calls are no-ops. This keeps tests
/// that share a process from fighting over the global logger.
pub fn init_logging(verbose: u8, quiet: bool) {
    let mut builder = Builder::new();
    if env::var("RUST_LOG").is_ok() {
        builder.parse_default_env();
    } else {
        builder.filter_level(determine_level(verbose, quiet));
    }
    let _ = builder.try_init();
}

/// Map CLI-style flags to a level filter; `quiet` wins over `verbose`.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}
