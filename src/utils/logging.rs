//! Logging setup with levels taken from the environment
//!
//! RUST_LOG controls verbosity (default `info`), per module if needed:
//! ```bash
//! RUST_LOG=condex_state::stores::lock=debug condex-admin status
//! ```

use std::env;

/// Initialise env_logger. Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let initialised = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .format_module_path(true)
        .format_target(false)
        .try_init();

    if initialised.is_ok() {
        log::debug!("Logging initialised at level {}", get_log_level());
    }
}

/// Current RUST_LOG filter, `info` when unset
pub fn get_log_level() -> String {
    env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}
