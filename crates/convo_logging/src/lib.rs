#![deny(missing_docs)]
//! Shared logging utilities for the conversation sync workspace.
//!
//! This crate provides the `convo_*` logging macros used across the codebase
//! and a minimal test initializer for the global logger.

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! convo_trace {
    ($($arg:tt)*) => {{
        log::trace!($($arg)*);
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! convo_info {
    ($($arg:tt)*) => {{
        log::info!($($arg)*);
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! convo_debug {
    ($($arg:tt)*) => {{
        log::debug!($($arg)*);
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! convo_warn {
    ($($arg:tt)*) => {{
        log::warn!($($arg)*);
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! convo_error {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
    }};
}

/// Environment variable consulted for the log level (`error`, `warn`, `info`,
/// `debug`, `trace` or `off`).
pub const LEVEL_ENV: &str = "CONVO_LOG";

/// Parses a level name as accepted in [`LEVEL_ENV`]. Case-insensitive.
pub fn parse_level(raw: &str) -> Option<log::LevelFilter> {
    raw.trim().parse().ok()
}

/// Resolves the log level from [`LEVEL_ENV`], falling back to `default`
/// when the variable is unset or unparsable.
pub fn level_from_env(default: log::LevelFilter) -> log::LevelFilter {
    std::env::var(LEVEL_ENV)
        .ok()
        .and_then(|raw| parse_level(&raw))
        .unwrap_or(default)
}

/// Initializes a simple terminal logger for use in unit tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

    // Use debug level in debug builds, info in release builds.
    let default = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let level = level_from_env(default);

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}
