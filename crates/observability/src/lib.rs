//! Process-wide logging setup shared by every seisflow binary.

/// Subscriber configuration (filter, formatter).
pub mod logging;

pub use logging::LogFormat;

/// Initialize process-wide logging.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    logging::init(LogFormat::from_env());
}
