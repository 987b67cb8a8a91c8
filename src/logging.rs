// herringbone/src/logging.rs

use log::{LevelFilter, SetLoggerError};
use std::io::Write;
use std::sync::Once;

/// Initialize the logging system with the specified log level
pub fn init_logging(level: LevelFilter) -> Result<(), SetLoggerError> {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        env_logger::Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{}] {} - {}",
                    buf.timestamp_millis(),
                    record.level(),
                    record.args()
                )
            })
            .init();
    });

    Ok(())
}

/// Per-stage logging macros so operator-facing output carries the stage name.
#[macro_export]
macro_rules! parser_log {
    ($level:ident, $($arg:tt)*) => {
        log::$level!("[PARSER] {}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! detector_log {
    ($level:ident, $($arg:tt)*) => {
        log::$level!("[DETECTOR] {}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! correlator_log {
    ($level:ident, $($arg:tt)*) => {
        log::$level!("[CORRELATOR] {}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! orchestrator_log {
    ($level:ident, $($arg:tt)*) => {
        log::$level!("[ORCHESTRATOR] {}", format_args!($($arg)*))
    };
}
