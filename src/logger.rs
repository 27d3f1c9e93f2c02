//! Logging support.

use flexi_logger::{
    filter::{LogLineFilter, LogLineWriter},
    DeferredNow, Logger, Record,
};
use std::sync::OnceLock;

const DEFAULT_LOG_LEVEL: &str = "info";

struct InternalOnly;
impl LogLineFilter for InternalOnly {
    fn write(
        &self,
        now: &mut DeferredNow,
        record: &Record,
        log_line_writer: &dyn LogLineWriter,
    ) -> std::io::Result<()> {
        // logs with paths that start with "/" are from 3rd party libraries
        if record.file().map_or(true, |file| !file.starts_with('/')) {
            log_line_writer.write(now, record)?;
        }
        Ok(())
    }
}

/// Initializes the global logger for the `log` logging facade.
///
/// # Panics
///
/// If logger fails to initialize
pub fn init() {
    static LOGGER: OnceLock<flexi_logger::LoggerHandle> = OnceLock::new();
    // The handle has to outlive the program to keep the logger flushing, so
    // it lives in a static. The OnceLock also prevents double initialization.
    LOGGER.get_or_init(|| {
        Logger::try_with_env_or_str(DEFAULT_LOG_LEVEL)
            .expect("failed to initialize logger")
            .format(flexi_logger::colored_detailed_format)
            .filter(Box::new(InternalOnly))
            .set_palette("124;3;4;146;7".into())
            .start()
            .expect("failed to initialize the logger")
    });
}
