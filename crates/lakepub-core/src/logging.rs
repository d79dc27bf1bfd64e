//! Logging utilities with indicatif integration

use indicatif::MultiProgress;

/// ANSI color code and padded label for a log level.
fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

/// Logger that prints through indicatif MultiProgress so log lines don't tear the progress bar.
pub struct IndicatifLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.enabled(record.metadata()) {
            // Only installed on a TTY, so always colored
            let (pre, label, post) = level_style(record.level(), true);
            let line = format!("[{pre}{label}{post}] {}", record.args());
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Initialize logging. `RUST_LOG` wins over the default level.
///
/// With `multi` (TTY), lines go through the progress bars; without it,
/// plain `[LEVEL] message` lines for log aggregation.
pub fn init_logging(
    debug: bool,
    multi: Option<&MultiProgress>,
) -> Result<(), log::SetLoggerError> {
    use std::io::Write;

    let default_level = if debug { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(default_level);

    if let Some(multi) = multi {
        let logger = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .build();
        let max_level = logger.filter();

        log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone())))?;
        log::set_max_level(max_level);
        Ok(())
    } else {
        env_logger::Builder::from_env(env)
            .format(|buf, record| {
                let (_, label, _) = level_style(record.level(), false);
                writeln!(buf, "[{label}] {}", record.args())
            })
            .try_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_labels_are_padded() {
        assert_eq!(level_style(log::Level::Info, false), ("", "INFO ", ""));
        assert_eq!(level_style(log::Level::Error, false).1.len(), 5);
    }

    #[test]
    fn colored_labels_reset() {
        let (pre, label, post) = level_style(log::Level::Warn, true);
        assert_eq!(pre, "\x1b[33m");
        assert_eq!(label, "WARN ");
        assert_eq!(post, "\x1b[0m");
    }
}
