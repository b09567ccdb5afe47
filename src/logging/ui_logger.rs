use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender};

/// One log record as shown in the UI log panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub target: String,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Logger that forwards records to the UI thread over an mpsc channel.
pub struct UiLogger {
    sender: Sender<LogLine>,
    max_level: LevelFilter,
}

impl UiLogger {
    /// Create a logger and the receiver its lines arrive on, without installing it.
    pub fn new(max_level: LevelFilter) -> (Self, Receiver<LogLine>) {
        let (tx, rx) = mpsc::channel();
        (Self { sender: tx, max_level }, rx)
    }

    /// Install the UI logger and return the receiver to read log lines from.
    /// The level comes from `RUST_LOG` when it names a plain level, else `info`.
    pub fn init() -> Result<Receiver<LogLine>, SetLoggerError> {
        let max_level = std::env::var("RUST_LOG")
            .ok()
            .and_then(|s| LevelFilter::from_str(&s).ok())
            .unwrap_or(LevelFilter::Info);

        let (logger, rx) = Self::new(max_level);
        log::set_boxed_logger(Box::new(logger))?;
        log::set_max_level(max_level);
        Ok(rx)
    }
}

impl Log for UiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = self.sender.send(LogLine {
                level: record.level(),
                target: record.target().to_string(),
                message: record.args().to_string(),
            });
        }
    }

    fn flush(&self) {}
}
