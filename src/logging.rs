use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use serde::Serialize;
use std::sync::OnceLock;
use tokio::sync::broadcast;

const LOG_CHANNEL_CAPACITY: usize = 256;

static LOGGER: OnceLock<LinkLogger> = OnceLock::new();

#[derive(Debug, Serialize, Clone)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

/// Writes records to stderr and forwards them to the app's debug console
pub struct LinkLogger {
    sender: broadcast::Sender<LogMessage>,
    level: Level,
}

impl LinkLogger {
    pub fn new(level: Level) -> Self {
        let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self { sender, level }
    }

    /// Installs the logger for the whole process.
    pub fn init(level: Level) -> Result<(), SetLoggerError> {
        let logger = LOGGER.get_or_init(|| LinkLogger::new(level));
        log::set_logger(logger).map(|()| log::set_max_level(logger.level.to_level_filter()))
    }

    /// Receives every record logged after this call, once [`LinkLogger::init`] ran
    pub fn subscribe() -> Option<broadcast::Receiver<LogMessage>> {
        LOGGER.get().map(|logger| logger.sender.subscribe())
    }

    fn emit_log(&self, record: &Record) {
        let log_message = LogMessage {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        };

        // Nobody listening is fine
        let _ = self.sender.send(log_message);
    }
}

impl log::Log for LinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
            self.emit_log(record);
        }
    }

    fn flush(&self) {}
}

/// Plain `env_logger` setup for hosts without a debug console.
/// Does nothing if a logger is already installed.
pub fn setup_env_logging(default_level: LevelFilter) {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(default_level)
        .parse_default_env()
        .try_init();
}
