//! Per-node logging.
//!
//! Each node writes to its own `node_<id>.log`. The file is opened once and
//! shared by every clone of the logger, so the engine, its server, and its
//! background workers all append to the same handle. Console mirroring is a
//! property of the logger rather than of each call: engines built for
//! interactive use echo their lines, test fixtures stay silent. Detail
//! lines logged with [`Logger::debug`] go to the file only.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;

const RESET: &str = "\x1b[0m";
const BRIGHT_YELLOW: &str = "\x1b[93m";
const BRIGHT_RED: &str = "\x1b[91m";

/// Console color for informational lines. Warnings and errors pick their
/// own color.
#[derive(Debug, Clone, Copy)]
pub enum Color {
    Red,
    Green,
    Blue,
    Yellow,
    Cyan,
    Magenta,
    White,
}

impl Color {
    fn code(self) -> &'static str {
        match self {
            Color::Red => "\x1b[31m",
            Color::Green => "\x1b[32m",
            Color::Blue => "\x1b[34m",
            Color::Yellow => "\x1b[33m",
            Color::Cyan => "\x1b[36m",
            Color::Magenta => "\x1b[35m",
            Color::White => "\x1b[37m",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// Handle to one node's log file. Cloning is cheap and clones append to the
/// same file.
#[derive(Debug, Clone)]
pub struct Logger {
    node_id: String,
    file: Arc<Mutex<File>>,
    echo: bool,
}

impl Logger {
    /// Opens (truncating) `node_<id>.log` under `log_dir`, creating the
    /// directory if needed. The returned logger is silent on the console;
    /// see [`Logger::with_console_echo`].
    pub fn new(log_dir: &Path, node_id: &str) -> Result<Self, LoggerError> {
        fs::create_dir_all(log_dir)?;

        let sanitized_id = node_id.replace([':', '/'], "_");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log_dir.join(format!("node_{}.log", sanitized_id)))?;

        Ok(Logger {
            node_id: node_id.to_string(),
            file: Arc::new(Mutex::new(file)),
            echo: false,
        })
    }

    /// Mirrors every non-debug line to stdout as well as the file.
    pub fn with_console_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    fn write(&self, level: Level, color: Option<Color>, message: &str) -> Result<(), LoggerError> {
        let line = format!(
            "{} {:<5} [{}] {}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level.tag(),
            self.node_id,
            message
        );

        {
            let mut file = self.file.lock().map_err(|_| LoggerError::Poisoned)?;
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }

        if self.echo && !matches!(level, Level::Debug) {
            let painted = match (level, color) {
                (Level::Error, _) => format!("{}{}{}", BRIGHT_RED, line, RESET),
                (Level::Warn, _) => format!("{}{}{}", BRIGHT_YELLOW, line, RESET),
                (_, Some(color)) => format!("{}{}{}", color.code(), line, RESET),
                (_, None) => line,
            };
            print!("{}", painted);
        }

        Ok(())
    }

    /// Detail line, file only. Per-query chatter goes through here so the
    /// console stays readable.
    pub fn debug(&self, message: &str) -> Result<(), LoggerError> {
        self.write(Level::Debug, None, message)
    }

    /// Informational line, echoed in `color` when the logger echoes.
    pub fn info(&self, message: &str, color: Color) -> Result<(), LoggerError> {
        self.write(Level::Info, Some(color), message)
    }

    /// Warning line.
    pub fn warn(&self, message: &str) -> Result<(), LoggerError> {
        self.write(Level::Warn, None, message)
    }

    /// Error line.
    pub fn error(&self, message: &str) -> Result<(), LoggerError> {
        self.write(Level::Error, None, message)
    }
}

#[derive(Debug)]
pub enum LoggerError {
    Io(std::io::Error),
    /// Another holder of the shared file handle panicked mid-write.
    Poisoned,
}

impl std::fmt::Display for LoggerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggerError::Io(e) => write!(f, "logger I/O error: {}", e),
            LoggerError::Poisoned => write!(f, "logger file handle poisoned"),
        }
    }
}

impl std::error::Error for LoggerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoggerError::Io(e) => Some(e),
            LoggerError::Poisoned => None,
        }
    }
}

impl From<std::io::Error> for LoggerError {
    fn from(err: std::io::Error) -> Self {
        LoggerError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    #[test]
    fn test_lines_carry_level_node_id_and_message() {
        let log_dir = Path::new("/tmp/overlay_logger_basic");
        fs::remove_dir_all(log_dir).ok();

        let logger = Logger::new(log_dir, "A").expect("logger");
        logger.info("node up", Color::Green).expect("info");
        logger.warn("peer slow").expect("warn");
        logger.error("peer gone").expect("error");

        let contents = fs::read_to_string(log_dir.join("node_A.log")).expect("read log");
        assert!(contents.contains("INFO  [A] node up"));
        assert!(contents.contains("WARN  [A] peer slow"));
        assert!(contents.contains("ERROR [A] peer gone"));

        fs::remove_dir_all(log_dir).ok();
    }

    #[test]
    fn test_debug_reaches_the_file() {
        let log_dir = Path::new("/tmp/overlay_logger_debug");
        fs::remove_dir_all(log_dir).ok();

        let logger = Logger::new(log_dir, "B").expect("logger");
        logger.debug("cache hit for query_get_all").expect("debug");

        let contents = fs::read_to_string(log_dir.join("node_B.log")).expect("read log");
        assert!(contents.contains("DEBUG [B] cache hit for query_get_all"));

        fs::remove_dir_all(log_dir).ok();
    }

    #[test]
    fn test_clones_append_to_the_same_file() {
        let log_dir = Path::new("/tmp/overlay_logger_clones");
        fs::remove_dir_all(log_dir).ok();

        let logger = Logger::new(log_dir, "C").expect("logger");
        let clone = logger.clone();
        logger.info("from the engine", Color::Cyan).expect("info");
        clone.warn("from the worker").expect("warn");

        let contents = fs::read_to_string(log_dir.join("node_C.log")).expect("read log");
        assert!(contents.contains("from the engine"));
        assert!(contents.contains("from the worker"));

        fs::remove_dir_all(log_dir).ok();
    }

    #[test]
    fn test_reopening_truncates_the_previous_run() {
        let log_dir = Path::new("/tmp/overlay_logger_truncate");
        fs::remove_dir_all(log_dir).ok();

        let first = Logger::new(log_dir, "D").expect("logger");
        first.info("old run", Color::White).expect("info");
        drop(first);

        let second = Logger::new(log_dir, "D").expect("logger");
        second.info("new run", Color::White).expect("info");

        let contents = fs::read_to_string(log_dir.join("node_D.log")).expect("read log");
        assert!(!contents.contains("old run"));
        assert!(contents.contains("new run"));
    }

    #[test]
    fn test_id_with_path_characters_is_sanitized() {
        let log_dir = Path::new("/tmp/overlay_logger_sanitize");
        fs::remove_dir_all(log_dir).ok();

        Logger::new(log_dir, "a/b:c").expect("logger");

        assert!(log_dir.join("node_a_b_c.log").exists());
        fs::remove_dir_all(log_dir).ok();
    }
}
