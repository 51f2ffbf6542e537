use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::thread;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Verbose = 5,
}

impl LogLevel {
    pub fn from_config_value(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "verbose" | "trace" => Some(Self::Verbose),
            _ => None,
        }
    }

    fn label(self, colored: bool) -> &'static str {
        match (self, colored) {
            (Self::Error, false) => "ERROR",
            (Self::Warn, false) => "WARN",
            (Self::Info, false) => "INFO",
            (Self::Debug, false) => "DEBUG",
            (Self::Verbose, false) => "VERBOSE",
            (Self::Error, true) => "\x1b[31mERROR\x1b[0m",
            (Self::Warn, true) => "\x1b[33mWARN\x1b[0m",
            (Self::Info, true) => "\x1b[32mINFO\x1b[0m",
            (Self::Debug, true) => "\x1b[36mDEBUG\x1b[0m",
            (Self::Verbose, true) => "\x1b[35mVERBOSE\x1b[0m",
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub human_friendly: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            human_friendly: false,
        }
    }
}

pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);

    fn flush(&self) {}
}

#[derive(Default)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write_line(&self, line: &str) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
    }

    fn flush(&self) {
        let _ = io::stdout().lock().flush();
    }
}

struct LogRecord<'a> {
    level: LogLevel,
    thread: Option<&'a str>,
    context: Option<&'a str>,
    message: &'a str,
    payload: Option<&'a Value>,
}

impl LogRecord<'_> {
    /// `TIMESTAMP [LEVEL] (thread) [context] message payload={json}`
    fn render(&self, colored: bool) -> String {
        let mut line = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        line.push_str(" [");
        line.push_str(self.level.label(colored));
        line.push(']');

        if let Some(thread) = self.thread {
            line.push_str(" (");
            line.push_str(thread);
            line.push(')');
        }
        if let Some(context) = self.context.filter(|ctx| !ctx.is_empty()) {
            line.push_str(" [");
            line.push_str(context);
            line.push(']');
        }

        line.push(' ');
        line.push_str(self.message);
        if let Some(payload) = self.payload {
            line.push_str(" payload=");
            line.push_str(&payload.to_string());
        }
        line
    }
}

pub struct Logger {
    config: LoggerConfig,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(config: LoggerConfig) -> Self {
        Self::with_sink(config, Arc::new(StdoutSink))
    }

    pub fn with_sink(config: LoggerConfig, sink: Arc<dyn LogSink>) -> Self {
        Self { config, sink }
    }

    pub fn quiet() -> Self {
        Self::new(LoggerConfig {
            min_level: LogLevel::Error,
            human_friendly: false,
        })
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.config.min_level
    }

    pub fn error(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Error, context, message, None);
    }

    pub fn warn(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Warn, context, message, None);
    }

    pub fn info(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Info, context, message, None);
    }

    pub fn debug(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Debug, context, message, None);
    }

    pub fn log(
        &self,
        level: LogLevel,
        context: Option<&str>,
        message: &str,
        payload: Option<Value>,
    ) {
        if !self.enabled(level) {
            return;
        }

        let current = thread::current();
        let record = LogRecord {
            level,
            thread: current.name(),
            context,
            message,
            payload: payload.as_ref(),
        };
        self.sink.write_line(&record.render(self.config.human_friendly));
    }

    pub fn flush(&self) {
        self.sink.flush();
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
