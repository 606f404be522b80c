//! Structured Logging with Sensitive Data Redaction
//!
//! Log entries are built with fields and emitted as `tracing` events.
//! Field values are redacted by key name:
//! - API keys, tokens and secrets (full redaction)
//! - Addresses and recipients (partial redaction)
//! - Transaction hashes (partial redaction)
//!
//! The binary installs the subscriber through [`init_tracing`].

use std::fmt;
use tracing_subscriber::EnvFilter;

/// Environment variable read for the log filter
pub const LOG_ENV: &str = "HWSEND_LOG";

/// Install the global `tracing` subscriber.
///
/// `HWSEND_LOG` takes precedence; otherwise `debug` when verbose, `info`
/// when not. Calling twice is harmless.
pub fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Structured log entry
#[derive(Debug)]
pub struct LogEntry {
    pub level: LogLevel,
    pub module: &'static str,
    pub message: String,
    pub fields: Vec<(&'static str, String)>,
}

impl LogEntry {
    pub fn new(level: LogLevel, module: &'static str, message: impl Into<String>) -> Self {
        Self {
            level,
            module,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field to the log entry (auto-redacts sensitive data)
    pub fn field(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        let value_str = value.to_string();
        let redacted = redact_if_sensitive(key, &value_str);
        self.fields.push((key, redacted));
        self
    }

    /// Add a field with explicit redaction
    pub fn redacted_field(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        let redacted = redact_value(&value.to_string());
        self.fields.push((key, redacted));
        self
    }

    /// Add an address field (partial redaction)
    pub fn address_field(mut self, key: &'static str, address: &str) -> Self {
        let redacted = redact_address(address);
        self.fields.push((key, redacted));
        self
    }

    fn rendered_fields(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Emit the entry through `tracing`
    pub fn log(self) {
        let fields = self.rendered_fields();
        let module = self.module;
        let message = self.message.as_str();

        match self.level {
            LogLevel::Debug => tracing::debug!(module, fields = %fields, "{}", message),
            LogLevel::Info => tracing::info!(module, fields = %fields, "{}", message),
            LogLevel::Warn => tracing::warn!(module, fields = %fields, "{}", message),
            LogLevel::Error => tracing::error!(module, fields = %fields, "{}", message),
        }
    }
}

/// How a field value is shown, picked by key name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redaction {
    Full,
    Address,
    Hash,
}

/// First match wins, so credentials are checked before addresses
const REDACTED_KEYS: &[(&str, Redaction)] = &[
    ("api_key", Redaction::Full),
    ("apikey", Redaction::Full),
    ("secret", Redaction::Full),
    ("token", Redaction::Full),
    ("password", Redaction::Full),
    ("authorization", Redaction::Full),
    ("bearer", Redaction::Full),
    ("private", Redaction::Full),
    ("address", Redaction::Address),
    ("recipient", Redaction::Address),
    ("sender", Redaction::Address),
    ("destination", Redaction::Address),
    ("expected", Redaction::Address),
    ("recovered", Redaction::Address),
    ("hash", Redaction::Hash),
];

fn redaction_for(key: &str) -> Option<Redaction> {
    let key = key.to_lowercase();
    REDACTED_KEYS
        .iter()
        .find(|(needle, _)| key.contains(needle))
        .map(|(_, redaction)| *redaction)
}

fn redact_if_sensitive(key: &str, value: &str) -> String {
    match redaction_for(key) {
        Some(Redaction::Full) => redact_value(value),
        Some(Redaction::Address) => redact_address(value),
        Some(Redaction::Hash) => redact_hash(value),
        None => value.to_string(),
    }
}

fn redact_value(value: &str) -> String {
    match value.len() {
        0 => "[EMPTY]".to_string(),
        1..=4 => "[REDACTED]".to_string(),
        len => format!("[REDACTED:{}chars]", len),
    }
}

/// Keep `prefix` and `suffix` characters of an ASCII value longer than `min_len`
fn elide(value: &str, min_len: usize, prefix: usize, suffix: usize) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "[EMPTY]".to_string();
    }
    // names and short ids are shown as they are
    if trimmed.len() <= min_len || !trimmed.is_ascii() {
        return trimmed.to_string();
    }
    format!("{}...{}", &trimmed[..prefix], &trimmed[trimmed.len() - suffix..])
}

/// `0x` + 6 hex or 6 characters, then the last 4
fn redact_address(address: &str) -> String {
    let prefix = if address.trim().starts_with("0x") { 8 } else { 6 };
    elide(address, prefix + 4 + 3, prefix, 4)
}

/// `0x` + 10 hex or 10 characters, then the last 6
fn redact_hash(hash: &str) -> String {
    let prefix = if hash.trim().starts_with("0x") { 12 } else { 10 };
    elide(hash, 20, prefix, 6)
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_at {
    ($level:ident, $module:expr, $msg:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::utils::logging::LogEntry::new($crate::utils::logging::LogLevel::$level, $module, $msg)
            $(.field(stringify!($key), &$value))*
            .log()
    };
}

/// `log_debug!("module", "message", key = value, ...)`
#[macro_export]
macro_rules! log_debug {
    ($($args:tt)*) => { $crate::__log_at!(Debug, $($args)*) };
}

#[macro_export]
macro_rules! log_info {
    ($($args:tt)*) => { $crate::__log_at!(Info, $($args)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($args:tt)*) => { $crate::__log_at!(Warn, $($args)*) };
}

#[macro_export]
macro_rules! log_error {
    ($($args:tt)*) => { $crate::__log_at!(Error, $($args)*) };
}
