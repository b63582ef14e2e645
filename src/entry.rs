use backtrace::Backtrace;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

use crate::error::{Backtraced, Traced};
use crate::stacktrace::Stacktrace;

/// Severity of a [`LogEntry`].
///
/// Variants are ordered from most to least severe, so `Panic < Trace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Panic,
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    /// `true` if `self` is as severe as `min` or more severe.
    pub fn is_at_least(self, min: Level) -> bool {
        self <= min
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Panic => "panic",
            Level::Fatal => "fatal",
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        if level == tracing::Level::ERROR {
            Level::Error
        } else if level == tracing::Level::WARN {
            Level::Warn
        } else if level == tracing::Level::INFO {
            Level::Info
        } else if level == tracing::Level::DEBUG {
            Level::Debug
        } else {
            Level::Trace
        }
    }
}

/// A single structured log record handed to the hook.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl LogEntry {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Attach `err` under the well-known `error` key.
    pub fn with_error(self, err: &(dyn Error + 'static)) -> Self {
        self.with_field(crate::fields::ERROR, FieldValue::error(err))
    }
}

/// Value stored under a field name of a [`LogEntry`].
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Any value with a JSON representation.
    Json(serde_json::Value),
    /// Snapshot of an error chain.
    Error(ErrorValue),
    /// A value that can only render itself as text.
    Display(String),
}

impl FieldValue {
    pub fn error(err: &(dyn Error + 'static)) -> Self {
        FieldValue::Error(ErrorValue::capture(err))
    }

    pub fn display(value: impl fmt::Display) -> Self {
        FieldValue::Display(value.to_string())
    }

    /// String content of a JSON string or a display value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Json(serde_json::Value::String(s)) => Some(s),
            FieldValue::Display(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            FieldValue::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        FieldValue::Json(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Json(value.into())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Json(value.into())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Json(value.into())
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Json(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Json(value.into())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Json(value.into())
    }
}

/// Owned snapshot of an error and everything it wraps.
///
/// Each link keeps what the hook needs later: the rendered message, a type
/// name, and whichever stack trace the link carried ([`Traced`] or
/// [`Backtraced`]).
#[derive(Debug, Clone)]
pub struct ErrorValue {
    message: String,
    type_name: String,
    stacktrace: Option<Stacktrace>,
    backtrace: Option<Backtrace>,
    cause: Option<Box<ErrorValue>>,
}

impl ErrorValue {
    pub fn capture(err: &(dyn Error + 'static)) -> Self {
        let mut stacktrace = None;
        let mut backtrace = None;
        if let Some(traced) = err.downcast_ref::<Traced>() {
            stacktrace = Some(traced.stacktrace().clone());
        } else if let Some(traced) = err.downcast_ref::<Backtraced>() {
            backtrace = Some(traced.backtrace().clone());
        }

        Self {
            message: err.to_string(),
            type_name: type_from_debug(&format!("{err:?}")).to_string(),
            stacktrace,
            backtrace,
            cause: err.source().map(|source| Box::new(Self::capture(source))),
        }
    }

    /// Build a single link by hand.
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            type_name: type_name.into(),
            stacktrace: None,
            backtrace: None,
            cause: None,
        }
    }

    pub fn with_stacktrace(mut self, stacktrace: Stacktrace) -> Self {
        self.stacktrace = Some(stacktrace);
        self
    }

    pub fn with_backtrace(mut self, backtrace: Backtrace) -> Self {
        self.backtrace = Some(backtrace);
        self
    }

    pub fn with_cause(mut self, cause: ErrorValue) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn stacktrace(&self) -> Option<&Stacktrace> {
        self.stacktrace.as_ref()
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_ref()
    }

    pub fn cause(&self) -> Option<&ErrorValue> {
        self.cause.as_deref()
    }

    /// Innermost link of the chain, or `self` if nothing is wrapped.
    pub fn root_cause(&self) -> &ErrorValue {
        let mut current = self;
        while let Some(cause) = current.cause() {
            current = cause;
        }
        current
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Leading identifier of a `Debug` rendering, e.g. `Os` for
/// `Os { code: 2, .. }`.
pub(crate) fn type_from_debug(d: &str) -> &str {
    d.split(&[' ', '(', '{', '\r', '\n'][..])
        .next()
        .unwrap_or(d)
        .trim()
}
