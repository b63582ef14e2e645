use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entry::{ErrorValue, Level};
use crate::stacktrace::Stacktrace;

/// Event level understood by the Sentry server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Fixed level table. `Trace` has no counterpart.
    pub fn from_level(level: Level) -> Option<Severity> {
        match level {
            Level::Debug => Some(Severity::Debug),
            Level::Info => Some(Severity::Info),
            Level::Warn => Some(Severity::Warning),
            Level::Error => Some(Severity::Error),
            Level::Fatal | Level::Panic => Some(Severity::Fatal),
            Level::Trace => None,
        }
    }
}

/// HTTP request descriptor, read from the `http_request` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// User descriptor, read from the `user` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Exception {
    #[serde(rename = "type")]
    pub ty: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
}

impl Exception {
    /// Describe `err` (usually a root cause) with the given trace.
    ///
    /// A message shaped like `module: value` is split into both parts.
    pub fn new(err: &ErrorValue, stacktrace: Option<Stacktrace>) -> Self {
        let message = err.message();
        let (module, value) = match split_module(message) {
            Some((module, value)) => (Some(module.to_string()), value.to_string()),
            None => (None, message.to_string()),
        };
        Exception {
            ty: err.type_name().to_string(),
            value,
            module,
            stacktrace,
        }
    }
}

fn split_module(message: &str) -> Option<(&str, &str)> {
    let (module, value) = message.split_once(": ")?;
    let is_word = !module.is_empty() && module.chars().all(|c| c.is_alphanumeric() || c == '_');
    if is_word && !value.is_empty() {
        Some((module, value))
    } else {
        None
    }
}

/// A structured sub-record of a [`Packet`]. Order is preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum Interface {
    Request(HttpRequest),
    User(User),
    Stacktrace(Stacktrace),
    Exception(Exception),
}

impl Interface {
    /// Key the interface is sent under.
    pub fn class(&self) -> &'static str {
        match self {
            Interface::Request(_) => "request",
            Interface::User(_) => "user",
            Interface::Stacktrace(_) => "stacktrace",
            Interface::Exception(_) => "exception",
        }
    }
}

/// Event sent to the Sentry server.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub level: Option<Severity>,
    pub platform: String,
    pub server_name: Option<String>,
    pub logger: Option<String>,
    pub event_id: Option<String>,
    pub tags: Option<BTreeMap<String, String>>,
    pub fingerprint: Option<Vec<String>>,
    pub culprit: Option<String>,
    pub release: Option<String>,
    pub environment: Option<String>,
    pub interfaces: Vec<Interface>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Packet {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now(),
            level: None,
            platform: String::new(),
            server_name: None,
            logger: None,
            event_id: None,
            tags: None,
            fingerprint: None,
            culprit: None,
            release: None,
            environment: None,
            interfaces: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn interface(&self, class: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.class() == class)
    }
}

#[derive(Serialize)]
struct ExceptionValues<'a> {
    values: [&'a Exception; 1],
}

impl Serialize for Packet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("message", &self.message)?;
        map.serialize_entry(
            "timestamp",
            &self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        )?;
        if let Some(level) = &self.level {
            map.serialize_entry("level", level)?;
        }
        map.serialize_entry("platform", &self.platform)?;

        let optional = [
            ("server_name", &self.server_name),
            ("logger", &self.logger),
            ("event_id", &self.event_id),
            ("culprit", &self.culprit),
            ("release", &self.release),
            ("environment", &self.environment),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                map.serialize_entry(key, value)?;
            }
        }
        if let Some(tags) = &self.tags {
            map.serialize_entry("tags", tags)?;
        }
        if let Some(fingerprint) = &self.fingerprint {
            map.serialize_entry("fingerprint", fingerprint)?;
        }

        for interface in &self.interfaces {
            match interface {
                Interface::Request(req) => map.serialize_entry(interface.class(), req)?,
                Interface::User(user) => map.serialize_entry(interface.class(), user)?,
                Interface::Stacktrace(st) => map.serialize_entry(interface.class(), st)?,
                Interface::Exception(exc) => {
                    map.serialize_entry(interface.class(), &ExceptionValues { values: [exc] })?
                }
            }
        }

        if !self.extra.is_empty() {
            map.serialize_entry("extra", &self.extra)?;
        }
        map.end()
    }
}
