//! Typed, lenient view over the fields of a [`LogEntry`](crate::entry::LogEntry).
//!
//! A well-known key holding a value of the wrong shape reads as absent.

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

use crate::entry::{ErrorValue, FieldValue};
use crate::packet::{HttpRequest, User};

pub const LOGGER: &str = "logger";
pub const SERVER_NAME: &str = "server_name";
pub const EVENT_ID: &str = "event_id";
pub const TAGS: &str = "tags";
pub const FINGERPRINT: &str = "fingerprint";
pub const HTTP_REQUEST: &str = "http_request";
pub const USER: &str = "user";
pub const ERROR: &str = "error";

/// Keys the hook maps onto packet attributes instead of extra data.
pub const WELL_KNOWN: [&str; 8] = [
    LOGGER,
    SERVER_NAME,
    EVENT_ID,
    TAGS,
    FINGERPRINT,
    HTTP_REQUEST,
    USER,
    ERROR,
];

#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    data: &'a BTreeMap<String, FieldValue>,
}

impl<'a> Fields<'a> {
    pub fn new(data: &'a BTreeMap<String, FieldValue>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a String, &'a FieldValue)> {
        self.data.iter()
    }

    pub fn logger(&self) -> Option<&'a str> {
        self.str(LOGGER)
    }

    pub fn server_name(&self) -> Option<&'a str> {
        self.str(SERVER_NAME)
    }

    pub fn event_id(&self) -> Option<&'a str> {
        self.str(EVENT_ID)
    }

    /// A JSON object whose values are all strings.
    pub fn tags(&self) -> Option<BTreeMap<String, String>> {
        self.json(TAGS)?
            .as_object()?
            .iter()
            .map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect()
    }

    /// A JSON array of strings.
    pub fn fingerprint(&self) -> Option<Vec<String>> {
        self.json(FINGERPRINT)?
            .as_array()?
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    pub fn http_request(&self) -> Option<HttpRequest> {
        self.object(HTTP_REQUEST)
    }

    pub fn user(&self) -> Option<User> {
        self.object(USER)
    }

    pub fn error(&self) -> Option<&'a ErrorValue> {
        match self.data.get(ERROR)? {
            FieldValue::Error(err) => Some(err),
            _ => None,
        }
    }

    /// `true` if `key` names one of the well-known fields.
    pub fn is_omit(key: &str) -> bool {
        WELL_KNOWN.contains(&key)
    }

    /// `true` if `key` is well-known and its value was usable as such.
    pub fn is_consumed(&self, key: &str) -> bool {
        match key {
            LOGGER => self.logger().is_some(),
            SERVER_NAME => self.server_name().is_some(),
            EVENT_ID => self.event_id().is_some(),
            TAGS => self.tags().is_some(),
            FINGERPRINT => self.fingerprint().is_some(),
            HTTP_REQUEST => self.http_request().is_some(),
            USER => self.user().is_some(),
            ERROR => self.error().is_some(),
            _ => false,
        }
    }

    fn json(&self, key: &str) -> Option<&'a serde_json::Value> {
        self.data.get(key)?.as_json()
    }

    fn str(&self, key: &str) -> Option<&'a str> {
        self.data.get(key)?.as_str()
    }

    fn object<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.json(key)?;
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}
