use crate::entry::{FieldValue, Level, LogEntry};
use crate::fields;
use crate::hook::Hook;
use chrono::Utc;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events from this crate are never forwarded, so that delivery failures
/// logged by the hook cannot feed back into it.
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

/// `tracing_subscriber` layer that turns events into [`LogEntry`]s and
/// fires them through a [`Hook`].
///
/// Only events at one of the hook's [`levels`](Hook::levels) are forwarded.
/// Fields named like the well-known keys (`tags`, `user`, ...) may carry
/// JSON text, e.g. `tags = %json!({"region": "eu"})`. Errors recorded with
/// `error = &err as &dyn std::error::Error` keep their whole chain.
///
/// An asynchronous hook registers the delivery before the logging call
/// returns, so a following `Hook::flush` waits for it. A synchronous hook
/// blocks the logging call up to the configured timeout; on a
/// current-thread runtime blocking is impossible and the entry is fired on
/// a spawned task instead.
pub struct SentryLayer {
    hook: Arc<Hook>,
    runtime: Handle,
}

impl SentryLayer {
    /// Create a layer firing through `hook` on the current Tokio runtime.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(hook: Arc<Hook>) -> Self {
        Self::with_runtime(hook, Handle::current())
    }

    pub fn with_runtime(hook: Arc<Hook>, runtime: Handle) -> Self {
        Self { hook, runtime }
    }

    pub fn hook(&self) -> &Arc<Hook> {
        &self.hook
    }

    fn dispatch(&self, entry: LogEntry) {
        let current = Handle::try_current();
        if self.hook.is_async() {
            let _entered = match &current {
                Ok(handle) => handle.enter(),
                Err(_) => self.runtime.enter(),
            };
            if self.hook.try_enqueue(&entry) {
                return;
            }
        }

        let hook = Arc::clone(&self.hook);
        let fire = async move {
            if let Err(err) = hook.fire(&entry).await {
                tracing::warn!(error = %err, "failed to send event to sentry");
            }
        };

        match current {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| current.block_on(fire));
            }
            Ok(current) => {
                current.spawn(fire);
            }
            Err(_) => self.runtime.block_on(fire),
        }
    }
}

impl<S> Layer<S> for SentryLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if is_own_target(meta.target()) {
            return;
        }
        let level = Level::from(*meta.level());
        if !self.hook.levels().contains(&level) {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;

        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        fields
            .entry(fields::LOGGER.to_string())
            .or_insert_with(|| FieldValue::from(meta.target()));

        let entry = LogEntry {
            level,
            message: message.unwrap_or_default(),
            timestamp: Utc::now(),
            fields,
        };
        self.dispatch(entry);
    }
}

fn is_own_target(target: &str) -> bool {
    match target.strip_prefix(OWN_TARGET) {
        Some(rest) => rest.is_empty() || rest.starts_with("::"),
        None => false,
    }
}

struct FieldVisitor<'a> {
    fields: &'a mut BTreeMap<String, FieldValue>,
    message: &'a mut Option<String>,
}

impl<'a> FieldVisitor<'a> {
    /// Well-known structured keys accept JSON text; anything else, or text
    /// that does not parse, is kept as given.
    fn text(&mut self, field: &Field, value: String, fallback: fn(String) -> FieldValue) {
        let name = field.name();
        let parsed = match name {
            fields::TAGS | fields::FINGERPRINT | fields::HTTP_REQUEST | fields::USER => {
                serde_json::from_str::<serde_json::Value>(&value)
                    .ok()
                    .filter(|v| v.is_object() || v.is_array())
            }
            _ => None,
        };
        let value = match parsed {
            Some(json) => FieldValue::Json(json),
            None => fallback(value),
        };
        self.fields.insert(name.to_string(), value);
    }
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.text(field, value.to_string(), FieldValue::from);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), FieldValue::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), FieldValue::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), FieldValue::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), FieldValue::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        self.fields.insert(field.name().to_string(), FieldValue::error(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.text(field, format!("{:?}", value), FieldValue::Display);
        }
    }
}
