//! Forward `tracing` events to a Sentry server.
//!
//! A [`Hook`] turns a [`LogEntry`] into a Sentry [`Packet`] and hands it to
//! a [`Notifier`]. [`SentryLayer`] plugs a hook into a `tracing`
//! subscriber.

pub mod client;
pub mod dsn;
pub mod entry;
pub mod env;
pub mod error;
pub mod fields;
pub mod hook;
pub mod init;
pub mod layer;
pub mod noop_transport;
pub mod packet;
pub mod stacktrace;
pub mod transport;
pub mod wait_group;

#[cfg(feature = "http")]
pub mod http;

pub use client::{Client, Delivery, Notifier};
pub use entry::{ErrorValue, FieldValue, Level, LogEntry};
pub use error::{Backtraced, DsnError, HookError, NotifyError, Traced};
pub use hook::{Hook, HookConfig, StacktraceConfig};
pub use layer::SentryLayer;
pub use packet::Packet;
pub use stacktrace::Stacktrace;
