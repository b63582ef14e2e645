use std::error::Error;
use std::fmt;
use std::time::Duration;

use backtrace::Backtrace;

use crate::stacktrace::Stacktrace;

/// Error type returned when parsing a Sentry DSN.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DsnError {
    #[error("DSN is missing a scheme")]
    MissingScheme,

    #[error("unsupported DSN scheme: {0}")]
    UnknownScheme(String),

    #[error("DSN is missing a public key")]
    MissingPublicKey,

    #[error("DSN is missing a host")]
    MissingHost,

    #[error("invalid DSN port: {0}")]
    InvalidPort(String),

    #[error("DSN is missing a project id")]
    MissingProjectId,
}

/// Failure reported by a [`Notifier`](crate::client::Notifier) for a single
/// packet.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("http request failed: {0}")]
    Http(String),

    #[error("sentry server responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to serialize packet: {0}")]
    Serialize(String),

    #[error("no tokio runtime available to deliver the packet")]
    NoRuntime,

    #[error("delivery outcome was dropped before it was reported")]
    Dropped,
}

/// Errors surfaced by [`Hook`](crate::hook::Hook) construction and by
/// `Hook::fire` in synchronous mode.
#[derive(thiserror::Error, Debug)]
pub enum HookError {
    #[error(transparent)]
    Dsn(#[from] DsnError),

    #[error("failed to create sentry client: {0}")]
    Client(String),

    #[error("no response from sentry server in {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Delivery(#[from] NotifyError),
}

/// Wraps an error together with a ready-made [`Stacktrace`].
///
/// The wrapper renders exactly like the wrapped error and takes its place in
/// the chain: its `source()` is the wrapped error's `source()`. The hook picks
/// the trace up as-is, without symbolication.
pub struct Traced {
    inner: Box<dyn Error + Send + Sync>,
    stacktrace: Stacktrace,
}

impl Traced {
    pub fn new(err: impl Into<Box<dyn Error + Send + Sync>>, stacktrace: Stacktrace) -> Self {
        Self {
            inner: err.into(),
            stacktrace,
        }
    }

    pub fn stacktrace(&self) -> &Stacktrace {
        &self.stacktrace
    }

    pub fn get_ref(&self) -> &(dyn Error + Send + Sync + 'static) {
        &*self.inner
    }

    pub fn into_inner(self) -> Box<dyn Error + Send + Sync> {
        self.inner
    }
}

impl fmt::Display for Traced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Traced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl Error for Traced {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

/// Wraps an error together with a raw, unresolved [`Backtrace`] captured at
/// the wrap site.
///
/// Unlike [`Traced`] this is a separate link: `source()` yields the wrapped
/// error. Symbols are only resolved if the hook ends up using the trace.
pub struct Backtraced {
    inner: Box<dyn Error + Send + Sync>,
    backtrace: Backtrace,
}

impl Backtraced {
    /// Wrap `err`, capturing the current call stack.
    pub fn new(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::with_backtrace(err, Backtrace::new_unresolved())
    }

    pub fn with_backtrace(err: impl Into<Box<dyn Error + Send + Sync>>, backtrace: Backtrace) -> Self {
        Self {
            inner: err.into(),
            backtrace,
        }
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for Backtraced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Backtraced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl Error for Backtraced {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&*self.inner)
    }
}
