//! Environment variable names used by this crate for convenient
//! configuration of a hook from a service's environment.
//!
//! These are purely helpers; [`Hook`](crate::hook::Hook) itself never reads
//! the environment unless [`Hook::from_env`](crate::hook::Hook::from_env) is
//! called.

/// Sentry DSN, e.g. `https://public@sentry.example.com/42`.
pub const SENTRY_DSN_ENV: &str = "SENTRY_DSN";

/// Optional server name reported with every event.
pub const SENTRY_SERVER_NAME_ENV: &str = "SENTRY_SERVER_NAME";

/// Optional release identifier.
pub const SENTRY_RELEASE_ENV: &str = "SENTRY_RELEASE";

/// Optional environment name (`production`, `staging`, ...).
pub const SENTRY_ENVIRONMENT_ENV: &str = "SENTRY_ENVIRONMENT";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an environment variable, treating unset and empty the same.
pub fn env_opt(key: &str) -> Option<String> {
    Some(env_or(key, "")).filter(|v| !v.is_empty())
}
