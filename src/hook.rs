use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::sleep;

use crate::client::{Client, Delivery, Notifier};
use crate::entry::{FieldValue, Level, LogEntry};
use crate::env::{env_opt, SENTRY_DSN_ENV, SENTRY_ENVIRONMENT_ENV, SENTRY_RELEASE_ENV, SENTRY_SERVER_NAME_ENV};
use crate::error::{HookError, NotifyError};
use crate::fields::Fields;
use crate::packet::{Exception, Interface, Packet, Severity};
use crate::stacktrace::{find_stacktrace, Stacktrace};
use crate::wait_group::WaitGroup;

/// How long a synchronous hook waits for the server by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Platform tag sent with every packet.
pub const PLATFORM: &str = "rust";

/// Levels a hook fires for unless told otherwise.
pub const DEFAULT_LEVELS: [Level; 3] = [Level::Panic, Level::Fatal, Level::Error];

/// Controls when and how stack traces are attached to packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StacktraceConfig {
    /// Attach stack traces at all.
    pub enable: bool,
    /// Least severe level that still gets a stack trace.
    pub level: Level,
    /// Innermost frames to drop from freshly captured traces.
    pub skip: usize,
    /// Source lines to include around each frame. `-1` includes only the
    /// frame's own line.
    pub context: i32,
    /// Module prefixes whose frames are marked as application code.
    pub in_app_prefixes: Vec<String>,
    /// Report the exception type; when `false` it is sent blank.
    pub send_exception_type: bool,
    /// Send the bare stack trace with a `type: culprit` culprit instead of
    /// the exception.
    pub switch_exception_type_and_message: bool,
}

impl Default for StacktraceConfig {
    fn default() -> Self {
        Self {
            enable: false,
            level: Level::Error,
            skip: 5,
            context: 0,
            in_app_prefixes: Vec::new(),
            send_exception_type: true,
            switch_exception_type_and_message: false,
        }
    }
}

/// Custom formatter for one extra field.
pub type ExtraFilter = Arc<dyn Fn(&FieldValue) -> serde_json::Value + Send + Sync>;

/// Mutable settings of a [`Hook`].
#[derive(Clone)]
pub struct HookConfig {
    /// Time a synchronous hook waits for the delivery outcome. Zero means
    /// do not wait at all. Ignored by asynchronous hooks.
    pub timeout: Duration,
    pub stacktrace: StacktraceConfig,
    pub server_name: Option<String>,
    pub release: Option<String>,
    pub environment: Option<String>,
    pub ignore_fields: HashSet<String>,
    pub extra_filters: HashMap<String, ExtraFilter>,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            stacktrace: StacktraceConfig::default(),
            server_name: None,
            release: None,
            environment: None,
            ignore_fields: HashSet::new(),
            extra_filters: HashMap::new(),
        }
    }
}

impl fmt::Debug for HookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut filters: Vec<&String> = self.extra_filters.keys().collect();
        filters.sort();
        f.debug_struct("HookConfig")
            .field("timeout", &self.timeout)
            .field("stacktrace", &self.stacktrace)
            .field("server_name", &self.server_name)
            .field("release", &self.release)
            .field("environment", &self.environment)
            .field("ignore_fields", &self.ignore_fields)
            .field("extra_filters", &filters)
            .finish()
    }
}

/// Delivers log entries to a Sentry server.
///
/// `fire` may be called from many tasks at once. In asynchronous mode each
/// delivery is awaited on a background task and [`flush`](Hook::flush)
/// waits for all of them.
pub struct Hook {
    client: Arc<dyn Notifier>,
    levels: Vec<Level>,
    asynchronous: bool,
    config: RwLock<HookConfig>,
    /// Shared by `fire`, exclusive for `flush`, so no delivery is registered
    /// while a flush is waiting.
    barrier: tokio::sync::RwLock<()>,
    pending: WaitGroup,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("levels", &self.levels)
            .field("asynchronous", &self.asynchronous)
            .field("config", &*self.read_config())
            .field("pending", &self.pending.pending())
            .finish()
    }
}

impl Hook {
    /// Synchronous hook for `dsn` firing at the default levels.
    pub fn from_dsn(dsn: &str) -> Result<Self, HookError> {
        Self::new(dsn, DEFAULT_LEVELS.to_vec())
    }

    /// Check that a hook can be built for `dsn`. The hook is discarded.
    pub fn verify(dsn: &str) -> bool {
        Self::from_dsn(dsn).is_ok()
    }

    pub fn new(dsn: &str, levels: Vec<Level>) -> Result<Self, HookError> {
        Self::with_tags(dsn, BTreeMap::new(), levels)
    }

    /// Like [`new`](Hook::new), with tags added to every packet.
    pub fn with_tags(dsn: &str, tags: BTreeMap<String, String>, levels: Vec<Level>) -> Result<Self, HookError> {
        let client = Client::from_dsn(dsn, tags)?;
        Self::with_client(Arc::new(client), levels)
    }

    /// Hook around an existing notifier.
    pub fn with_client(client: Arc<dyn Notifier>, levels: Vec<Level>) -> Result<Self, HookError> {
        Ok(Self {
            client,
            levels,
            asynchronous: false,
            config: RwLock::new(HookConfig::default()),
            barrier: tokio::sync::RwLock::new(()),
            pending: WaitGroup::new(),
        })
    }

    pub fn new_async(dsn: &str, levels: Vec<Level>) -> Result<Self, HookError> {
        Self::new(dsn, levels).map(Self::into_async)
    }

    pub fn with_tags_async(
        dsn: &str,
        tags: BTreeMap<String, String>,
        levels: Vec<Level>,
    ) -> Result<Self, HookError> {
        Self::with_tags(dsn, tags, levels).map(Self::into_async)
    }

    pub fn with_client_async(client: Arc<dyn Notifier>, levels: Vec<Level>) -> Result<Self, HookError> {
        Self::with_client(client, levels).map(Self::into_async)
    }

    /// Synchronous hook configured from `SENTRY_*` environment variables.
    pub fn from_env() -> Result<Self, HookError> {
        let dsn = env_opt(SENTRY_DSN_ENV).unwrap_or_default();
        let hook = Self::from_dsn(&dsn)?;
        {
            let mut config = hook.write_config();
            config.server_name = env_opt(SENTRY_SERVER_NAME_ENV);
            config.release = env_opt(SENTRY_RELEASE_ENV);
            config.environment = env_opt(SENTRY_ENVIRONMENT_ENV);
        }
        Ok(hook)
    }

    fn into_async(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn is_async(&self) -> bool {
        self.asynchronous
    }

    /// Background deliveries not yet completed.
    pub fn pending(&self) -> usize {
        self.pending.pending()
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> HookConfig {
        self.read_config().clone()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.write_config().timeout = timeout;
    }

    pub fn set_stacktrace_config(&self, stacktrace: StacktraceConfig) {
        self.write_config().stacktrace = stacktrace;
    }

    /// Default server name; a `server_name` field on the entry overrides it.
    pub fn set_server_name(&self, server_name: impl Into<String>) {
        self.write_config().server_name = Some(server_name.into());
    }

    pub fn set_release(&self, release: impl Into<String>) {
        self.write_config().release = Some(release.into());
    }

    pub fn set_environment(&self, environment: impl Into<String>) {
        self.write_config().environment = Some(environment.into());
    }

    /// Never send field `name` as extra data.
    pub fn add_ignore(&self, name: impl Into<String>) {
        self.write_config().ignore_fields.insert(name.into());
    }

    /// Format field `name` with `filter` instead of the default formatter.
    pub fn add_extra_filter<F>(&self, name: impl Into<String>, filter: F)
    where
        F: Fn(&FieldValue) -> serde_json::Value + Send + Sync + 'static,
    {
        self.write_config().extra_filters.insert(name.into(), Arc::new(filter));
    }

    fn read_config(&self) -> RwLockReadGuard<'_, HookConfig> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_config(&self) -> RwLockWriteGuard<'_, HookConfig> {
        self.config.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build the packet `fire` would send for `entry`.
    pub fn build_packet(&self, entry: &LogEntry) -> Packet {
        build_packet(&self.read_config(), entry)
    }

    /// Send `entry` to the server.
    ///
    /// Returns an error only for a synchronous hook with a non-zero timeout,
    /// when the server reports a failure or does not answer in time.
    pub async fn fire(&self, entry: &LogEntry) -> Result<(), HookError> {
        let _shared = self.barrier.read().await;

        let (packet, timeout) = {
            let config = self.read_config();
            (build_packet(&config, entry), config.timeout)
        };
        let delivery = self.client.capture(packet);

        if self.asynchronous {
            self.track(delivery);
            return Ok(());
        }

        if timeout.is_zero() {
            return Ok(());
        }

        tokio::select! {
            result = outcome(delivery) => result.map_err(HookError::Delivery),
            _ = sleep(timeout) => Err(HookError::Timeout(timeout)),
        }
    }

    /// Hand `entry` to the notifier without awaiting anything.
    ///
    /// Only asynchronous hooks accept entries this way. The delivery is
    /// registered before returning, so a later [`flush`](Hook::flush) waits
    /// for it. Returns `false`, doing nothing, for a synchronous hook or
    /// while a flush holds the barrier; the caller should fall back to
    /// [`fire`](Hook::fire). Must be called within a Tokio runtime.
    pub fn try_enqueue(&self, entry: &LogEntry) -> bool {
        if !self.asynchronous {
            return false;
        }
        let Ok(_shared) = self.barrier.try_read() else {
            return false;
        };
        let packet = self.build_packet(entry);
        self.track(self.client.capture(packet));
        true
    }

    /// Await `delivery` on a background task counted by the wait group.
    fn track(&self, delivery: Delivery) {
        let unit = self.pending.add();
        tokio::spawn(async move {
            if let Err(err) = outcome(delivery).await {
                tracing::warn!(error = %err, "failed to deliver event to sentry");
            }
            drop(unit);
        });
    }

    /// Wait until every background delivery has completed. No-op for
    /// synchronous hooks.
    ///
    /// While a flush waits, new `fire` calls wait for it to finish.
    pub async fn flush(&self) {
        if !self.asynchronous {
            return;
        }
        let _exclusive = self.barrier.write().await;
        self.pending.wait().await;
    }
}

async fn outcome(delivery: Delivery) -> Result<(), NotifyError> {
    delivery.await.unwrap_or(Err(NotifyError::Dropped))
}

fn build_packet(config: &HookConfig, entry: &LogEntry) -> Packet {
    let mut packet = Packet::new(entry.message.clone());
    packet.timestamp = entry.timestamp;
    packet.level = Severity::from_level(entry.level);
    packet.platform = PLATFORM.to_string();
    packet.server_name = config.server_name.clone();
    packet.release = config.release.clone();
    packet.environment = config.environment.clone();

    let fields = Fields::new(&entry.fields);
    if let Some(logger) = fields.logger() {
        packet.logger = Some(logger.to_string());
    }
    if let Some(server_name) = fields.server_name() {
        packet.server_name = Some(server_name.to_string());
    }
    if let Some(event_id) = fields.event_id() {
        packet.event_id = Some(event_id.to_string());
    }
    if let Some(tags) = fields.tags() {
        packet.tags = Some(tags);
    }
    if let Some(fingerprint) = fields.fingerprint() {
        packet.fingerprint = Some(fingerprint);
    }
    if let Some(request) = fields.http_request() {
        packet.interfaces.push(Interface::Request(request));
    }
    if let Some(user) = fields.user() {
        packet.interfaces.push(Interface::User(user));
    }

    let st = &config.stacktrace;
    if st.enable && entry.level.is_at_least(st.level) {
        if let Some(err) = fields.error() {
            let stacktrace = find_stacktrace(err, st.context, &st.in_app_prefixes)
                .or_else(|| Stacktrace::capture(st.skip, st.context, &st.in_app_prefixes));
            let mut exception = Exception::new(err.root_cause(), stacktrace.clone());
            if !st.send_exception_type {
                exception.ty.clear();
            }
            if st.switch_exception_type_and_message {
                let culprit = stacktrace.as_ref().map(Stacktrace::culprit).unwrap_or_default();
                packet.culprit = Some(format!("{}: {}", exception.ty, culprit));
                if let Some(stacktrace) = stacktrace {
                    packet.interfaces.push(Interface::Stacktrace(stacktrace));
                }
            } else {
                packet.interfaces.push(Interface::Exception(exception));
                packet.culprit = Some(err.message().to_string());
            }
        } else if let Some(stacktrace) = Stacktrace::capture(st.skip, st.context, &st.in_app_prefixes) {
            packet.interfaces.push(Interface::Stacktrace(stacktrace));
        }
    } else if let Some(err) = fields.error() {
        packet.culprit = Some(err.message().to_string());
    }

    for (key, value) in format_extra(config, &fields) {
        packet.extra.entry(key).or_insert(value);
    }
    packet
}

fn format_extra(config: &HookConfig, fields: &Fields<'_>) -> serde_json::Map<String, serde_json::Value> {
    let mut extra = serde_json::Map::new();
    for (key, value) in fields.iter() {
        if fields.is_consumed(key) || config.ignore_fields.contains(key) {
            continue;
        }
        let formatted = match config.extra_filters.get(key) {
            Some(filter) => filter(value),
            None => format_value(value),
        };
        extra.insert(key.clone(), formatted);
    }
    extra
}

/// Default formatting of an extra field.
pub fn format_value(value: &FieldValue) -> serde_json::Value {
    match value {
        FieldValue::Json(v) => v.clone(),
        FieldValue::Error(err) => serde_json::Value::String(err.message().to_string()),
        FieldValue::Display(s) => serde_json::Value::String(s.clone()),
    }
}
