use crate::hook::Hook;
use crate::layer::SentryLayer;
use std::sync::Arc;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Installation settings for [`init_tracing_with_config`].
///
/// **Fields**
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is
///   added next to [`SentryLayer`] so events are also printed locally.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self { enable_stdout: true }
    }
}

/// Initialize global `tracing` subscriber using the provided hook and
/// [`LayerConfig`].
///
/// **Parameters**
/// - `hook`: the [`Hook`] that receives every event at one of its levels.
/// - `config`: [`LayerConfig`] controlling local output.
///
/// **Effects**
///
/// This installs a [`Registry`] combined with [`SentryLayer`] as the
/// global default subscriber. Must be called from within a Tokio runtime.
///
/// **Returns**
/// - `Err(..)` if a global subscriber was already installed.
pub fn init_tracing_with_config(hook: Arc<Hook>, config: LayerConfig) -> Result<(), SetGlobalDefaultError> {
    let layer = SentryLayer::new(hook);

    // The two branches produce different subscriber types.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)
    }
}

/// Initialize tracing with sensible defaults.
///
/// Equivalent to calling [`init_tracing_with_config`] with
/// [`LayerConfig::default`].
pub fn init_tracing(hook: Arc<Hook>) -> Result<(), SetGlobalDefaultError> {
    init_tracing_with_config(hook, LayerConfig::default())
}
