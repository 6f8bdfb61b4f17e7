//! Tracing initialisation for the `chainfeed` binary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The `log` section of `chainfeed.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// Per-crate overrides, e.g. `chainfeed-rpc: debug`.
    pub components: HashMap<String, String>,
    /// JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `"info,chainfeed_rpc=debug"` style filter directives, sorted by crate.
    pub fn directives(&self) -> String {
        let mut overrides: Vec<String> = self
            .components
            .iter()
            .map(|(krate, level)| format!("{}={level}", krate.replace('-', "_")))
            .collect();
        overrides.sort();
        std::iter::once(self.level.clone()).chain(overrides).collect::<Vec<_>>().join(",")
    }
}

/// Install the global subscriber once. `RUST_LOG`, when set, replaces the
/// configured directives.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = config.json.then(|| fmt::layer().json());
    let text = (!config.json).then(|| fmt::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_normalize_crate_names() {
        let mut config = LogConfig::default();
        config.components.insert("chainfeed-rpc".into(), "debug".into());
        config.components.insert("chainfeed-evm".into(), "trace".into());
        assert_eq!(config.directives(), "info,chainfeed_evm=trace,chainfeed_rpc=debug");
    }

    #[test]
    fn defaults_from_empty_yaml() {
        let config: LogConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.level, "info");
        assert!(!config.json);
    }
}
