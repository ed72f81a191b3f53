use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use watchdog::WatchdogConfig;

/// Settings for a [`crate::ResourceReaper`] context.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// labels stamped on every resource this process creates; they seed the
    /// exit-time sweep and are what the watchdog is asked to watch
    pub default_labels: BTreeMap<String, String>,
    /// docker compatible CLI used by the default runtime backend
    pub docker_binary: PathBuf,
    /// watchdog connection timeouts
    pub watchdog: WatchdogConfig,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            default_labels: api_types::default_labels(),
            docker_binary: PathBuf::from("docker"),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl ReaperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the default identifying labels.
    pub fn with_default_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.default_labels = labels;
        self
    }

    /// Adds one identifying label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_labels.insert(key.into(), value.into());
        self
    }

    pub fn with_docker_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.docker_binary = binary.into();
        self
    }

    pub fn with_watchdog_timeouts(mut self, connect: Duration, ack: Duration) -> Self {
        self.watchdog = WatchdogConfig::default()
            .with_connect_timeout(connect)
            .with_ack_timeout(ack);
        self
    }
}
