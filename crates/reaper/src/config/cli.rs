use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use utils::version;

use super::ReaperConfig;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "REAPER_DOCKER_BIN",
        default_value = "docker",
        value_hint = clap::ValueHint::ExecutablePath,
        help = "Docker compatible CLI used to talk to the container runtime"
    )]
    pub docker_bin: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Remove every container, network, volume and image carrying the given labels
    Prune(PruneArgs),
    /// Stop and remove the named resources
    Cleanup(CleanupArgs),
    /// Register labels with a running watchdog and report whether it acknowledged
    Handshake(HandshakeArgs),
}

#[derive(Args, Clone)]
pub struct PruneArgs {
    #[arg(
        long = "label",
        value_name = "KEY=VALUE",
        value_parser = parse_label,
        required = true,
        help = "Label the resources must carry; repeat to require several"
    )]
    pub labels: Vec<(String, String)>,
}

#[derive(Args, Clone)]
pub struct CleanupArgs {
    #[arg(long = "container", value_name = "ID", help = "Container to stop and remove")]
    pub containers: Vec<String>,

    #[arg(long = "network", value_name = "ID", help = "Network to remove")]
    pub networks: Vec<String>,

    #[arg(long = "image", value_name = "NAME", help = "Image to force-remove")]
    pub images: Vec<String>,
}

#[derive(Args, Clone)]
pub struct HandshakeArgs {
    #[arg(
        long,
        env = "REAPER_WATCHDOG_ADDR",
        help = "Watchdog address, e.g. localhost:8080"
    )]
    pub addr: String,

    #[arg(
        long = "label",
        value_name = "KEY=VALUE",
        value_parser = parse_label,
        help = "Labels to register; defaults to this process's identifying labels"
    )]
    pub labels: Vec<(String, String)>,

    #[arg(long, default_value = "10", help = "Connect timeout in seconds")]
    pub connect_timeout_secs: u64,

    #[arg(long, default_value = "5", help = "Seconds to wait for the acknowledgment")]
    pub ack_timeout_secs: u64,
}

impl HandshakeArgs {
    pub fn to_config(&self, docker_bin: PathBuf) -> ReaperConfig {
        let mut config = ReaperConfig::new()
            .with_docker_binary(docker_bin)
            .with_watchdog_timeouts(
                Duration::from_secs(self.connect_timeout_secs),
                Duration::from_secs(self.ack_timeout_secs),
            );
        if !self.labels.is_empty() {
            config = config.with_default_labels(labels_to_map(&self.labels));
        }
        config
    }
}

pub fn labels_to_map(labels: &[(String, String)]) -> BTreeMap<String, String> {
    labels.iter().cloned().collect()
}

/// Parses a `key=value` label argument.
fn parse_label(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid label `{raw}`: expected KEY=VALUE"))?;
    if key.is_empty() {
        return Err(format!("invalid label `{raw}`: key must not be empty"));
    }
    Ok((key.to_string(), value.to_string()))
}
