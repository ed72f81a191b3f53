use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use reaper::config::labels_to_map;
use reaper::config::CleanupArgs;
use reaper::config::Cli;
use reaper::config::Commands;
use reaper::config::HandshakeArgs;
use reaper::config::PruneArgs;
use reaper::DockerCli;
use reaper::FilterSet;
use reaper::ManualExitHook;
use reaper::ReaperConfig;
use reaper::ResourceReaper;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = utils::logging::init();

    tracing::debug!("reaper {}", &**version::VERSION);

    match cli.command {
        Commands::Prune(args) => run_prune(&ReaperConfig::new().with_docker_binary(cli.docker_bin), args),
        Commands::Cleanup(args) => run_cleanup(&ReaperConfig::new().with_docker_binary(cli.docker_bin), args),
        Commands::Handshake(args) => {
            let config = args.to_config(cli.docker_bin.clone());
            run_handshake(&config, args)
        }
    }
}

/// Builds a reaper whose exit work is driven by this command rather than `atexit`.
fn command_reaper(config: &ReaperConfig) -> Result<ResourceReaper> {
    let runtime = Arc::new(DockerCli::new(config.docker_binary.clone()));
    ResourceReaper::with_exit_hook(runtime, Arc::new(ManualExitHook::new()), config)
        .context("invalid default labels")
}

fn run_prune(config: &ReaperConfig, args: PruneArgs) -> Result<()> {
    let filters = FilterSet::from_labels(&labels_to_map(&args.labels)).context("invalid label filter")?;
    let reaper = command_reaper(config)?;

    tracing::info!(labels = ?filters.label_values(), "pruning labelled resources");
    reaper.prune_filter_set(&filters);
    Ok(())
}

fn run_cleanup(config: &ReaperConfig, args: CleanupArgs) -> Result<()> {
    let reaper = command_reaper(config)?;
    for id in &args.containers {
        reaper.register_container(id.as_str(), id.as_str());
    }
    for id in &args.networks {
        reaper.register_network(id.as_str());
    }
    for name in &args.images {
        reaper.register_image(name.as_str());
    }

    tracing::info!(count = reaper.registry().len(), "removing resources");
    reaper.cleanup_all();
    Ok(())
}

fn run_handshake(config: &ReaperConfig, args: HandshakeArgs) -> Result<()> {
    let reaper = command_reaper(config)?;
    let acknowledged = reaper
        .start_watchdog(&args.addr)
        .with_context(|| format!("failed to reach watchdog at {}", args.addr))?;

    if acknowledged {
        tracing::info!(addr = %args.addr, "watchdog acknowledged");
        println!("ACK");
        Ok(())
    } else {
        anyhow::bail!("watchdog at {} closed the connection without acknowledging", args.addr)
    }
}
