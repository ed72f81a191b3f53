//! Tracks containers, networks and images created by this process and makes
//! sure they are removed, either on request or when the process exits.

pub mod config;
mod death_note;
pub mod hook;
pub mod registry;
pub mod removal;
pub mod resource_reaper;
pub mod runtime;
mod shutdown;

pub use api_types::FilterClause;
pub use api_types::FilterError;
pub use api_types::FilterSet;
pub use api_types::ResourceKind;
pub use config::ReaperConfig;
pub use hook::AtExitHook;
pub use hook::ExitHook;
pub use hook::ManualExitHook;
pub use removal::RemovalOutcome;
pub use resource_reaper::ResourceReaper;
pub use runtime::docker_cli::DockerCli;
pub use runtime::ContainerRuntime;
